//! Submission domain types

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A graded job: the candidate's source plus everything needed to run and
/// test it.
///
/// Decoded from the queue payload by [`SubmissionRequest::from_value`], which
/// also validates it. Consumed exactly once per pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    #[serde(deserialize_with = "string_or_number")]
    pub submission_id: String,
    pub language: String,
    pub notify_key: String,
    /// Base image the source is unpacked and installed into
    pub docker_image: String,
    /// URL of the zipped source archive
    pub source_url: String,
    /// Process name -> start command (the submission's Procfile)
    pub commands: BTreeMap<String, String>,
    /// Identifier of the test case directory to run
    pub test_case: String,
    pub processes: BTreeMap<String, ProcessSpec>,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

impl SubmissionRequest {
    /// Total number of process instances the submission asks for
    pub fn total_instances(&self) -> usize {
        self.processes.values().map(|p| p.instances as usize).sum()
    }
}

/// How many copies of a named process to start
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessSpec {
    pub instances: u32,
}

/// An auxiliary container (database, mock API, ...) the submission's
/// processes may depend on.
///
/// The `ip`, `internal_url` and `external_url` fields are filled in once
/// the service container has been provisioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub id: String,
    pub image: String,
    /// Port the service listens on inside its container
    pub port: u16,
    /// URL template with `{{ip}}` and `{{port}}` placeholders
    pub url: String,
    /// Environment variable that receives the resolved URL
    pub env_name: String,
    /// Process names allowed to reach this service
    #[serde(default)]
    pub link: Vec<String>,
    /// Marker printed on stdout once the service is ready. When absent the
    /// service counts as ready as soon as its container is started.
    #[serde(default)]
    pub done_text: Option<String>,

    #[serde(skip)]
    pub ip: Option<String>,
    #[serde(skip)]
    pub internal_url: Option<String>,
    #[serde(skip)]
    pub external_url: Option<String>,
}

impl ServiceDescriptor {
    /// Fills the URL template with a concrete address
    pub fn render_url(&self, ip: &str, port: u16) -> String {
        self.url
            .replace("{{ip}}", ip)
            .replace("{{port}}", &port.to_string())
    }

    /// Whether the given process name may open connections to this service
    pub fn is_linked_to(&self, process_name: &str) -> bool {
        self.link.iter().any(|name| name == process_name)
    }
}

/// One running copy of a submission process
///
/// Created while user containers are prepared; only `ip` and `env` are
/// filled in afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInstance {
    pub process_name: String,
    pub instance: u32,
    pub container_name: String,
    pub command: String,
    pub host_port: u16,
    pub ip: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl ProcessInstance {
    /// Label used in logs and user-facing errors, e.g. `web[1]`
    pub fn label(&self) -> String {
        format!("{}[{}]", self.process_name, self.instance)
    }
}

/// Accepts ids sent either as JSON strings or as numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
