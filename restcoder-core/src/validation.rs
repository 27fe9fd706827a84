//! Submission validation
//!
//! Turns a raw queue payload into a [`SubmissionRequest`], rejecting anything
//! that does not match the declared job shape before any resource is
//! provisioned.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::domain::submission::SubmissionRequest;

/// Maximum length of identifiers, images and URLs
pub const SHORT_STRING_MAX: usize = 255;

/// Maximum length of a process start command
pub const LONG_STRING_MAX: usize = 16_000;

/// Maximum number of instances for a single process
pub const MAX_INSTANCES: u32 = 10;

/// Maximum length of a name once embedded in a resource name
pub const SLUG_MAX: usize = 40;

/// The job input does not match its declared shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

type Result<T> = std::result::Result<T, ValidationError>;

impl SubmissionRequest {
    /// Decodes and validates a raw job payload
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(ValidationError::new("input must be an object"));
        }

        let request: SubmissionRequest = serde_json::from_value(value)
            .map_err(|e| ValidationError::new(format!("input is invalid: {}", e)))?;

        request.validate()?;
        Ok(request)
    }

    /// Checks the semantic constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        short_string("submissionId", &self.submission_id)?;
        short_string("language", &self.language)?;
        short_string("notifyKey", &self.notify_key)?;
        short_string("dockerImage", &self.docker_image)?;
        short_string("sourceUrl", &self.source_url)?;
        http_url("sourceUrl", &self.source_url)?;
        short_string("testCase", &self.test_case)?;

        if self.test_case.contains('/') || self.test_case.contains("..") {
            return Err(ValidationError::new("testCase must be a plain name"));
        }

        if self.processes.is_empty() {
            return Err(ValidationError::new("processes must not be empty"));
        }

        let mut process_slugs = HashMap::new();
        for (name, spec) in &self.processes {
            process_name(&format!("processes.{}", name), name)?;
            distinct_slug(&mut process_slugs, &format!("processes.{}", name), name)?;

            if spec.instances == 0 || spec.instances > MAX_INSTANCES {
                return Err(ValidationError::new(format!(
                    "processes.{}.instances must be between 1 and {}",
                    name, MAX_INSTANCES
                )));
            }

            let command = self.commands.get(name).map(|c| c.trim()).unwrap_or("");
            if command.is_empty() {
                return Err(ValidationError::new(format!(
                    "commands.{} is required (command {} is missing in Procfile)",
                    name, name
                )));
            }
            if command.len() > LONG_STRING_MAX {
                return Err(ValidationError::new(format!(
                    "commands.{} must be at most {} characters",
                    name, LONG_STRING_MAX
                )));
            }
        }

        let mut ids = HashSet::new();
        let mut service_slugs = HashMap::new();
        for (idx, service) in self.services.iter().enumerate() {
            let path = format!("services[{}]", idx);

            short_string(&format!("{}.id", path), &service.id)?;
            process_name(&format!("{}.id", path), &service.id)?;
            if !ids.insert(service.id.as_str()) {
                return Err(ValidationError::new(format!(
                    "{}.id '{}' is duplicated",
                    path, service.id
                )));
            }
            distinct_slug(&mut service_slugs, &format!("{}.id", path), &service.id)?;

            short_string(&format!("{}.image", path), &service.image)?;
            short_string(&format!("{}.url", path), &service.url)?;

            if service.port == 0 {
                return Err(ValidationError::new(format!(
                    "{}.port must be greater than 0",
                    path
                )));
            }

            if !is_env_name(&service.env_name) {
                return Err(ValidationError::new(format!(
                    "{}.envName must be a valid environment variable name",
                    path
                )));
            }

            for linked in &service.link {
                if !self.processes.contains_key(linked) {
                    return Err(ValidationError::new(format!(
                        "{}.link references unknown process '{}'",
                        path, linked
                    )));
                }
            }

            if let Some(done_text) = &service.done_text {
                short_string(&format!("{}.doneText", path), done_text)?;
            }
        }

        Ok(())
    }
}

fn short_string(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(format!("{} is required", name)));
    }
    if value.len() > SHORT_STRING_MAX {
        return Err(ValidationError::new(format!(
            "{} must be at most {} characters",
            name, SHORT_STRING_MAX
        )));
    }
    Ok(())
}

fn http_url(name: &str, value: &str) -> Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ValidationError::new(format!(
            "{} must start with http:// or https://",
            name
        )));
    }
    Ok(())
}

/// Names end up in container names, so only a safe subset is allowed
fn process_name(name: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ValidationError::new(format!(
            "{} may only contain letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}

/// Rejects a name whose slug is already taken by a different name
fn distinct_slug<'a>(
    taken: &mut HashMap<String, &'a str>,
    name: &str,
    value: &'a str,
) -> Result<()> {
    if let Some(other) = taken.insert(resource_slug(value, SLUG_MAX), value) {
        return Err(ValidationError::new(format!(
            "{} '{}' clashes with '{}' once lowercased and '_' replaced by '-'",
            name, value, other
        )));
    }
    Ok(())
}

/// Form of a name embedded in container and image names
///
/// Keeps `[a-z0-9-]` of the first `max` characters, maps everything else
/// to `-` and trims leading and trailing dashes.
pub fn resource_slug(value: &str, max: usize) -> String {
    let cleaned: String = value
        .chars()
        .take(max)
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() { c } else { '-' }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "x".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_env_name(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
