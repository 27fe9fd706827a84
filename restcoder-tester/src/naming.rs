//! Names of the resources a run creates
//!
//! Every container and image of a run shares a lowercase prefix derived
//! from the submission id and a short random suffix, so concurrent runs of
//! the same submission never collide.

use restcoder_core::validation::{SLUG_MAX, resource_slug};

/// Lowercase alphanumeric random string
pub fn unique_string(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        out.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    out.truncate(len);
    out
}

/// Run prefix, e.g. `1234-x7f3k2`
pub fn name_prefix(submission_id: &str) -> String {
    format!("{}-{}", resource_slug(submission_id, SLUG_MAX), unique_string(6))
}

pub fn setup_container(prefix: &str) -> String {
    format!("setup-{}", prefix)
}

pub fn app_image(prefix: &str) -> String {
    format!("app-image-{}", prefix)
}

pub fn service_container(prefix: &str, service_id: &str) -> String {
    format!("service-{}-{}", prefix, resource_slug(service_id, SLUG_MAX))
}

pub fn app_container(prefix: &str, process_name: &str, instance: u32) -> String {
    format!("app-{}-{}-{}", prefix, resource_slug(process_name, SLUG_MAX), instance)
}

/// Object key of an uploaded log: `YYYY-MM-DD/<random>.log`
pub fn log_key() -> String {
    format!(
        "{}/{}.log",
        chrono::Utc::now().format("%Y-%m-%d"),
        unique_string(20)
    )
}
