//! Declarative test case files
//!
//! A test case is a directory of JSON files. Each file holds an ordered list
//! of tests; a test is an ordered list of HTTP operations with expectations
//! on the response. `${NAME}` placeholders in URLs, headers and bodies are
//! resolved from the application's test environment before anything runs.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fault in the test case itself, not in the code under test
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0} is not configured")]
    MissingEnv(String),

    #[error("unterminated placeholder in '{0}'")]
    Unterminated(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestFile {
    pub tests: Vec<TestDefinition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestDefinition {
    pub name: String,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Operation {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    /// How many times the operation is issued; each issue counts separately
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    #[serde(default)]
    pub expect: Expectation,
}

/// Checks applied to a response, in field order
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Expectation {
    pub status: Option<u16>,
    /// Exact body text
    pub text: Option<String>,
    /// Deep-equal JSON body
    pub json: Option<Value>,
    /// Substring of the body
    pub contains: Option<String>,
}

impl Expectation {
    /// Number of assertions the expectation makes
    pub fn count(&self) -> usize {
        [
            self.status.is_some(),
            self.text.is_some(),
            self.json.is_some(),
            self.contains.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_repeat() -> u32 {
    1
}

/// Loads every test of the given files, in file order
pub fn load(files: &[PathBuf]) -> Result<Vec<TestDefinition>, DefinitionError> {
    let mut tests = Vec::new();
    for path in files {
        tests.extend(load_file(path)?.tests);
    }
    Ok(tests)
}

fn load_file(path: &Path) -> Result<TestFile, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| DefinitionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Replaces every `${NAME}` in the tests with its value from `env`
pub fn resolve(
    tests: Vec<TestDefinition>,
    env: &BTreeMap<String, String>,
) -> Result<Vec<TestDefinition>, DefinitionError> {
    tests
        .into_iter()
        .map(|mut test| {
            for op in &mut test.operations {
                op.url = substitute(&op.url, env)?;
                for value in op.headers.values_mut() {
                    *value = substitute(value, env)?;
                }
                if let Some(body) = op.body.as_mut() {
                    substitute_value(body, env)?;
                }
            }
            Ok(test)
        })
        .collect()
}

fn substitute_value(value: &mut Value, env: &BTreeMap<String, String>) -> Result<(), DefinitionError> {
    match value {
        Value::String(s) => *s = substitute(s, env)?,
        Value::Array(items) => {
            for item in items {
                substitute_value(item, env)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_value(item, env)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Expands `${NAME}` placeholders in one string
pub fn substitute(input: &str, env: &BTreeMap<String, String>) -> Result<String, DefinitionError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| DefinitionError::Unterminated(input.to_string()))?;
        let name = &after[..end];
        let value = env
            .get(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DefinitionError::MissingEnv(name.to_string()))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Test files of a test case directory, sorted by name
pub fn case_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("API_URL".to_string(), "http://10.0.0.1:40000".to_string());
        env.insert("TOKEN".to_string(), "secret".to_string());
        env.insert("EMPTY".to_string(), String::new());
        env
    }

    #[test]
    fn test_substitute() {
        assert_eq!(
            substitute("${API_URL}/hello", &env()).unwrap(),
            "http://10.0.0.1:40000/hello"
        );
        assert_eq!(substitute("no placeholders", &env()).unwrap(), "no placeholders");
        assert_eq!(
            substitute("${TOKEN}-${TOKEN}", &env()).unwrap(),
            "secret-secret"
        );
    }

    #[test]
    fn test_missing_variable_is_reported_by_name() {
        let err = substitute("${API_URL_1}/x", &env()).unwrap_err();
        assert_eq!(err.to_string(), "API_URL_1 is not configured");

        let err = substitute("${EMPTY}", &env()).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingEnv(_)));

        let err = substitute("${API_URL", &env()).unwrap_err();
        assert!(matches!(err, DefinitionError::Unterminated(_)));
    }

    #[test]
    fn test_parse_and_resolve() {
        let file: TestFile = serde_json::from_value(json!({
            "tests": [{
                "name": "TEST 1",
                "operations": [{
                    "method": "POST",
                    "url": "${API_URL}/todos",
                    "headers": {"authorization": "Bearer ${TOKEN}"},
                    "body": {"name": "item ${TOKEN}", "tags": ["${TOKEN}", 1]},
                    "repeat": 2,
                    "expect": {"status": 201, "json": {"id": 1}}
                }, {
                    "url": "${API_URL}/todos"
                }]
            }]
        }))
        .unwrap();

        let tests = resolve(file.tests, &env()).unwrap();
        let op = &tests[0].operations[0];
        assert_eq!(op.url, "http://10.0.0.1:40000/todos");
        assert_eq!(op.headers["authorization"], "Bearer secret");
        assert_eq!(op.body, Some(json!({"name": "item secret", "tags": ["secret", 1]})));
        assert_eq!(op.repeat, 2);
        assert_eq!(op.expect.count(), 2);

        let second = &tests[0].operations[1];
        assert_eq!(second.method, "GET");
        assert_eq!(second.repeat, 1);
        assert_eq!(second.expect.count(), 0);
    }

    #[test]
    fn test_case_files_are_sorted_json_only() {
        let dir = std::env::temp_dir().join(format!("restcoder-case-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.json", "a.json", "notes.txt"] {
            std::fs::write(dir.join(name), "{\"tests\": []}").unwrap();
        }

        let files = case_files(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
        assert!(load(&files).unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = std::env::temp_dir().join(format!("restcoder-case-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load(&[path]).unwrap_err();
        assert!(matches!(err, DefinitionError::Parse { .. }));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
