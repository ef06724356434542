//! Minimal label selector matching for the mock store
//!
//! Supports the equality subset the engine uses: `k=v`, `k==v`, `k!=v`,
//! `k` (exists) and `!k` (does not exist), comma separated.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub(crate) fn parse(raw: &str) -> Self {
        let requirements = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                if let Some((k, v)) = part.split_once("!=") {
                    Requirement::NotEquals(k.trim().to_string(), v.trim().to_string())
                } else if let Some((k, v)) = part.split_once("==") {
                    Requirement::Equals(k.trim().to_string(), v.trim().to_string())
                } else if let Some((k, v)) = part.split_once('=') {
                    Requirement::Equals(k.trim().to_string(), v.trim().to_string())
                } else if let Some(k) = part.strip_prefix('!') {
                    Requirement::NotExists(k.trim().to_string())
                } else {
                    Requirement::Exists(part.to_string())
                }
            })
            .collect();
        Self { requirements }
    }

    pub(crate) fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        })
    }
}
