//! Named pointer-path expressions.
//!
//! A label file maps human-readable names to resolver expressions so callers
//! can say `hp` instead of `base+1240C,10,A8`. Stored as a flat JSON object.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap {
    labels: BTreeMap<String, String>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Expression registered under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, expr: impl Into<String>) {
        self.labels.insert(name.into(), expr.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.labels.remove(name)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");

        let mut labels = LabelMap::new();
        labels.insert("hp", "base+1240C,10,A8");
        labels.insert("gold", "client.dll+8,30");
        labels.save(&path).unwrap();

        let loaded = LabelMap::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("hp"), Some("base+1240C,10,A8"));
        assert_eq!(loaded.get("missing"), None);
    }

    #[test]
    fn parses_plain_json_object() {
        let labels: LabelMap = serde_json::from_str(r#"{"hp": "base+10"}"#).unwrap();
        assert_eq!(labels.get("hp"), Some("base+10"));
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(LabelMap::load(Path::new("/nonexistent/labels.json")).is_err());
    }
}
