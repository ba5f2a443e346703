//! In-memory resource tree of the simulated gateway.

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Path-keyed JSON representations, e.g. `/15001/65536`.
#[derive(Debug, Default)]
pub(crate) struct ResourceTree {
    resources: BTreeMap<String, Value>,
}

impl ResourceTree {
    pub(crate) fn insert(&mut self, path: impl Into<String>, value: Value) {
        self.resources.insert(path.into(), value);
    }

    pub(crate) fn get(&self, path: &str) -> Option<&Value> {
        self.resources.get(path)
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.resources.contains_key(path)
    }

    /// Numeric identifiers of the direct children of `parent`.
    pub(crate) fn child_ids(&self, parent: &str) -> Vec<u64> {
        let prefix = format!("{}/", parent);
        let mut ids: Vec<u64> = self
            .resources
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .filter_map(|rest| rest.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Merge `update` into the resource at `path`, returning the new
    /// representation, or `None` if the resource does not exist.
    pub(crate) fn merge(&mut self, path: &str, update: &Value) -> Option<Value> {
        let current = self.resources.get_mut(path)?;
        merge_value(current, update);
        Some(current.clone())
    }

    /// Load a fixture: a JSON object mapping resource paths to representations.
    pub(crate) fn load_fixture(&mut self, fixture: &str) -> anyhow::Result<usize> {
        let parsed: Value = serde_json::from_str(fixture).context("fixture is not valid JSON")?;
        let Value::Object(entries) = parsed else {
            bail!("fixture must be a JSON object keyed by resource path");
        };
        let count = entries.len();
        for (path, value) in entries {
            if !path.starts_with('/') {
                bail!("fixture path {:?} must start with '/'", path);
            }
            self.resources.insert(path, value);
        }
        Ok(count)
    }
}

/// Objects merge key by key, arrays of objects merge element-wise, anything
/// else is replaced.
fn merge_value(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => merge_object(target, update),
        (Value::Array(target), Value::Array(update))
            if target.len() >= update.len() && update.iter().all(Value::is_object) =>
        {
            for (slot, patch) in target.iter_mut().zip(update) {
                merge_value(slot, patch);
            }
        }
        (target, update) => *target = update.clone(),
    }
}

fn merge_object(target: &mut Map<String, Value>, update: &Map<String, Value>) {
    for (key, value) in update {
        match target.get_mut(key) {
            Some(existing) => merge_value(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_ids_are_direct_numeric_children() {
        let mut tree = ResourceTree::default();
        tree.insert("/15004/131073", json!({}));
        tree.insert("/15004/131072", json!({}));
        tree.insert("/15005/131072/196608", json!({}));
        tree.insert("/15001/65536", json!({}));

        assert_eq!(tree.child_ids("/15004"), vec![131072, 131073]);
        assert_eq!(tree.child_ids("/15005/131072"), vec![196608]);
        assert!(tree.child_ids("/15005/131073").is_empty());
    }

    #[test]
    fn test_merge_nested_light_control() {
        let mut tree = ResourceTree::default();
        tree.insert(
            "/15001/65536",
            json!({"9001": "Desk", "3311": [{"5850": 0, "5851": 10, "5706": "f1e0b5"}]}),
        );

        let merged = tree
            .merge("/15001/65536", &json!({"3311": [{"5850": 1, "5712": 5}]}))
            .unwrap();
        assert_eq!(
            merged,
            json!({"9001": "Desk", "3311": [{"5850": 1, "5851": 10, "5706": "f1e0b5", "5712": 5}]})
        );
        assert!(tree.merge("/15001/1", &json!({})).is_none());
    }

    #[test]
    fn test_load_fixture() {
        let mut tree = ResourceTree::default();
        let count = tree
            .load_fixture(r#"{"/15004/1": {"9001": "Kitchen"}, "/15004/2": {"9001": "Hall"}}"#)
            .unwrap();
        assert_eq!(count, 2);
        assert!(tree.contains("/15004/2"));

        assert!(tree.load_fixture("[1, 2]").is_err());
        assert!(tree.load_fixture(r#"{"15004/3": {}}"#).is_err());
    }
}
