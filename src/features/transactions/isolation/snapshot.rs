use crate::core::node_store::NodeValue;
use std::collections::HashMap;

use super::locks::ResourceId;

/// Values observed by a REPEATABLE READ or SERIALIZABLE transaction.
///
/// `None` records that the resource did not exist when it was observed.
#[derive(Debug, Clone)]
pub struct ReadSnapshot {
    observed: HashMap<ResourceId, Option<NodeValue>>,
}

impl ReadSnapshot {
    pub fn new() -> Self {
        Self {
            observed: HashMap::new(),
        }
    }

    pub fn get(&self, resource: &str) -> Option<&Option<NodeValue>> {
        self.observed.get(resource)
    }

    /// Remember the first observation of `resource`; later calls keep the
    /// original value.
    pub fn observe(&mut self, resource: &str, value: Option<NodeValue>) -> Option<NodeValue> {
        self.observed
            .entry(resource.to_string())
            .or_insert(value)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &Option<NodeValue>)> {
        self.observed.iter()
    }
}

impl Default for ReadSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observe_keeps_first_value() {
        let mut snapshot = ReadSnapshot::new();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.observe("r", Some(json!("1"))), Some(json!("1")));
        assert_eq!(snapshot.observe("missing", None), None);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("r"), Some(&Some(json!("1"))));
        assert_eq!(snapshot.get("missing"), Some(&None));

        // The first observation wins.
        assert_eq!(snapshot.observe("r", Some(json!("2"))), Some(json!("1")));
        assert_eq!(snapshot.observe("new", Some(json!(3))), Some(json!(3)));
        assert_eq!(snapshot.len(), 3);
    }
}
