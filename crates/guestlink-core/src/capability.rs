use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// One node of the host-negotiated capability tree.
///
/// On the wire a subtree is a JSON object and a leaf is normally a boolean,
/// e.g. `{"geoLocation": {"map": {}}, "calendar": false}`. Other scalars are
/// read by truthiness: `null`, `0` and `""` are disabled, anything else is
/// enabled. An odd value for one feature never rejects the whole tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CapabilityNode {
    Leaf(bool),
    Node(BTreeMap<String, CapabilityNode>),
}

impl<'de> Deserialize<'de> for CapabilityNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = CapabilityNode;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a capability flag or a map of sub-capabilities")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(CapabilityNode::Leaf(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(CapabilityNode::Leaf(v != 0))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(CapabilityNode::Leaf(v != 0))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(CapabilityNode::Leaf(v != 0.0 && !v.is_nan()))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(CapabilityNode::Leaf(!v.is_empty()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CapabilityNode::Leaf(false))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CapabilityNode::Leaf(false))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        CapabilityNode::deserialize(deserializer)
    }

    // Arrays carry no sub-capabilities but are still a present, truthy value.
    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(CapabilityNode::Leaf(true))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut children = BTreeMap::new();
        while let Some((name, child)) = map.next_entry::<String, CapabilityNode>()? {
            children.insert(name, child);
        }
        Ok(CapabilityNode::Node(children))
    }
}

impl CapabilityNode {
    /// An empty subtree: nothing below the root is supported.
    pub fn empty() -> Self {
        CapabilityNode::Node(BTreeMap::new())
    }

    /// Walk `path` from this node.
    ///
    /// Returns false as soon as a segment is missing or a leaf is reached with
    /// segments left over. At the end of the path a `true` leaf or any subtree
    /// counts as enabled.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> bool {
        let mut node = self;
        for segment in path {
            match node {
                CapabilityNode::Node(children) => match children.get(segment.as_ref()) {
                    Some(child) => node = child,
                    None => return false,
                },
                CapabilityNode::Leaf(_) => return false,
            }
        }
        match node {
            CapabilityNode::Leaf(enabled) => *enabled,
            CapabilityNode::Node(_) => true,
        }
    }
}

/// Registry of capabilities the host declared during the handshake.
///
/// Populated exactly once; every lookup before that reports "unsupported".
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    root: OnceLock<CapabilityNode>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the negotiated tree. Returns false (and leaves the registry
    /// untouched) if a tree was already stored.
    pub fn negotiate(&self, root: CapabilityNode) -> bool {
        match self.root.set(root) {
            Ok(()) => {
                tracing::debug!("Capability tree negotiated");
                true
            }
            Err(_) => {
                tracing::warn!("Capability tree already negotiated, ignoring new descriptor");
                false
            }
        }
    }

    pub fn is_negotiated(&self) -> bool {
        self.root.get().is_some()
    }

    /// Whether the feature at `path` is enabled. Never fails: absence,
    /// an empty path and an un-negotiated registry all mean "unsupported".
    pub fn supports<S: AsRef<str>>(&self, path: &[S]) -> bool {
        if path.is_empty() {
            return false;
        }
        self.root.get().is_some_and(|root| root.lookup(path))
    }

    /// `supports` for a dotted path such as `"geoLocation.map"`.
    pub fn supports_dotted(&self, path: &str) -> bool {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        self.supports(&segments)
    }

    /// The negotiated tree, if any.
    pub fn snapshot(&self) -> Option<&CapabilityNode> {
        self.root.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(json: serde_json::Value) -> CapabilityRegistry {
        let registry = CapabilityRegistry::new();
        registry.negotiate(serde_json::from_value(json).unwrap());
        registry
    }

    #[test]
    fn unnegotiated_registry_supports_nothing() {
        let registry = CapabilityRegistry::new();
        assert!(!registry.supports(&["geoLocation"]));
        assert!(!registry.is_negotiated());
    }

    #[test]
    fn missing_segment_is_unsupported() {
        let registry = registry(serde_json::json!({"geoLocation": {"map": {}}}));
        assert!(!registry.supports(&["calendar"]));
        assert!(!registry.supports(&["geoLocation", "compass"]));
    }

    #[test]
    fn leaf_before_end_of_path_is_unsupported() {
        let registry = registry(serde_json::json!({"a": true}));
        assert!(registry.supports(&["a"]));
        assert!(!registry.supports(&["a", "b"]));
    }

    #[test]
    fn leaf_values_decide_at_end_of_path() {
        let registry = registry(serde_json::json!({"a": {"b": true, "c": false}}));
        assert!(registry.supports(&["a", "b"]));
        assert!(!registry.supports(&["a", "c"]));
    }

    #[test]
    fn subtree_at_end_of_path_is_enabled() {
        let registry = registry(serde_json::json!({"geoLocation": {"map": {}}}));
        assert!(registry.supports(&["geoLocation"]));
        assert!(registry.supports(&["geoLocation", "map"]));
        assert!(registry.supports_dotted("geoLocation.map"));
    }

    #[test]
    fn parent_enabled_while_child_disabled() {
        let registry = registry(serde_json::json!({"geoLocation": {"map": false}}));
        assert!(registry.supports(&["geoLocation"]));
        assert!(!registry.supports(&["geoLocation", "map"]));
    }

    #[test]
    fn empty_path_is_unsupported() {
        let registry = registry(serde_json::json!({"a": true}));
        let empty: [&str; 0] = [];
        assert!(!registry.supports(&empty));
        assert!(!registry.supports_dotted(""));
    }

    #[test]
    fn second_negotiation_is_ignored() {
        let registry = registry(serde_json::json!({"a": true}));
        let replaced = registry.negotiate(CapabilityNode::empty());

        assert!(!replaced);
        assert!(registry.supports(&["a"]));
    }

    #[test]
    fn non_boolean_leaves_read_by_truthiness() {
        let registry = registry(serde_json::json!({
            "geoLocation": {"map": {}},
            "calendar": null,
            "mail": 1,
            "chat": 0,
            "stage": "",
            "pages": "enabled",
            "teams": []
        }));
        assert!(registry.supports(&["geoLocation", "map"]));
        assert!(!registry.supports(&["calendar"]));
        assert!(registry.supports(&["mail"]));
        assert!(!registry.supports(&["chat"]));
        assert!(!registry.supports(&["stage"]));
        assert!(registry.supports(&["pages"]));
        assert!(registry.supports(&["teams"]));
        assert!(!registry.supports(&["mail", "inbox"]));
    }
}
