// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node types.

mod basic;

pub use basic::{Constant, Delay, Merge, Relay, Sink, Start};

use crate::error::{GraphError, Result};
use crate::node::Operator;
use crate::registry::{NodeCategory, NodeRegistry, NodeType};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Node type whose params deserialize into the operator itself
fn node_type<T>(name: &str, category: NodeCategory, description: &str) -> NodeType
where
    T: Operator + Default + DeserializeOwned,
{
    let class = T::default().class().to_string();
    let tag = class.clone();
    NodeType::new(class, category, move |params: &Value| -> Result<Box<dyn Operator>> {
        let operator = if params.is_null() {
            T::default()
        } else {
            serde_json::from_value::<T>(params.clone()).map_err(|e| GraphError::InvalidParams {
                class: tag.clone(),
                reason: e.to_string(),
            })?
        };
        Ok(Box::new(operator))
    })
    .with_name(name)
    .with_description(description)
}

/// Create a registry holding every built-in node type
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    // Flow
    registry.register(node_type::<Start>(
        "Start",
        NodeCategory::Flow,
        "Entry point, fires its exec output",
    ));
    registry.register(node_type::<Delay>(
        "Delay",
        NodeCategory::Flow,
        "Waits, then forwards its input",
    ));

    // Data
    registry.register(node_type::<Constant>(
        "Constant",
        NodeCategory::Data,
        "Emits a fixed value",
    ));
    registry.register(node_type::<Merge>(
        "Merge",
        NodeCategory::Data,
        "Combines two inputs into a list",
    ));

    // Utility
    registry.register(node_type::<Relay>(
        "Relay",
        NodeCategory::Utility,
        "Forwards its input unchanged",
    ));
    registry.register(node_type::<Sink>(
        "Sink",
        NodeCategory::Utility,
        "Logs the value it receives",
    ));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), 6);
        for class in ["Start", "Delay", "Constant", "Merge", "Relay", "Sink"] {
            assert!(registry.contains(class), "{class} missing");
        }
        assert_eq!(registry.types_in_category(NodeCategory::Flow).count(), 2);
    }

    #[test]
    fn test_params_reach_operator() {
        let registry = builtin_registry();
        let node = registry
            .create_node("Constant", Some("c"), &json!({ "value": [1, 2] }))
            .unwrap();
        assert_eq!(node.params(), json!({ "value": [1, 2] }));

        let node = registry
            .create_node("Delay", None, &json!({ "millis": 25 }))
            .unwrap();
        assert_eq!(node.params(), json!({ "millis": 25 }));
    }

    #[test]
    fn test_bad_params() {
        let registry = builtin_registry();
        let err = registry
            .create_node("Delay", None, &json!({ "millis": "soon" }))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidParams { class, .. } if class == "Delay"));
    }
}
