// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flow, data and utility operators.

use crate::error::{NodeError, Result};
use crate::node::{Operator, Pins};
use crate::pin::{Pin, PinKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Entry node, writes its class tag to `exec`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Start;

#[async_trait]
impl Operator for Start {
    fn class(&self) -> &str {
        "Start"
    }

    fn declare(&self, pins: &mut Pins) -> Result<()> {
        pins.declare("exec", Pin::output().with_kind(PinKind::Exec))?;
        Ok(())
    }

    async fn execute(&self, pins: &mut Pins) -> std::result::Result<(), NodeError> {
        pins.set_value("exec", self.class())
    }
}

/// Emits a fixed value on `value`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constant {
    /// The emitted value
    pub value: Value,
}

impl Constant {
    /// Create a constant node operator
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl Operator for Constant {
    fn class(&self) -> &str {
        "Constant"
    }

    fn declare(&self, pins: &mut Pins) -> Result<()> {
        pins.output("value")?;
        Ok(())
    }

    fn params(&self) -> Value {
        json!({ "value": self.value })
    }

    async fn execute(&self, pins: &mut Pins) -> std::result::Result<(), NodeError> {
        pins.set_value("value", self.value.clone())
    }
}

/// Copies `input` to `output`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Relay;

#[async_trait]
impl Operator for Relay {
    fn class(&self) -> &str {
        "Relay"
    }

    fn declare(&self, pins: &mut Pins) -> Result<()> {
        pins.input("input")?;
        pins.output("output")?;
        Ok(())
    }

    async fn execute(&self, pins: &mut Pins) -> std::result::Result<(), NodeError> {
        let value = pins.require("input")?.clone();
        pins.set_value("output", value)
    }
}

/// Sleeps for `millis`, then copies `input` to `output`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Delay {
    /// Sleep duration in milliseconds
    pub millis: u64,
}

impl Delay {
    /// Create a delay operator
    pub fn new(duration: Duration) -> Self {
        Self {
            millis: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[async_trait]
impl Operator for Delay {
    fn class(&self) -> &str {
        "Delay"
    }

    fn declare(&self, pins: &mut Pins) -> Result<()> {
        pins.input("input")?;
        pins.output("output")?;
        Ok(())
    }

    fn params(&self) -> Value {
        json!({ "millis": self.millis })
    }

    async fn execute(&self, pins: &mut Pins) -> std::result::Result<(), NodeError> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        let value = pins.value("input").cloned().unwrap_or_default();
        pins.set_value("output", value)
    }
}

/// Writes `[a, b]` to `merged`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Merge;

#[async_trait]
impl Operator for Merge {
    fn class(&self) -> &str {
        "Merge"
    }

    fn declare(&self, pins: &mut Pins) -> Result<()> {
        pins.input("a")?;
        pins.input("b")?;
        pins.output("merged")?;
        Ok(())
    }

    async fn execute(&self, pins: &mut Pins) -> std::result::Result<(), NodeError> {
        let a = pins.value("a").cloned().unwrap_or_default();
        let b = pins.value("b").cloned().unwrap_or_default();
        pins.set_value("merged", json!([a, b]))
    }
}

/// Logs whatever arrives on `input`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Sink;

#[async_trait]
impl Operator for Sink {
    fn class(&self) -> &str {
        "Sink"
    }

    fn declare(&self, pins: &mut Pins) -> Result<()> {
        pins.input("input")?;
        Ok(())
    }

    async fn execute(&self, pins: &mut Pins) -> std::result::Result<(), NodeError> {
        let value = pins.value("input").cloned().unwrap_or_default();
        tracing::info!("Sink received {}", value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    async fn run(node: &Node, inputs: &[(&str, Value)]) -> std::result::Result<Pins, NodeError> {
        let mut pins = node.pins().clone();
        for (name, value) in inputs {
            pins.set_value(name, value.clone())?;
        }
        node.operator().execute(&mut pins).await?;
        Ok(pins)
    }

    #[tokio::test]
    async fn test_start_emits_class() {
        let node = Node::new(None, Start).unwrap();
        assert_eq!(node.pin("exec").unwrap().kind, PinKind::Exec);
        let pins = run(&node, &[]).await.unwrap();
        assert_eq!(pins.value("exec"), Some(&json!("Start")));
    }

    #[tokio::test]
    async fn test_relay_requires_input() {
        let node = Node::new(None, Relay).unwrap();
        let err = run(&node, &[]).await.unwrap_err();
        assert!(matches!(err, NodeError::MissingInput(p) if p == "input"));

        let pins = run(&node, &[("input", json!("x"))]).await.unwrap();
        assert_eq!(pins.value("output"), Some(&json!("x")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_sleeps_then_relays() {
        let node = Node::new(None, Delay::new(Duration::from_secs(5))).unwrap();
        let started = tokio::time::Instant::now();
        let pins = run(&node, &[("input", json!(1))]).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(pins.value("output"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_merge_and_sink() {
        let merge = Node::new(None, Merge).unwrap();
        let pins = run(&merge, &[("a", json!(1)), ("b", json!("two"))]).await.unwrap();
        assert_eq!(pins.value("merged"), Some(&json!([1, "two"])));

        let sink = Node::new(None, Sink).unwrap();
        run(&sink, &[("input", json!(true))]).await.unwrap();
    }
}
