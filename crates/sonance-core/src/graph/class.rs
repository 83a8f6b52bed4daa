//! Graph classes - serializable graph blueprints
//!
//! A [`GraphClass`] names its elements by type and arguments and lists the
//! links between them. It can be written as YAML or JSON, hashed for
//! identity, and stamped into any number of independent [`Graph`]s.
//!
//! ```yaml
//! name: tone
//! id: tone-1
//! elements:
//!   - { id: sine, name: sine, type: SineSource, args: { frequency: 440.0, duration_ms: 2000 } }
//!   - { id: gain, name: gain, type: Gain, args: { gain: 0.5 } }
//! links:
//!   - { src_element: sine, src_port: out, dst_element: gain, dst_port: in }
//! output_element: gain
//! output_port: out
//! ```
//!
//! Links and the output refer to elements by name.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{factory, Graph};
use crate::element::{ElementError, ElementResult};
use crate::types::Format;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// An element argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Format(Format),
    /// A nested element, e.g. the source of a proxy
    Element(Box<ElementDesc>),
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<usize> for ArgValue {
    fn from(v: usize) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<f32> for ArgValue {
    fn from(v: f32) -> Self {
        ArgValue::Float(v as f64)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Text(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Text(v)
    }
}

impl From<Format> for ArgValue {
    fn from(v: Format) -> Self {
        ArgValue::Format(v)
    }
}

impl From<ElementDesc> for ArgValue {
    fn from(v: ElementDesc) -> Self {
        ArgValue::Element(Box::new(v))
    }
}

/// One element of a class: factory type name plus arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDesc {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, ArgValue>,
}

impl ElementDesc {
    /// Element whose id and name are both `name`
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            kind: kind.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDesc {
    pub src_element: String,
    #[serde(default = "default_out")]
    pub src_port: String,
    pub dst_element: String,
    #[serde(default = "default_in")]
    pub dst_port: String,
}

fn default_out() -> String {
    "out".to_string()
}

fn default_in() -> String {
    "in".to_string()
}

/// Blueprint of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphClass {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub elements: Vec<ElementDesc>,
    #[serde(default)]
    pub links: Vec<LinkDesc>,
    pub output_element: String,
    #[serde(default = "default_out")]
    pub output_port: String,
}

impl GraphClass {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            elements: Vec::new(),
            links: Vec::new(),
            output_element: String::new(),
            output_port: default_out(),
        }
    }

    pub fn element(mut self, desc: ElementDesc) -> Self {
        self.elements.push(desc);
        self
    }

    pub fn link(
        mut self,
        src_element: impl Into<String>,
        src_port: impl Into<String>,
        dst_element: impl Into<String>,
        dst_port: impl Into<String>,
    ) -> Self {
        self.links.push(LinkDesc {
            src_element: src_element.into(),
            src_port: src_port.into(),
            dst_element: dst_element.into(),
            dst_port: dst_port.into(),
        });
        self
    }

    /// Append `desc` and link the current output into its `in` port
    pub fn then(mut self, desc: ElementDesc) -> Self {
        if !self.output_element.is_empty() {
            let src = std::mem::take(&mut self.output_element);
            let port = std::mem::replace(&mut self.output_port, default_out());
            self = self.link(src, port, desc.name.clone(), default_in());
        }
        self.output_element = desc.name.clone();
        self.elements.push(desc);
        self
    }

    pub fn output(mut self, element: impl Into<String>, port: impl Into<String>) -> Self {
        self.output_element = element.into();
        self.output_port = port.into();
        self
    }

    pub fn find(&self, name: &str) -> Option<&ElementDesc> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Stable 64-bit FNV-1a hash of the canonical JSON form
    pub fn content_hash(&self) -> u64 {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.iter().fold(FNV_OFFSET, |hash, b| {
            (hash ^ *b as u64).wrapping_mul(FNV_PRIME)
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse graph class YAML")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize graph class")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse graph class JSON")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize graph class")
    }

    /// Load from a file, JSON for `.json` and YAML otherwise
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read graph class: {:?}", path))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let class = if is_json {
            Self::from_json(&text)
        } else {
            Self::from_yaml(&text)
        };
        class.with_context(|| format!("Invalid graph class: {:?}", path))
    }

    /// Build a fresh, unprepared graph from this class
    pub fn instantiate(&self) -> ElementResult<Graph> {
        let mut seen = HashSet::new();
        let mut graph = Graph::new(self.id.clone(), self.name.clone());
        for desc in &self.elements {
            if !seen.insert(desc.name.as_str()) {
                return Err(ElementError::invalid_argument(
                    desc.name.as_str(),
                    "name",
                    "used by more than one element",
                ));
            }
            graph.add_boxed(factory::create_element(desc)?);
        }
        for link in &self.links {
            graph.link_named(&link.src_element, &link.src_port, &link.dst_element, &link.dst_port)?;
        }
        let output = graph
            .find(&self.output_element)
            .ok_or_else(|| ElementError::UnknownElement(self.output_element.clone()))?;
        graph.set_output(output, &self.output_port)?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, Status};
    use crate::loader::{IoStrategy, NoResources};
    use crate::types::{Buffer, SampleType};

    fn tone() -> GraphClass {
        GraphClass::new("tone-1", "tone")
            .then(
                ElementDesc::new("sine", "SineSource")
                    .arg("frequency", 440.0)
                    .arg("duration_ms", 100u32)
                    .arg("format", Format::new(SampleType::Int16, 8000, 1)),
            )
            .then(ElementDesc::new("gain", "Gain").arg("gain", 0.5))
    }

    #[test]
    fn test_builder_links_chain() {
        let class = tone();
        assert_eq!(class.links.len(), 1);
        assert_eq!(class.links[0].src_element, "sine");
        assert_eq!(class.links[0].dst_element, "gain");
        assert_eq!(class.output_element, "gain");
    }

    #[test]
    fn test_yaml_and_json_agree() {
        let class = tone();
        let from_yaml = GraphClass::from_yaml(&class.to_yaml().unwrap()).unwrap();
        let from_json = GraphClass::from_json(&class.to_json().unwrap()).unwrap();
        assert_eq!(from_yaml, class);
        assert_eq!(from_json, class);
        assert_eq!(from_yaml.content_hash(), class.content_hash());
    }

    #[test]
    fn test_hash_tracks_content() {
        let a = tone();
        let b = tone().element(ElementDesc::new("spare", "Null"));
        assert_eq!(a.content_hash(), tone().content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_parse_handwritten_yaml() {
        let text = r#"
name: proxied
elements:
  - id: p
    name: proxy
    type: Proxy
    args:
      depth: 3
      source:
        id: s
        name: sine
        type: SineSource
        args: { frequency: 220, duration_ms: 10 }
output_element: proxy
"#;
        let class = GraphClass::from_yaml(text).unwrap();
        assert_eq!(class.output_port, "out");
        let proxy = class.find("proxy").unwrap();
        assert_eq!(proxy.args.get("depth"), Some(&ArgValue::Int(3)));
        match proxy.args.get("source") {
            Some(ArgValue::Element(inner)) => assert_eq!(inner.kind, "SineSource"),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_instances_are_independent() {
        let class = tone();
        let mut a = class.instantiate().unwrap();
        let mut b = class.instantiate().unwrap();
        let format = a.prepare_with(64, &NoResources, IoStrategy::Stream).unwrap();
        b.prepare_with(64, &NoResources, IoStrategy::Stream).unwrap();

        let mut out = Buffer::with_capacity(format, 64);
        while a.render(&mut out, 64).unwrap() == Status::More {}
        assert!(a.is_finished());
        assert!(!b.is_finished());
        assert_eq!(b.render(&mut out, 64).unwrap(), Status::More);
        assert_eq!(out.frame_count(), 64);
        assert_eq!(a.name(), "tone");
    }

    #[test]
    fn test_instantiate_rejects_bad_classes() {
        let dup = tone().element(ElementDesc::new("gain", "Gain"));
        assert!(matches!(dup.instantiate(), Err(ElementError::InvalidArgument { .. })));

        let unknown = tone().element(ElementDesc::new("x", "Theremin"));
        assert!(matches!(unknown.instantiate(), Err(ElementError::UnknownKind(_))));

        let dangling = tone().output("nowhere", "out");
        assert!(matches!(dangling.instantiate(), Err(ElementError::UnknownElement(_))));
    }
}
