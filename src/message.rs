//! Message parts and batches.
//!
//! A [`Part`] is a single unit of data moving through the toolkit: a raw
//! payload, a metadata table, and an optional structured (parsed JSON) view.
//! Whichever representation a part was constructed from is authoritative; the
//! other is derived lazily and cached, so codec readers can hand out
//! structured parts without paying for serialisation until someone asks for
//! bytes, and vice versa.

use crate::value::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A single message part.
#[derive(Debug, Default)]
pub struct Part {
    bytes: OnceLock<Vec<u8>>,
    structured: OnceLock<Result<Value, String>>,
    metadata: HashMap<String, String>,
}

impl Part {
    /// A part backed by a raw payload.
    pub fn new(bytes: Vec<u8>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(bytes);
        Part {
            bytes: cell,
            structured: OnceLock::new(),
            metadata: HashMap::new(),
        }
    }

    /// A part backed by an already-structured value.
    pub fn from_structured(value: Value) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Ok(value));
        Part {
            bytes: OnceLock::new(),
            structured: cell,
            metadata: HashMap::new(),
        }
    }

    /// The raw payload, rendering the structured view as JSON if the part was
    /// never given bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.get_or_init(|| match self.structured.get() {
            Some(Ok(v)) => v.to_json().to_string().into_bytes(),
            _ => Vec::new(),
        })
    }

    /// The structured view, parsing the payload as JSON on first access.
    pub fn structured(&self) -> Result<&Value, String> {
        self.structured
            .get_or_init(|| {
                let raw = self.bytes.get().map(Vec::as_slice).unwrap_or_default();
                serde_json::from_slice::<serde_json::Value>(raw)
                    .map(Value::from_json)
                    .map_err(|e| format!("invalid JSON document: {e}"))
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.metadata
    }

    /// Builder-style metadata assignment.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An ordered batch of message parts.
#[derive(Debug, Default)]
pub struct MessageBatch {
    parts: Vec<Part>,
}

impl MessageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter()
    }
}

impl From<Vec<Part>> for MessageBatch {
    fn from(parts: Vec<Part>) -> Self {
        MessageBatch { parts }
    }
}

impl FromIterator<Part> for MessageBatch {
    fn from_iter<T: IntoIterator<Item = Part>>(iter: T) -> Self {
        MessageBatch {
            parts: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Number;
    use serde_json::json;

    #[test]
    fn raw_part_parses_lazily() {
        let part = Part::new(br#"{"foo":12}"#.to_vec());
        let v = part.structured().unwrap();
        let Value::Object(fields) = v else {
            panic!("expected object")
        };
        assert!(matches!(fields["foo"], Value::Number(Number::Int(12))));
    }

    #[test]
    fn structured_part_renders_bytes() {
        let part = Part::from_structured(Value::from_json(json!({"a": true})));
        assert_eq!(part.as_bytes(), br#"{"a":true}"#);
    }

    #[test]
    fn bad_json_reports_once() {
        let part = Part::new(b"not json".to_vec());
        assert!(part.structured().is_err());
        assert!(part.structured().is_err());
    }
}
