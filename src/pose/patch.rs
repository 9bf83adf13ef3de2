//! JSON decoding of pose patches
//!
//! A patch targets one node: `{"id": "n12", "translation": "0 1 0"}`. Ids
//! may be numbers (`12` means `n12`) and values may be strings, numbers,
//! booleans or arrays; everything is normalized to the textual form the
//! field parsers read.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{protocol_error, SceneError, SceneResult};
use crate::scene::node::NodeId;

/// Field value normalized to whitespace separated text
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub struct PatchValue(String);

impl PatchValue {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

impl TryFrom<Value> for PatchValue {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if let Some(text) = scalar_text(&value) {
            return Ok(Self(text));
        }
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| scalar_text(item).ok_or_else(|| format!("unsupported list item {}", item)))
                .collect::<Result<Vec<_>, _>>()
                .map(|parts| Self(parts.join(" "))),
            other => Err(format!("unsupported field value {}", other)),
        }
    }
}

/// Turn a wire id into a [`NodeId`]; bare numbers get the `n` prefix
pub fn node_id_from_value(value: &Value) -> Option<NodeId> {
    match value {
        Value::Number(number) => number.as_u64().map(NodeId::from_numeric),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else if let Ok(numeric) = text.parse::<u64>() {
                Some(NodeId::from_numeric(numeric))
            } else {
                Some(NodeId::from(text))
            }
        }
        _ => None,
    }
}

/// Field updates for one node
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct FieldPatchSet {
    pub id: NodeId,
    pub fields: Vec<(String, PatchValue)>,
}

impl FieldPatchSet {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: &str, value: impl Into<String>) -> Self {
        self.fields.push((field.to_string(), PatchValue::new(value)));
        self
    }

    pub fn field(&self, name: &str) -> Option<&PatchValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

impl TryFrom<Map<String, Value>> for FieldPatchSet {
    type Error = String;

    fn try_from(mut object: Map<String, Value>) -> Result<Self, Self::Error> {
        let id = object
            .remove("id")
            .as_ref()
            .and_then(node_id_from_value)
            .ok_or_else(|| "pose without a usable id".to_string())?;
        let fields = object
            .into_iter()
            .map(|(field, value)| {
                PatchValue::try_from(value)
                    .map(|value| (field.clone(), value))
                    .map_err(|error| format!("{}: {}", field, error))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { id, fields })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchFormat {
    Timed {
        #[serde(default)]
        time: Option<f64>,
        poses: Vec<FieldPatchSet>,
    },
    Bare(Vec<FieldPatchSet>),
}

/// One `application/json:` message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseBatch {
    /// Simulation time in milliseconds, when announced
    pub time: Option<f64>,
    pub poses: Vec<FieldPatchSet>,
}

impl PoseBatch {
    pub fn from_json(raw: &str) -> SceneResult<Self> {
        let value: Value = serde_json::from_str(raw).map_err(SceneError::Json)?;
        let format = BatchFormat::deserialize(value)
            .map_err(|error| protocol_error(format!("malformed pose batch: {}", error)))?;
        Ok(match format {
            BatchFormat::Timed { time, poses } => Self { time, poses },
            BatchFormat::Bare(poses) => Self { time: None, poses },
        })
    }
}
