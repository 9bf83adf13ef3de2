//! Transport message classification
//!
//! Every text frame starts with a type tag. Only node inserts, deletes,
//! world replacement and pose batches touch the scene graph; the other tags
//! are forwarded to collaborators outside the core.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::constants::protocol_constants::*;
use crate::error::{protocol_error, SceneError, SceneResult};
use crate::scene::node::NodeId;

/// Text overlay drawn on top of the 3D view
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Label {
    #[serde(deserialize_with = "label_id")]
    pub id: String,
    pub text: String,
    pub font: String,
    /// Packed RGBA, as sent by the simulator
    pub color: String,
    pub size: f32,
    pub x: f32,
    pub y: f32,
}

fn label_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl Label {
    pub fn from_json(raw: &str) -> SceneResult<Self> {
        serde_json::from_str(raw).map_err(SceneError::Json)
    }
}

/// Classified transport frame, borrowing from the raw text
#[derive(Debug, Clone, PartialEq)]
pub enum Message<'a> {
    /// Insert `markup` under `parent`, or as the root
    Node {
        parent: Option<NodeId>,
        markup: &'a str,
    },
    Delete(NodeId),
    /// Pose batch JSON
    Pose(&'a str),
    /// Destroy the world and load a complete scene
    Model(&'a str),
    TexturePrefix(&'a str),
    Controller(&'a str),
    /// Label JSON
    Label(&'a str),
    Loading { stage: &'a str, percent: Option<f32> },
    SceneLoadCompleted,
    ResetFinished,
    Pause,
    /// Simulation time in milliseconds
    RealTime(f64),
    /// Anything else goes to the console
    Console(&'a str),
}

impl<'a> Message<'a> {
    pub fn classify(raw: &'a str) -> SceneResult<Message<'a>> {
        if let Some(rest) = raw.strip_prefix(NODE_TAG) {
            let (parent, markup) = rest
                .split_once(':')
                .ok_or_else(|| protocol_error("node message without a parent id"))?;
            return Ok(Message::Node {
                parent: parent_id(parent),
                markup,
            });
        }
        if let Some(id) = raw.strip_prefix(DELETE_TAG) {
            let id = id.trim();
            if id.is_empty() {
                return Err(protocol_error("delete message without an id"));
            }
            return Ok(Message::Delete(NodeId::from(id)));
        }
        if let Some(json) = raw.strip_prefix(POSE_TAG) {
            return Ok(Message::Pose(json));
        }
        if let Some(markup) = raw.strip_prefix(MODEL_TAG) {
            return Ok(Message::Model(markup));
        }
        if let Some(prefix) = raw.strip_prefix(TEXTURE_PREFIX_TAG) {
            return Ok(Message::TexturePrefix(prefix.trim()));
        }
        if let Some(file) = raw.strip_prefix(CONTROLLER_TAG) {
            return Ok(Message::Controller(file.trim()));
        }
        if let Some(json) = raw.strip_prefix(LABEL_TAG) {
            return Ok(Message::Label(json));
        }
        if let Some(rest) = raw.strip_prefix(LOADING_TAG) {
            let (stage, percent) = match rest.rsplit_once(':') {
                Some((stage, percent)) => (stage, percent.trim().parse::<f32>().ok()),
                None => (rest, None),
            };
            return Ok(Message::Loading { stage, percent });
        }
        if let Some(time) = raw.strip_prefix(REAL_TIME_TAG) {
            let time = time
                .trim()
                .parse::<f64>()
                .map_err(|_| protocol_error(format!("bad simulation time '{}'", time)))?;
            return Ok(Message::RealTime(time));
        }
        Ok(match raw.trim_end() {
            SCENE_LOAD_COMPLETED => Message::SceneLoadCompleted,
            RESET_FINISHED => Message::ResetFinished,
            PAUSE => Message::Pause,
            _ => Message::Console(raw),
        })
    }

    /// Whether handling this message may change the scene graph
    pub fn mutates_scene(&self) -> bool {
        matches!(
            self,
            Message::Node { .. } | Message::Delete(_) | Message::Pose(_) | Message::Model(_)
        )
    }
}

fn parent_id(raw: &str) -> Option<NodeId> {
    let raw = raw.trim();
    if raw.is_empty() || raw == ROOT_PARENT_ID {
        None
    } else {
        Some(NodeId::from(raw))
    }
}
