//! Prerecorded animation files
//!
//! ```json
//! {"basicTimeStep": 32, "ids": "1;2", "labelsIds": "",
//!  "frames": [{"time": 0, "poses": [{"id": 1, "translation": "0 0 1"}]}]}
//! ```

use serde::Deserialize;

use crate::constants::animation_constants::{DEFAULT_FRAME_DURATION_MS, ID_LIST_SEPARATOR};
use crate::error::{protocol_error, SceneError, SceneResult};
use crate::network::protocol::Label;
use crate::pose::patch::FieldPatchSet;
use crate::scene::node::NodeId;

fn default_time_step() -> f64 {
    DEFAULT_FRAME_DURATION_MS as f64
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingFile {
    #[serde(default = "default_time_step")]
    basic_time_step: f64,
    #[serde(default)]
    ids: String,
    #[serde(default)]
    labels_ids: String,
    #[serde(default)]
    frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Frame {
    /// Recorded simulation time in milliseconds
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub poses: Vec<FieldPatchSet>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub frame_duration_ms: f64,
    /// Nodes whose fields the recording drives
    pub animated_ids: Vec<NodeId>,
    pub label_ids: Vec<String>,
    pub frames: Vec<Frame>,
}

fn split_ids(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(ID_LIST_SEPARATOR)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

impl Recording {
    pub fn new(frame_duration_ms: f64, frames: Vec<Frame>) -> Self {
        let mut animated_ids: Vec<NodeId> = Vec::new();
        for patch in frames.iter().flat_map(|frame| &frame.poses) {
            if !animated_ids.contains(&patch.id) {
                animated_ids.push(patch.id.clone());
            }
        }
        Self {
            frame_duration_ms,
            animated_ids,
            label_ids: Vec::new(),
            frames,
        }
    }

    pub fn from_json(raw: &str) -> SceneResult<Self> {
        let file: RecordingFile = serde_json::from_str(raw).map_err(SceneError::Json)?;
        if file.basic_time_step <= 0.0 || !file.basic_time_step.is_finite() {
            return Err(protocol_error(format!(
                "invalid basicTimeStep {}",
                file.basic_time_step
            )));
        }

        let mut recording = Self::new(file.basic_time_step, file.frames);
        let listed: Vec<NodeId> = split_ids(&file.ids)
            .map(|id| match id.parse::<u64>() {
                Ok(numeric) => NodeId::from_numeric(numeric),
                Err(_) => NodeId::from(id),
            })
            .collect();
        if !listed.is_empty() {
            for id in recording.animated_ids.drain(..) {
                if !listed.contains(&id) {
                    log::warn!("Recording animates {} which is missing from its id list", id);
                }
            }
            recording.animated_ids = listed;
        }
        recording.label_ids = split_ids(&file.labels_ids).map(str::to_string).collect();
        log::info!(
            "Loaded recording: {} frames, {} animated nodes",
            recording.frames.len(),
            recording.animated_ids.len()
        );
        Ok(recording)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn duration_ms(&self) -> f64 {
        self.frames.len() as f64 * self.frame_duration_ms
    }

    /// Index of the frame shown at `elapsed_ms`, clamped to the last frame
    pub fn frame_index_at(&self, elapsed_ms: f64) -> Option<usize> {
        let last = self.frames.len().checked_sub(1)?;
        let index = (elapsed_ms.max(0.0) / self.frame_duration_ms).floor() as usize;
        Some(index.min(last))
    }

    /// Every field a node is animated on, in first-seen order
    pub fn animated_fields(&self, id: &NodeId) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for patch in self
            .frames
            .iter()
            .flat_map(|frame| &frame.poses)
            .filter(|patch| &patch.id == id)
        {
            for (field, _) in &patch.fields {
                if !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "basicTimeStep": 64,
        "ids": "1;2",
        "frames": [
            {"time": 0, "poses": [{"id": 1, "translation": "0 0 0"}, {"id": 2, "render": "true"}]},
            {"time": 64, "poses": [{"id": 1, "translation": "0 0 1", "rotation": "0 1 0 1"}],
             "labels": [{"id": 3, "text": "hello"}]},
            {"time": 128, "poses": []}
        ]
    }"#;

    #[test]
    fn test_load_sample() {
        let recording = Recording::from_json(SAMPLE).unwrap();
        assert_eq!(recording.len(), 3);
        assert_eq!(recording.frame_duration_ms, 64.0);
        assert_eq!(recording.animated_ids, vec![NodeId::from("n1"), NodeId::from("n2")]);
        assert_eq!(recording.frames[1].labels[0].text, "hello");
        assert_eq!(
            recording.animated_fields(&NodeId::from("n1")),
            vec!["translation".to_string(), "rotation".to_string()]
        );
    }

    #[test]
    fn test_frame_index() {
        let recording = Recording::from_json(SAMPLE).unwrap();
        assert_eq!(recording.frame_index_at(0.0), Some(0));
        assert_eq!(recording.frame_index_at(63.9), Some(0));
        assert_eq!(recording.frame_index_at(64.0), Some(1));
        assert_eq!(recording.frame_index_at(10_000.0), Some(2));
        assert_eq!(recording.duration_ms(), 192.0);

        let empty = Recording::new(32.0, Vec::new());
        assert_eq!(empty.frame_index_at(0.0), None);
    }

    #[test]
    fn test_defaults_and_errors() {
        let recording = Recording::from_json(r#"{"frames": []}"#).unwrap();
        assert_eq!(recording.frame_duration_ms, 32.0);
        assert!(Recording::from_json(r#"{"basicTimeStep": 0, "frames": []}"#).is_err());
        assert!(Recording::from_json("[]").is_err());
    }
}
