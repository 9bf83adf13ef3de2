//! Replay of prerecorded simulation runs

pub mod player;
pub mod recording;

pub use player::{AnimationPlayer, PlayerState, PoseTarget};
pub use recording::{Frame, Recording};
