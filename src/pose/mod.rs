//! Per-step pose updates: JSON patch decoding and application

pub mod applier;
pub mod patch;

pub use applier::{BatchReport, FieldSet, FollowDelta, PoseApplier};
pub use patch::{FieldPatchSet, PatchValue, PoseBatch};
