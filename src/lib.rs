pub mod animation;
pub mod config;
pub mod constants;
pub mod error;
pub mod mutator;
pub mod network;
pub mod parser;
pub mod pose;
pub mod scene;
pub mod texture;
pub mod world;

#[cfg(feature = "web")]
pub mod web;

pub use animation::{AnimationPlayer, PlayerState, PoseTarget, Recording};
pub use config::ViewerConfig;
pub use error::{ErrorCategory, SceneError, SceneResult};
pub use mutator::{DeleteOutcome, GraphMutator};
pub use network::{Message, MessageOutcome, SceneSession, SessionObserver};
pub use parser::{NodeDescriptionParser, ParsedMessage};
pub use pose::{FieldPatchSet, PoseApplier, PoseBatch};
pub use scene::{
    FieldPath, FieldSlot, Node, NodeDescription, NodeId, NodeKey, NodeKind, SceneGraphStore,
};
pub use texture::{QueuedTextureLoader, TextureCache, TextureLoader};
pub use world::SceneWorld;
