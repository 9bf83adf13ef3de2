//! Scene graph data model: node kinds, the node arena and id resolution

pub mod fields;
pub mod node;
pub mod store;

pub use fields::{
    AxisAngle, BackgroundFields, BackgroundUrls, Color, ColorSpace, ElevationGrid, FogFields,
    Geometry, ImageTextureFields, IndexedFaceSet, IndexedLineSet, LightFields, MaterialFields,
    NodeKind, PbrFields, PointSet, ShapeFields, TextureBinding, TextureRole,
    TextureTransformFields, TransformFields, ViewpointFields, WorldInfoFields,
};
pub use node::{Attachment, FieldPath, FieldSlot, Node, NodeDescription, NodeId, NodeKey};
pub use store::{Placement, SceneGraphStore, StoreStats};
