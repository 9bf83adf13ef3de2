use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::constants::protocol_constants::NODE_ID_PREFIX;
use crate::scene::fields::NodeKind;

slotmap::new_key_type! {
    /// Stable arena index of a live node
    pub struct NodeKey;
}

/// Identifier assigned by the server (`id` attribute), e.g. `n12`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Pose batches and recordings refer to nodes by number; `12` is `n12`
    pub fn from_numeric(id: u64) -> Self {
        Self(format!("{}{}", NODE_ID_PREFIX, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named sub-object of a node that can be replaced or reset on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldSlot {
    Appearance,
    Geometry,
    Material,
    Texture,
    TextureTransform,
    BaseColorMap,
    RoughnessMap,
    MetalnessMap,
    NormalMap,
    OcclusionMap,
    EmissiveColorMap,
}

impl FieldSlot {
    pub fn name(&self) -> &'static str {
        match self {
            FieldSlot::Appearance => "appearance",
            FieldSlot::Geometry => "geometry",
            FieldSlot::Material => "material",
            FieldSlot::Texture => "texture",
            FieldSlot::TextureTransform => "textureTransform",
            FieldSlot::BaseColorMap => "baseColorMap",
            FieldSlot::RoughnessMap => "roughnessMap",
            FieldSlot::MetalnessMap => "metalnessMap",
            FieldSlot::NormalMap => "normalMap",
            FieldSlot::OcclusionMap => "occlusionMap",
            FieldSlot::EmissiveColorMap => "emissiveColorMap",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let slot = match name {
            "appearance" => FieldSlot::Appearance,
            "geometry" => FieldSlot::Geometry,
            "material" => FieldSlot::Material,
            "texture" => FieldSlot::Texture,
            "textureTransform" => FieldSlot::TextureTransform,
            "baseColorMap" => FieldSlot::BaseColorMap,
            "roughnessMap" => FieldSlot::RoughnessMap,
            "metalnessMap" => FieldSlot::MetalnessMap,
            "normalMap" => FieldSlot::NormalMap,
            "occlusionMap" => FieldSlot::OcclusionMap,
            "emissiveColorMap" => FieldSlot::EmissiveColorMap,
            _ => return None,
        };
        Some(slot)
    }

    /// Slots holding an `ImageTexture`
    pub fn is_texture(&self) -> bool {
        matches!(
            self,
            FieldSlot::Texture
                | FieldSlot::BaseColorMap
                | FieldSlot::RoughnessMap
                | FieldSlot::MetalnessMap
                | FieldSlot::NormalMap
                | FieldSlot::OcclusionMap
                | FieldSlot::EmissiveColorMap
        )
    }
}

impl fmt::Display for FieldSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Path of slots relative to a node, written `appearance/material`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<FieldSlot>);

impl FieldPath {
    pub fn new(slots: Vec<FieldSlot>) -> Self {
        Self(slots)
    }

    pub fn single(slot: FieldSlot) -> Self {
        Self(vec![slot])
    }

    /// Returns `None` for an empty path or an unknown slot name
    pub fn parse(path: &str) -> Option<Self> {
        let slots = path
            .split('/')
            .filter(|part| !part.is_empty())
            .map(FieldSlot::from_name)
            .collect::<Option<Vec<_>>>()?;
        if slots.is_empty() {
            return None;
        }
        Some(Self(slots))
    }

    pub fn slots(&self) -> &[FieldSlot] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(FieldSlot::name).collect();
        f.write_str(&names.join("/"))
    }
}

/// Where a node hangs in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Detached,
    Root,
    Child(NodeKey),
    Slot(NodeKey, FieldSlot),
}

/// Live scene-graph node stored in the arena
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: Option<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) render: bool,
    pub(crate) children: Vec<NodeKey>,
    pub(crate) slots: BTreeMap<FieldSlot, NodeKey>,
    pub(crate) attachment: Attachment,
    pub(crate) use_of: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            id: None,
            kind,
            render: true,
            children: Vec::new(),
            slots: BTreeMap::new(),
            attachment: Attachment::Detached,
            use_of: None,
        }
    }

    pub fn id(&self) -> Option<&NodeId> {
        self.id.as_ref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn render(&self) -> bool {
        self.render
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn slot(&self, slot: FieldSlot) -> Option<NodeKey> {
        self.slots.get(&slot).copied()
    }

    pub fn slots(&self) -> impl Iterator<Item = (FieldSlot, NodeKey)> + '_ {
        self.slots.iter().map(|(slot, key)| (*slot, *key))
    }

    pub fn attachment(&self) -> Attachment {
        self.attachment
    }

    /// Owner of this node, whether it is a child or a field context
    pub fn parent(&self) -> Option<NodeKey> {
        match self.attachment {
            Attachment::Child(parent) | Attachment::Slot(parent, _) => Some(parent),
            Attachment::Root | Attachment::Detached => None,
        }
    }

    /// Id of the definition this node was cloned from, for USE clones
    pub fn use_of(&self) -> Option<&NodeId> {
        self.use_of.as_ref()
    }

    pub fn is_field_context(&self) -> bool {
        matches!(self.attachment, Attachment::Slot(..))
    }
}

/// Parsed node subtree that is not yet part of the store
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescription {
    pub id: Option<NodeId>,
    pub kind: NodeKind,
    pub render: bool,
    pub children: Vec<NodeDescription>,
    pub slots: Vec<(FieldSlot, NodeDescription)>,
    pub use_of: Option<NodeId>,
}

impl NodeDescription {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: None,
            kind,
            render: true,
            children: Vec::new(),
            slots: Vec::new(),
            use_of: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_child(mut self, child: NodeDescription) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_slot(mut self, slot: FieldSlot, value: NodeDescription) -> Self {
        self.set_slot(slot, value);
        self
    }

    /// Later assignments to the same slot win
    pub fn set_slot(&mut self, slot: FieldSlot, value: NodeDescription) {
        self.slots.retain(|(existing, _)| *existing != slot);
        self.slots.push((slot, value));
    }

    pub fn slot(&self, slot: FieldSlot) -> Option<&NodeDescription> {
        self.slots
            .iter()
            .find(|(existing, _)| *existing == slot)
            .map(|(_, value)| value)
    }

    /// Copy materialized at a USE site: ids are stripped so the clone never
    /// collides with its definition
    pub fn to_use_clone(&self, source: &NodeId) -> NodeDescription {
        let mut clone = self.clone();
        clone.strip_ids();
        clone.use_of = Some(source.clone());
        clone
    }

    fn strip_ids(&mut self) {
        self.id = None;
        for child in &mut self.children {
            child.strip_ids();
        }
        for (_, value) in &mut self.slots {
            value.strip_ids();
        }
    }

    /// Every id declared in this subtree, in document order
    pub fn ids(&self) -> Vec<&NodeId> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids<'a>(&'a self, out: &mut Vec<&'a NodeId>) {
        if let Some(id) = &self.id {
            out.push(id);
        }
        for (_, value) in &self.slots {
            value.collect_ids(out);
        }
        for child in &self.children {
            child.collect_ids(out);
        }
    }

    /// Depth-first search for a declared id
    pub fn find(&self, id: &NodeId) -> Option<&NodeDescription> {
        if self.id.as_ref() == Some(id) {
            return Some(self);
        }
        self.slots
            .iter()
            .map(|(_, value)| value)
            .chain(self.children.iter())
            .find_map(|node| node.find(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::fields::{NodeKind, TransformFields};

    #[test]
    fn test_numeric_ids() {
        assert_eq!(NodeId::from_numeric(12).as_str(), "n12");
    }

    #[test]
    fn test_field_path_parse() {
        let path = FieldPath::parse("appearance/material").unwrap();
        assert_eq!(path.slots(), &[FieldSlot::Appearance, FieldSlot::Material]);
        assert_eq!(path.to_string(), "appearance/material");
        assert!(FieldPath::parse("").is_none());
        assert!(FieldPath::parse("appearance/bogus").is_none());
    }

    #[test]
    fn test_use_clone_strips_every_id() {
        let desc = NodeDescription::new(NodeKind::Transform(TransformFields::default()))
            .with_id("n1")
            .with_child(NodeDescription::new(NodeKind::Group).with_id("n2"));
        let clone = desc.to_use_clone(&NodeId::from("n1"));
        assert!(clone.ids().is_empty());
        assert_eq!(clone.use_of, Some(NodeId::from("n1")));
        assert_eq!(desc.ids().len(), 2);
    }

    #[test]
    fn test_set_slot_replaces() {
        let mut desc = NodeDescription::new(NodeKind::Appearance);
        desc.set_slot(FieldSlot::Material, NodeDescription::new(NodeKind::Group));
        desc.set_slot(FieldSlot::Material, NodeDescription::new(NodeKind::Scene));
        assert_eq!(desc.slots.len(), 1);
        assert_eq!(desc.slot(FieldSlot::Material).unwrap().kind, NodeKind::Scene);
    }
}
