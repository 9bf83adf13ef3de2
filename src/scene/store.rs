//! Id-indexed scene graph arena
//!
//! Nodes live in a [`SlotMap`] and refer to each other by [`NodeKey`]. Server
//! ids are resolved through a flat cache that is only ever a shortcut: every
//! hit is validated against the arena and a miss falls back to a depth-first
//! walk from the root.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::error::{SceneError, SceneResult};
use crate::scene::node::{Attachment, FieldPath, FieldSlot, Node, NodeDescription, NodeId, NodeKey};

/// Position a detached subtree can be spliced back into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Root,
    Child { parent: NodeKey, index: usize },
    Slot { owner: NodeKey, slot: FieldSlot },
}

/// Lookup counters, reported by the replay tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stale_entries: u64,
}

#[derive(Debug, Default)]
pub struct SceneGraphStore {
    nodes: SlotMap<NodeKey, Node>,
    root: Option<NodeKey>,
    id_cache: FxHashMap<NodeId, NodeKey>,
    /// Definition id -> live USE clones materialized from it
    use_sites: FxHashMap<NodeId, Vec<NodeKey>>,
    stats: StoreStats,
}

impl SceneGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeKey> {
        self.root
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub(crate) fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.nodes
            .get(key)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn slot(&self, key: NodeKey, slot: FieldSlot) -> Option<NodeKey> {
        self.nodes.get(key).and_then(|node| node.slot(slot))
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    fn cache_entry_valid(&self, id: &NodeId, key: NodeKey) -> bool {
        self.nodes
            .get(key)
            .map_or(false, |node| node.id.as_ref() == Some(id))
    }

    /// Resolve an id, populating the cache on a miss
    pub fn resolve(&mut self, id: &NodeId) -> Option<NodeKey> {
        if let Some(&key) = self.id_cache.get(id) {
            if self.cache_entry_valid(id, key) {
                self.stats.cache_hits += 1;
                return Some(key);
            }
            self.stats.stale_entries += 1;
            self.id_cache.remove(id);
        }

        self.stats.cache_misses += 1;
        let key = self.walk_for(id)?;
        self.id_cache.insert(id.clone(), key);
        Some(key)
    }

    /// Non-caching variant of [`resolve`](Self::resolve)
    pub fn lookup(&self, id: &NodeId) -> Option<NodeKey> {
        match self.id_cache.get(id) {
            Some(&key) if self.cache_entry_valid(id, key) => Some(key),
            _ => self.walk_for(id),
        }
    }

    fn walk_for(&self, id: &NodeId) -> Option<NodeKey> {
        let root = self.root?;
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            if node.id.as_ref() == Some(id) {
                return Some(key);
            }
            stack.extend(node.children.iter().rev().copied());
            stack.extend(node.slots.values().copied());
        }
        None
    }

    /// Bind `id` to `key`; fails if the id already names another live node
    pub fn register(&mut self, id: &NodeId, key: NodeKey) -> SceneResult<()> {
        if let Some(existing) = self.lookup(id) {
            if existing != key {
                return Err(SceneError::DuplicateId { id: id.to_string() });
            }
        }
        if let Some(node) = self.nodes.get_mut(key) {
            node.id = Some(id.clone());
        }
        self.id_cache.insert(id.clone(), key);
        Ok(())
    }

    /// Resolve a slot path relative to a node, e.g. `appearance/material`
    ///
    /// Returns the owner of the last slot and the slot itself. The last slot
    /// may be empty; intermediate slots must be occupied.
    pub fn resolve_field(&mut self, id: &NodeId, path: &FieldPath) -> Option<(NodeKey, FieldSlot)> {
        let (&last, intermediate) = path.slots().split_last()?;
        let mut owner = self.resolve(id)?;
        for slot in intermediate {
            owner = self.slot(owner, *slot)?;
        }
        let node = self.nodes.get(owner)?;
        node.kind.accepts_slot(last).then_some((owner, last))
    }

    /// Allocate a detached subtree from a description
    ///
    /// Ids are cached without a collision check; callers validate first.
    /// USE clones anywhere in the subtree are tracked.
    pub(crate) fn build(&mut self, description: &NodeDescription) -> NodeKey {
        let mut node = Node::new(description.kind.clone());
        node.id = description.id.clone();
        node.render = description.render;
        node.use_of = description.use_of.clone();
        let key = self.nodes.insert(node);

        if let Some(id) = &description.id {
            self.id_cache.insert(id.clone(), key);
        }
        if let Some(source) = &description.use_of {
            self.track_use_site(source, key);
        }

        for (slot, value) in &description.slots {
            let value_key = self.build(value);
            self.attach(value_key, Placement::Slot { owner: key, slot: *slot });
        }
        for child in &description.children {
            let child_key = self.build(child);
            let index = self.children(key).len();
            self.attach(child_key, Placement::Child { parent: key, index });
        }
        key
    }

    /// Splice a detached node into the graph
    ///
    /// An occupied slot is overwritten; callers remove the previous occupant
    /// first.
    pub(crate) fn attach(&mut self, key: NodeKey, placement: Placement) {
        let attachment = match placement {
            Placement::Root => {
                self.root = Some(key);
                Attachment::Root
            }
            Placement::Child { parent, index } => {
                let Some(parent_node) = self.nodes.get_mut(parent) else {
                    return;
                };
                let index = index.min(parent_node.children.len());
                parent_node.children.insert(index, key);
                Attachment::Child(parent)
            }
            Placement::Slot { owner, slot } => {
                let Some(owner_node) = self.nodes.get_mut(owner) else {
                    return;
                };
                owner_node.slots.insert(slot, key);
                Attachment::Slot(owner, slot)
            }
        };
        if let Some(node) = self.nodes.get_mut(key) {
            node.attachment = attachment;
        }
    }

    /// Current placement of an attached node
    pub fn placement(&self, key: NodeKey) -> Option<Placement> {
        let node = self.nodes.get(key)?;
        match node.attachment {
            Attachment::Detached => None,
            Attachment::Root => Some(Placement::Root),
            Attachment::Child(parent) => {
                let index = self.children(parent).iter().position(|&child| child == key)?;
                Some(Placement::Child { parent, index })
            }
            Attachment::Slot(owner, slot) => Some(Placement::Slot { owner, slot }),
        }
    }

    /// Unlink a node from its parent, keeping it in the arena
    pub(crate) fn detach(&mut self, key: NodeKey) -> Option<Placement> {
        let placement = self.placement(key)?;
        match placement {
            Placement::Root => self.root = None,
            Placement::Child { parent, index } => {
                if let Some(parent_node) = self.nodes.get_mut(parent) {
                    parent_node.children.remove(index);
                }
            }
            Placement::Slot { owner, slot } => {
                if let Some(owner_node) = self.nodes.get_mut(owner) {
                    owner_node.slots.remove(&slot);
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(key) {
            node.attachment = Attachment::Detached;
        }
        Some(placement)
    }

    /// Detach and free a whole subtree, returning the number of nodes freed
    ///
    /// Cache entries and USE tracking of every freed node are dropped. A
    /// freed definition loses its tracking entry; its clones stay in place as
    /// plain copies.
    pub(crate) fn remove_subtree(&mut self, key: NodeKey) -> usize {
        self.detach(key);
        let doomed = self.descendants(key);
        for &doomed_key in &doomed {
            let Some(node) = self.nodes.remove(doomed_key) else {
                continue;
            };
            if let Some(id) = &node.id {
                if self.id_cache.get(id) == Some(&doomed_key) {
                    self.id_cache.remove(id);
                }
                self.use_sites.remove(id);
            }
            if let Some(source) = &node.use_of {
                self.untrack_use_site(source, doomed_key);
            }
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.id_cache.clear();
        self.use_sites.clear();
    }

    /// Owners from the direct parent up to the root
    pub fn ancestors(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut ancestors = Vec::new();
        let mut current = self.nodes.get(key).and_then(Node::parent);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.nodes.get(parent).and_then(Node::parent);
        }
        ancestors
    }

    /// Pre-order listing of a subtree, the node itself first
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
            stack.extend(node.slots.values().rev().copied());
        }
        out
    }

    pub fn iter_depth_first(&self) -> Vec<NodeKey> {
        self.root.map(|root| self.descendants(root)).unwrap_or_default()
    }

    /// Rebuild a description of a live subtree, ids and USE markers included
    pub fn describe(&self, key: NodeKey) -> Option<NodeDescription> {
        let node = self.nodes.get(key)?;
        let mut description = NodeDescription::new(node.kind.clone());
        description.id = node.id.clone();
        description.render = node.render;
        description.use_of = node.use_of.clone();
        for (slot, value) in node.slots() {
            if let Some(value) = self.describe(value) {
                description.slots.push((slot, value));
            }
        }
        for &child in &node.children {
            if let Some(child) = self.describe(child) {
                description.children.push(child);
            }
        }
        Some(description)
    }

    pub(crate) fn track_use_site(&mut self, definition: &NodeId, site: NodeKey) {
        let sites = self.use_sites.entry(definition.clone()).or_default();
        if !sites.contains(&site) {
            sites.push(site);
        }
    }

    pub(crate) fn untrack_use_site(&mut self, definition: &NodeId, site: NodeKey) {
        if let Some(sites) = self.use_sites.get_mut(definition) {
            sites.retain(|&existing| existing != site);
            if sites.is_empty() {
                self.use_sites.remove(definition);
            }
        }
    }

    /// Live clones materialized from `definition`
    pub fn use_sites(&self, definition: &NodeId) -> &[NodeKey] {
        self.use_sites
            .get(definition)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_tracked(&self, definition: &NodeId) -> bool {
        self.use_sites.contains_key(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::fields::{Geometry, NodeKind, ShapeFields, TransformFields};

    fn transform() -> NodeKind {
        NodeKind::Transform(TransformFields::default())
    }

    fn small_scene() -> (SceneGraphStore, NodeKey) {
        let mut store = SceneGraphStore::new();
        let description = NodeDescription::new(transform())
            .with_id("n0")
            .with_child(
                NodeDescription::new(NodeKind::Shape(ShapeFields::default()))
                    .with_id("n1")
                    .with_slot(
                        FieldSlot::Geometry,
                        NodeDescription::new(NodeKind::Geometry(Geometry::Unknown)).with_id("n2"),
                    )
                    .with_slot(
                        FieldSlot::Appearance,
                        NodeDescription::new(NodeKind::Appearance).with_id("n3"),
                    ),
            )
            .with_child(NodeDescription::new(NodeKind::Group).with_id("n4"));
        let root = store.build(&description);
        store.attach(root, Placement::Root);
        (store, root)
    }

    #[test]
    fn test_resolve_walks_and_caches() {
        let (mut store, _) = small_scene();
        store.id_cache.clear();

        let key = store.resolve(&NodeId::from("n4")).unwrap();
        assert_eq!(store.node(key).unwrap().kind(), &NodeKind::Group);
        assert_eq!(store.stats().cache_misses, 1);

        store.resolve(&NodeId::from("n4"));
        assert_eq!(store.stats().cache_hits, 1);
    }

    #[test]
    fn test_stale_cache_entry_is_revalidated() {
        let (mut store, _) = small_scene();
        let group = store.resolve(&NodeId::from("n4")).unwrap();
        // Point the cache at the wrong node
        store.id_cache.insert(NodeId::from("n1"), group);

        let shape = store.resolve(&NodeId::from("n1")).unwrap();
        assert_ne!(shape, group);
        assert_eq!(store.stats().stale_entries, 1);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let (mut store, _) = small_scene();
        let loose = store.build(&NodeDescription::new(NodeKind::Group));
        let err = store.register(&NodeId::from("n4"), loose).unwrap_err();
        assert!(matches!(err, SceneError::DuplicateId { .. }));

        let group = store.resolve(&NodeId::from("n4")).unwrap();
        assert!(store.register(&NodeId::from("n4"), group).is_ok());
    }

    #[test]
    fn test_resolve_field_paths() {
        let (mut store, _) = small_scene();
        let shape = store.resolve(&NodeId::from("n1")).unwrap();
        let appearance = store.resolve(&NodeId::from("n3")).unwrap();

        let path = FieldPath::parse("appearance").unwrap();
        assert_eq!(
            store.resolve_field(&NodeId::from("n1"), &path),
            Some((shape, FieldSlot::Appearance))
        );

        let path = FieldPath::parse("appearance/material").unwrap();
        assert_eq!(
            store.resolve_field(&NodeId::from("n1"), &path),
            Some((appearance, FieldSlot::Material))
        );

        let path = FieldPath::parse("material").unwrap();
        assert_eq!(store.resolve_field(&NodeId::from("n1"), &path), None);
    }

    #[test]
    fn test_remove_subtree_invalidates_cache() {
        let (mut store, _) = small_scene();
        let shape = store.resolve(&NodeId::from("n1")).unwrap();
        store.resolve(&NodeId::from("n2"));

        let freed = store.remove_subtree(shape);
        assert_eq!(freed, 3);
        assert_eq!(store.len(), 2);
        assert!(store.resolve(&NodeId::from("n1")).is_none());
        assert!(store.resolve(&NodeId::from("n2")).is_none());
        assert!(!store.id_cache.contains_key(&NodeId::from("n2")));
    }

    #[test]
    fn test_child_order_and_placement() {
        let (mut store, root) = small_scene();
        let group = store.resolve(&NodeId::from("n4")).unwrap();
        assert_eq!(
            store.placement(group),
            Some(Placement::Child { parent: root, index: 1 })
        );

        let placement = store.detach(group).unwrap();
        assert_eq!(store.children(root).len(), 1);
        store.attach(group, placement);
        assert_eq!(store.children(root)[1], group);
    }

    #[test]
    fn test_describe_round_trips_structure() {
        let (store, root) = small_scene();
        let description = store.describe(root).unwrap();
        assert_eq!(description.ids().len(), 5);
        assert_eq!(description.children.len(), 2);
        assert!(description.children[0].slot(FieldSlot::Geometry).is_some());
    }

    #[test]
    fn test_use_site_tracking() {
        let (mut store, root) = small_scene();
        let definition = NodeId::from("n4");
        let group = store.resolve(&definition).unwrap();
        let clone = store.describe(group).unwrap().to_use_clone(&definition);
        let clone_key = store.build(&clone);
        store.attach(clone_key, Placement::Child { parent: root, index: 2 });
        assert_eq!(store.use_sites(&definition), &[clone_key]);

        store.remove_subtree(clone_key);
        assert!(!store.is_tracked(&definition));
    }

    #[test]
    fn test_ancestors_include_slot_owners() {
        let (mut store, root) = small_scene();
        let shape = store.resolve(&NodeId::from("n1")).unwrap();
        let geometry = store.resolve(&NodeId::from("n2")).unwrap();
        assert_eq!(store.ancestors(geometry), vec![shape, root]);
    }
}
