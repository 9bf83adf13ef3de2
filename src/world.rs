//! One loaded scene: the graph, its textures and the pose applier
//!
//! `SceneWorld` is what the renderer holds on to. It hands out read-only
//! access to the store and raises a redraw flag whenever a directive or a
//! finished texture changed something visible.

use crate::animation::player::PoseTarget;
use crate::config::ViewerConfig;
use crate::error::SceneResult;
use crate::mutator::{check_unique_ids, field_text, DeleteOutcome, GraphMutator};
use crate::parser::NodeDescriptionParser;
use crate::pose::applier::{BatchReport, FieldSet, FollowDelta, PoseApplier};
use crate::pose::patch::{FieldPatchSet, PoseBatch};
use crate::scene::fields::NodeKind;
use crate::scene::node::{NodeDescription, NodeId, NodeKey};
use crate::scene::store::SceneGraphStore;
use crate::texture::{TextureCache, TextureLoader};

pub struct SceneWorld {
    store: SceneGraphStore,
    textures: TextureCache,
    loader: Box<dyn TextureLoader>,
    applier: PoseApplier,
    texture_prefix: String,
    /// Followed node forced by configuration
    follow_override: Option<NodeId>,
    now_ms: u64,
    redraw: bool,
}

impl SceneWorld {
    pub fn new(config: &ViewerConfig, loader: Box<dyn TextureLoader>) -> Self {
        let mut applier = PoseApplier::new();
        applier.set_followed(config.follow_node.clone());
        Self {
            store: SceneGraphStore::new(),
            textures: TextureCache::new(config.texture_timeout_ms),
            loader,
            applier,
            texture_prefix: config.texture_path_prefix.clone(),
            follow_override: config.follow_node.clone(),
            now_ms: 0,
            redraw: false,
        }
    }

    pub fn store(&self) -> &SceneGraphStore {
        &self.store
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    pub fn texture_prefix(&self) -> &str {
        &self.texture_prefix
    }

    /// Applies to textures requested from now on
    pub fn set_texture_prefix(&mut self, prefix: impl Into<String>) {
        self.texture_prefix = prefix.into();
    }

    /// Host clock in milliseconds, used for texture timeouts
    pub fn set_time(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    pub fn followed(&self) -> Option<&NodeId> {
        self.applier.followed()
    }

    pub fn take_follow_delta(&mut self) -> Option<FollowDelta> {
        self.applier.take_follow_delta()
    }

    /// Whether the renderer should draw again; clears the flag
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.redraw)
    }

    pub fn has_pending_textures(&self) -> bool {
        self.textures.has_pending()
    }

    fn parts(&mut self) -> (GraphMutator<'_>, &mut PoseApplier) {
        let mutator = GraphMutator::new(
            &mut self.store,
            &mut self.textures,
            self.loader.as_mut(),
            &self.texture_prefix,
            self.now_ms,
        );
        (mutator, &mut self.applier)
    }

    fn mutator(&mut self) -> GraphMutator<'_> {
        self.parts().0
    }

    /// Parse `markup` and insert it under `parent`, or as the root
    pub fn insert_markup(
        &mut self,
        parent: Option<&NodeId>,
        markup: &str,
    ) -> SceneResult<Vec<NodeKey>> {
        let parsed = NodeDescriptionParser::parse(markup, &self.store)?;
        if !parsed.diagnostics.is_empty() {
            log::debug!("{} node(s) degraded while parsing", parsed.diagnostics.len());
        }
        let keys = self.mutator().insert(parent, parsed.nodes)?;
        self.update_followed(&keys);
        self.redraw = true;
        Ok(keys)
    }

    /// Replace the whole world with the scene in `markup`
    pub fn load_model(&mut self, markup: &str) -> SceneResult<NodeKey> {
        let mut nodes = NodeDescriptionParser::parse(markup, &SceneGraphStore::new())?.nodes;
        let root = if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            nodes
                .into_iter()
                .fold(NodeDescription::new(NodeKind::Scene), NodeDescription::with_child)
        };
        // The old world stays up if the new one cannot be built
        check_unique_ids(std::slice::from_ref(&root))?;

        self.destroy();
        let keys = self.mutator().insert(None, vec![root])?;
        self.update_followed(&keys);
        self.redraw = true;
        log::info!("World loaded with {} nodes", self.store.len());
        Ok(keys[0])
    }

    pub fn delete(&mut self, id: &NodeId) -> SceneResult<DeleteOutcome> {
        let outcome = self.mutator().delete(id)?;
        if outcome == DeleteOutcome::Cleared {
            self.applier.set_followed(self.follow_override.clone());
        }
        self.redraw = true;
        Ok(outcome)
    }

    pub fn apply_batch(&mut self, batch: &PoseBatch) -> SceneResult<BatchReport> {
        let (mut mutator, applier) = self.parts();
        let report = applier.apply_batch(&mut mutator, batch)?;
        if report.applied > 0 {
            self.redraw = true;
        }
        Ok(report)
    }

    /// Drop the scene and every texture; loads still in flight are orphaned
    pub fn destroy(&mut self) {
        self.store.clear();
        // Handles keep counting so a stale completion never matches a new texture
        self.textures.clear();
        self.applier.set_followed(self.follow_override.clone());
        self.redraw = true;
        log::debug!("World destroyed");
    }

    /// Bind finished texture loads; returns whether anything changed
    pub fn poll_textures(&mut self) -> bool {
        let events = self.textures.poll(self.now_ms);
        if events.is_empty() {
            return false;
        }
        let changed = self.mutator().apply_texture_events(&events);
        self.redraw |= changed;
        changed
    }

    fn update_followed(&mut self, inserted: &[NodeKey]) {
        if self.follow_override.is_some() {
            return;
        }
        let followed = inserted
            .iter()
            .flat_map(|&key| self.store.descendants(key))
            .find_map(|key| match self.store.node(key)?.kind() {
                NodeKind::Viewpoint(viewpoint) => Some(viewpoint.followed_id.clone()),
                _ => None,
            });
        if let Some(followed) = followed {
            log::debug!("Viewpoint follows {:?}", followed);
            self.applier.set_followed(followed);
        }
    }
}

impl PoseTarget for SceneWorld {
    fn apply_patch(
        &mut self,
        patch: &FieldPatchSet,
        already_applied: &FieldSet,
    ) -> SceneResult<FieldSet> {
        let (mut mutator, applier) = self.parts();
        let applied = applier.apply(&mut mutator, patch, already_applied)?;
        self.redraw = true;
        Ok(applied)
    }

    fn snapshot(&mut self, id: &NodeId, fields: &[String]) -> Option<FieldPatchSet> {
        let key = self.store.resolve(id)?;
        let node = self.store.node(key)?;
        let snapshot = fields
            .iter()
            .filter_map(|field| field_text(node, field).map(|value| (field, value)))
            .fold(FieldPatchSet::new(id.clone()), |patch, (field, value)| {
                patch.with_field(field, value)
            });
        Some(snapshot)
    }
}
