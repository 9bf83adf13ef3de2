use glam::Vec3;
use rustc_hash::FxHashSet;

use crate::error::{SceneErrorContext, SceneResult};
use crate::mutator::{FieldChange, GraphMutator};
use crate::pose::patch::{FieldPatchSet, PoseBatch};
use crate::scene::fields::NodeKind;
use crate::scene::node::{NodeId, NodeKey};

/// Names of fields already written for one node
pub type FieldSet = FxHashSet<String>;

/// Translation of the followed node since the last
/// [`PoseApplier::take_follow_delta`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowDelta {
    pub translation: Vec3,
}

/// Outcome of a pose batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub applied: usize,
    /// Targets that no longer exist
    pub skipped: Vec<NodeId>,
}

struct PreparedPatch {
    key: NodeKey,
    changes: Vec<(String, FieldChange)>,
}

#[derive(Debug, Default)]
pub struct PoseApplier {
    followed: Option<NodeId>,
    follow_delta: Option<Vec3>,
}

impl PoseApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_followed(&mut self, followed: Option<NodeId>) {
        if self.followed != followed {
            self.follow_delta = None;
        }
        self.followed = followed;
    }

    pub fn followed(&self) -> Option<&NodeId> {
        self.followed.as_ref()
    }

    pub fn take_follow_delta(&mut self) -> Option<FollowDelta> {
        self.follow_delta
            .take()
            .map(|translation| FollowDelta { translation })
    }

    /// Apply the fields of `patch` that are not in `already_applied`
    ///
    /// The patch is all-or-nothing: every field is parsed before any is
    /// written. Returns `already_applied` extended with the written fields.
    pub fn apply(
        &mut self,
        mutator: &mut GraphMutator,
        patch: &FieldPatchSet,
        already_applied: &FieldSet,
    ) -> SceneResult<FieldSet> {
        let prepared = prepare(mutator, patch, already_applied)?;
        let mut applied = already_applied.clone();
        applied.extend(prepared.changes.iter().map(|(field, _)| field.clone()));
        self.commit(mutator, &patch.id, prepared)?;
        Ok(applied)
    }

    /// Apply a whole batch; patches for unknown nodes are skipped, any
    /// malformed value rejects the batch before anything is written
    pub fn apply_batch(
        &mut self,
        mutator: &mut GraphMutator,
        batch: &PoseBatch,
    ) -> SceneResult<BatchReport> {
        let mut report = BatchReport::default();
        let mut prepared = Vec::with_capacity(batch.poses.len());
        for patch in &batch.poses {
            match prepare(mutator, patch, &FieldSet::default()) {
                Ok(ready) => prepared.push((&patch.id, ready)),
                Err(error) if error.is_recoverable() => {
                    log::debug!("Skipping pose: {}", error);
                    report.skipped.push(patch.id.clone());
                }
                Err(error) => return Err(error),
            }
        }
        for (id, ready) in prepared {
            self.commit(mutator, id, ready)?;
            report.applied += 1;
        }
        Ok(report)
    }

    fn commit(
        &mut self,
        mutator: &mut GraphMutator,
        id: &NodeId,
        prepared: PreparedPatch,
    ) -> SceneResult<()> {
        let tracks_follow = self.followed.as_ref() == Some(id);
        let before = if tracks_follow {
            translation_of(mutator, prepared.key)
        } else {
            None
        };

        let changes = prepared.changes.into_iter().map(|(_, change)| change).collect();
        mutator.commit_pose(prepared.key, changes)?;

        if let (Some(before), Some(after)) = (before, translation_of(mutator, prepared.key)) {
            let delta = after - before;
            if delta != Vec3::ZERO {
                *self.follow_delta.get_or_insert(Vec3::ZERO) += delta;
            }
        }
        Ok(())
    }
}

fn prepare(
    mutator: &mut GraphMutator,
    patch: &FieldPatchSet,
    already_applied: &FieldSet,
) -> SceneResult<PreparedPatch> {
    let key = mutator
        .store_mut()
        .resolve(&patch.id)
        .or_not_found(&patch.id)?;
    let mut changes = Vec::with_capacity(patch.fields.len());
    for (field, value) in &patch.fields {
        if already_applied.contains(field) {
            continue;
        }
        match mutator.prepare_pose(key, field, value.as_str())? {
            Some(change) => changes.push((field.clone(), change)),
            None => log::trace!("Ignoring field '{}' of {}", field, patch.id),
        }
    }
    Ok(PreparedPatch { key, changes })
}

fn translation_of(mutator: &GraphMutator, key: NodeKey) -> Option<Vec3> {
    match mutator.store().node(key)?.kind() {
        NodeKind::Transform(transform) => Some(transform.translation),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SceneError;
    use crate::parser::NodeDescriptionParser;
    use crate::scene::store::SceneGraphStore;
    use crate::texture::{QueuedTextureLoader, TextureCache};

    fn scene(markup: &str) -> (SceneGraphStore, TextureCache, QueuedTextureLoader) {
        let mut store = SceneGraphStore::new();
        let mut textures = TextureCache::default();
        let mut loader = QueuedTextureLoader::new();
        let nodes = NodeDescriptionParser::parse(markup, &store).unwrap().nodes;
        GraphMutator::new(&mut store, &mut textures, &mut loader, "", 0)
            .insert(None, nodes)
            .unwrap();
        (store, textures, loader)
    }

    fn translation(store: &mut SceneGraphStore, id: &str) -> Vec3 {
        let key = store.resolve(&NodeId::from(id)).unwrap();
        match store.node(key).unwrap().kind() {
            NodeKind::Transform(transform) => transform.translation,
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_already_applied_fields_are_skipped() {
        let (mut store, mut textures, mut loader) =
            scene("<Transform id='n0'><Transform id='n1'/></Transform>");
        let mut applier = PoseApplier::new();
        let mut mutator = GraphMutator::new(&mut store, &mut textures, &mut loader, "", 0);

        let patch = FieldPatchSet::new("n1")
            .with_field("translation", "1 0 0")
            .with_field("scale", "2 2 2");
        let mut already = FieldSet::default();
        already.insert("translation".to_string());

        let applied = applier.apply(&mut mutator, &patch, &already).unwrap();
        assert!(applied.contains("translation"));
        assert!(applied.contains("scale"));
        assert_eq!(translation(&mut store, "n1"), Vec3::ZERO);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let (mut store, mut textures, mut loader) = scene("<Transform id='n0'/>");
        let mut applier = PoseApplier::new();
        let mut mutator = GraphMutator::new(&mut store, &mut textures, &mut loader, "", 0);
        let patch = FieldPatchSet::new("n0")
            .with_field("velocity", "1 2 3")
            .with_field("translation", "0 0 1");
        let applied = applier.apply(&mut mutator, &patch, &FieldSet::default()).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(translation(&mut store, "n0"), Vec3::Z);
    }

    #[test]
    fn test_batch_skips_missing_and_rejects_malformed() {
        let (mut store, mut textures, mut loader) =
            scene("<Transform id='n0'><Transform id='n1'/></Transform>");
        let mut applier = PoseApplier::new();
        let mut mutator = GraphMutator::new(&mut store, &mut textures, &mut loader, "", 0);

        let batch = PoseBatch::from_json(
            r#"[{"id": "n9", "translation": "1 1 1"}, {"id": "n1", "translation": "1 1 1"}]"#,
        )
        .unwrap();
        let report = applier.apply_batch(&mut mutator, &batch).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, vec![NodeId::from("n9")]);

        let batch = PoseBatch::from_json(
            r#"[{"id": "n0", "translation": "5 5 5"}, {"id": "n1", "translation": "x"}]"#,
        )
        .unwrap();
        let err = applier.apply_batch(&mut mutator, &batch).unwrap_err();
        assert!(matches!(err, SceneError::InvalidField { .. }));
        assert_eq!(translation(&mut store, "n0"), Vec3::ZERO);
    }

    #[test]
    fn test_follow_delta_accumulates() {
        let (mut store, mut textures, mut loader) =
            scene("<Transform id='n0'><Transform id='n1' translation='1 0 0'/></Transform>");
        let mut applier = PoseApplier::new();
        applier.set_followed(Some(NodeId::from("n1")));
        let mut mutator = GraphMutator::new(&mut store, &mut textures, &mut loader, "", 0);

        for x in ["2 0 0", "4 0 1"] {
            let patch = FieldPatchSet::new("n1").with_field("translation", x);
            applier.apply(&mut mutator, &patch, &FieldSet::default()).unwrap();
        }
        let patch = FieldPatchSet::new("n0").with_field("translation", "9 9 9");
        applier.apply(&mut mutator, &patch, &FieldSet::default()).unwrap();

        let delta = applier.take_follow_delta().unwrap();
        assert_eq!(delta.translation, Vec3::new(3.0, 0.0, 1.0));
        assert!(applier.take_follow_delta().is_none());
    }
}
