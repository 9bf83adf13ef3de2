//! Structural and field mutations of the scene graph
//!
//! Every operation validates its input against the store before touching
//! it, so a failed directive leaves the graph unchanged. Any change below a
//! node that other places `USE` triggers regeneration of those clones.

use glam::{Vec2, Vec3};
use rustc_hash::FxHashSet;

use crate::error::{invalid_field, protocol_error, SceneError, SceneErrorContext, SceneResult};
use crate::parser::values::parse_floats;
use crate::scene::fields::{
    AxisAngle, Color, ColorSpace, Geometry, MaterialFields, NodeKind, TextureBinding,
};
use crate::scene::node::{FieldPath, FieldSlot, Node, NodeDescription, NodeId, NodeKey};
use crate::scene::store::{Placement, SceneGraphStore};
use crate::texture::{
    resolve_url, TextureCache, TextureEvent, TextureKey, TextureLoader, TextureOutcome,
};

/// What `delete` did to the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Subtree detached and freed
    Removed { freed: usize },
    /// Field context replaced by its default value, or emptied
    FieldReset(FieldSlot),
    /// The root was deleted
    Cleared,
}

/// One validated field write, produced by [`GraphMutator::prepare_pose`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    Translation(Vec3),
    Rotation(AxisAngle),
    Scale(Vec3),
    Render(bool),
    WhichChoice(i32),
    On(bool),
    LightColor(Color),
    Intensity(f32),
    DiffuseColor(Color),
    SpecularColor(Color),
    EmissiveColor(Color),
    Shininess(f32),
    Transparency(f32),
    BaseColor(Color),
    Roughness(f32),
    Metalness(f32),
    EmissiveIntensity(f32),
    TextureTranslation(Vec2),
    TextureRotation(f32),
    TextureScale(Vec2),
}

/// Current value of a pose field in the textual form `prepare_pose` reads
pub fn field_text(node: &Node, field: &str) -> Option<String> {
    fn join(values: &[f32]) -> String {
        values
            .iter()
            .map(f32::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
    fn rotation(r: &AxisAngle) -> String {
        join(&[r.axis.x, r.axis.y, r.axis.z, r.angle])
    }

    let text = match (field, node.kind()) {
        ("render", _) => node.render().to_string(),
        ("translation", NodeKind::Transform(t)) => join(&t.translation.to_array()),
        ("rotation", NodeKind::Transform(t)) => rotation(&t.rotation),
        ("scale", NodeKind::Transform(t)) => join(&t.scale.to_array()),
        ("translation", NodeKind::TextureTransform(t)) => join(&t.translation.to_array()),
        ("rotation", NodeKind::TextureTransform(t)) => t.rotation.to_string(),
        ("scale", NodeKind::TextureTransform(t)) => join(&t.scale.to_array()),
        ("whichChoice", NodeKind::Switch { which_choice }) => which_choice.to_string(),
        (
            field,
            NodeKind::DirectionalLight(light)
            | NodeKind::PointLight(light)
            | NodeKind::SpotLight(light),
        ) => match field {
            "on" => light.on.to_string(),
            "color" => join(&light.color.rgb.to_array()),
            "intensity" => light.intensity.to_string(),
            _ => return None,
        },
        (field, NodeKind::Material(material)) => match field {
            "diffuseColor" => join(&material.diffuse_color.rgb.to_array()),
            "specularColor" => join(&material.specular_color.rgb.to_array()),
            "emissiveColor" => join(&material.emissive_color.rgb.to_array()),
            "shininess" => material.shininess.to_string(),
            "transparency" => material.transparency.to_string(),
            _ => return None,
        },
        (field, NodeKind::PbrAppearance(pbr)) => match field {
            "baseColor" => join(&pbr.base_color.rgb.to_array()),
            "emissiveColor" => join(&pbr.emissive_color.rgb.to_array()),
            "transparency" => pbr.transparency.to_string(),
            "roughness" => pbr.roughness.to_string(),
            "metalness" => pbr.metalness.to_string(),
            "emissiveIntensity" => pbr.emissive_intensity.to_string(),
            _ => return None,
        },
        _ => return None,
    };
    Some(text)
}

/// Default occupant of a field slot after its content is deleted
pub fn default_for_slot(slot: FieldSlot) -> Option<NodeDescription> {
    match slot {
        FieldSlot::Appearance => Some(NodeDescription::new(NodeKind::Appearance).with_slot(
            FieldSlot::Material,
            NodeDescription::new(NodeKind::Material(MaterialFields::flat_white())),
        )),
        FieldSlot::Material => Some(NodeDescription::new(NodeKind::Material(
            MaterialFields::flat_white(),
        ))),
        FieldSlot::Geometry => Some(NodeDescription::new(NodeKind::Geometry(Geometry::Unknown))),
        FieldSlot::Texture
        | FieldSlot::TextureTransform
        | FieldSlot::BaseColorMap
        | FieldSlot::RoughnessMap
        | FieldSlot::MetalnessMap
        | FieldSlot::NormalMap
        | FieldSlot::OcclusionMap
        | FieldSlot::EmissiveColorMap => None,
    }
}

/// Reject descriptions that repeat an id among themselves
pub fn check_unique_ids(nodes: &[NodeDescription]) -> SceneResult<()> {
    let mut seen = FxHashSet::default();
    for id in nodes.iter().flat_map(NodeDescription::ids) {
        if !seen.insert(id) {
            return Err(SceneError::DuplicateId { id: id.to_string() });
        }
    }
    Ok(())
}

pub struct GraphMutator<'a> {
    store: &'a mut SceneGraphStore,
    textures: &'a mut TextureCache,
    loader: &'a mut dyn TextureLoader,
    texture_prefix: &'a str,
    now_ms: u64,
}

impl<'a> GraphMutator<'a> {
    pub fn new(
        store: &'a mut SceneGraphStore,
        textures: &'a mut TextureCache,
        loader: &'a mut dyn TextureLoader,
        texture_prefix: &'a str,
        now_ms: u64,
    ) -> Self {
        Self {
            store,
            textures,
            loader,
            texture_prefix,
            now_ms,
        }
    }

    pub fn store(&self) -> &SceneGraphStore {
        self.store
    }

    pub fn store_mut(&mut self) -> &mut SceneGraphStore {
        self.store
    }

    /// Insert parsed nodes under `parent`, or as the root when `parent` is
    /// `None`
    ///
    /// Field holders go into the matching slot of the parent, replacing the
    /// previous occupant; everything else is appended after the last child.
    pub fn insert(
        &mut self,
        parent: Option<&NodeId>,
        nodes: Vec<NodeDescription>,
    ) -> SceneResult<Vec<NodeKey>> {
        let Some(parent_id) = parent else {
            return self.insert_root(nodes);
        };

        let parent_key = self.store.resolve(parent_id).or_not_found(parent_id)?;
        let mut placements = Vec::with_capacity(nodes.len());
        let mut replaced = Vec::new();
        {
            let parent_kind = self.kind(parent_key)?;
            for description in &nodes {
                if description.kind.is_field_holder() {
                    let slot = parent_kind.slot_for_child(&description.kind).ok_or_else(|| {
                        SceneError::InvalidFieldPath {
                            id: parent_id.to_string(),
                            kind: parent_kind.tag().to_string(),
                            field: description.kind.tag().to_string(),
                        }
                    })?;
                    if let Some(occupant) = self.store.slot(parent_key, slot) {
                        replaced.push(occupant);
                    }
                    placements.push(Some(slot));
                } else if parent_kind.is_grouping() {
                    placements.push(None);
                } else {
                    return Err(SceneError::InvalidFieldPath {
                        id: parent_id.to_string(),
                        kind: parent_kind.tag().to_string(),
                        field: description.kind.tag().to_string(),
                    });
                }
            }
        }
        self.check_ids(&nodes, &replaced)?;

        let mut keys = Vec::with_capacity(nodes.len());
        for (description, slot) in nodes.iter().zip(placements) {
            let placement = match slot {
                Some(slot) => {
                    if let Some(occupant) = self.store.slot(parent_key, slot) {
                        self.remove_subtree(occupant);
                    }
                    Placement::Slot {
                        owner: parent_key,
                        slot,
                    }
                }
                None => Placement::Child {
                    parent: parent_key,
                    index: self.store.children(parent_key).len(),
                },
            };
            keys.push(self.materialize(description, placement));
        }
        log::debug!("Inserted {} node(s) under {}", keys.len(), parent_id);

        self.regenerate_aliases(parent_key);
        Ok(keys)
    }

    fn insert_root(&mut self, mut nodes: Vec<NodeDescription>) -> SceneResult<Vec<NodeKey>> {
        if self.store.root().is_some() {
            return Err(SceneError::RootExists);
        }
        if nodes.len() != 1 {
            return Err(protocol_error(format!(
                "a root insert carries exactly one node, got {}",
                nodes.len()
            )));
        }
        self.check_ids(&nodes, &[])?;
        let description = nodes.remove(0);
        let key = self.materialize(&description, Placement::Root);
        log::debug!("Inserted root {}", description.kind.tag());
        Ok(vec![key])
    }

    /// Replace the node in a field slot addressed relative to `id`
    pub fn replace_field(
        &mut self,
        id: &NodeId,
        path: &FieldPath,
        description: NodeDescription,
    ) -> SceneResult<NodeKey> {
        let (owner, slot) = self.resolve_slot(id, path)?;
        let owner_kind = self.kind(owner)?;
        let fits = match owner_kind.slot_for_child(&description.kind) {
            Some(expected) => expected == slot,
            None => slot.is_texture() && matches!(description.kind, NodeKind::ImageTexture(_)),
        };
        if !fits {
            return Err(SceneError::InvalidFieldPath {
                id: id.to_string(),
                kind: owner_kind.tag().to_string(),
                field: format!("{} <- {}", path, description.kind.tag()),
            });
        }

        let replaced: Vec<NodeKey> = self.store.slot(owner, slot).into_iter().collect();
        self.check_ids(std::slice::from_ref(&description), &replaced)?;

        if let Some(occupant) = replaced.first() {
            self.remove_subtree(*occupant);
        }
        let key = self.materialize(&description, Placement::Slot { owner, slot });
        self.regenerate_aliases(owner);
        Ok(key)
    }

    /// Put the default value back into a field slot
    pub fn reset_field(&mut self, id: &NodeId, path: &FieldPath) -> SceneResult<Option<NodeKey>> {
        let (owner, slot) = self.resolve_slot(id, path)?;
        let key = self.reset_slot(owner, slot);
        self.regenerate_aliases(owner);
        Ok(key)
    }

    fn reset_slot(&mut self, owner: NodeKey, slot: FieldSlot) -> Option<NodeKey> {
        if let Some(occupant) = self.store.slot(owner, slot) {
            self.remove_subtree(occupant);
        }
        default_for_slot(slot)
            .map(|description| self.materialize(&description, Placement::Slot { owner, slot }))
    }

    /// Delete a node; a field context falls back to its default instead of
    /// disappearing
    pub fn delete(&mut self, id: &NodeId) -> SceneResult<DeleteOutcome> {
        let key = self.store.resolve(id).or_not_found(id)?;
        match self.store.placement(key) {
            Some(Placement::Root) => {
                log::info!("Root {} deleted, clearing the scene", id);
                self.store.clear();
                self.textures.clear();
                Ok(DeleteOutcome::Cleared)
            }
            Some(Placement::Slot { owner, slot }) => {
                self.reset_slot(owner, slot);
                self.regenerate_aliases(owner);
                Ok(DeleteOutcome::FieldReset(slot))
            }
            Some(Placement::Child { parent, .. }) => {
                let freed = self.remove_subtree(key);
                self.regenerate_aliases(parent);
                Ok(DeleteOutcome::Removed { freed })
            }
            None => {
                let freed = self.remove_subtree(key);
                Ok(DeleteOutcome::Removed { freed })
            }
        }
    }

    /// Parse one pose field for `key`; `None` when the field does not apply
    /// to the node's kind
    pub fn prepare_pose(
        &self,
        key: NodeKey,
        field: &str,
        value: &str,
    ) -> SceneResult<Option<FieldChange>> {
        let kind = self.kind(key)?;
        let tag = kind.tag();
        let floats = |expected: usize| -> SceneResult<Vec<f32>> {
            let values = parse_floats(value).map_err(|message| invalid_field(tag, field, message))?;
            if values.len() != expected {
                return Err(invalid_field(
                    tag,
                    field,
                    format!("expected {} numbers, found {}", expected, values.len()),
                ));
            }
            Ok(values)
        };
        let scalar = || floats(1).map(|values| values[0]);
        let vec2 = || floats(2).map(|v| Vec2::new(v[0], v[1]));
        let vec3 = || floats(3).map(|v| Vec3::new(v[0], v[1], v[2]));
        let color = |space: ColorSpace| vec3().map(|rgb| Color { rgb, space });
        let boolean = || match value.trim() {
            "true" | "TRUE" => Ok(true),
            "false" | "FALSE" => Ok(false),
            other => Err(invalid_field(tag, field, format!("'{}' is not a boolean", other))),
        };

        let change = match (field, kind) {
            ("render", _) => FieldChange::Render(boolean()?),
            ("translation", NodeKind::Transform(_)) => FieldChange::Translation(vec3()?),
            ("rotation", NodeKind::Transform(_)) => {
                let v = floats(4)?;
                FieldChange::Rotation(AxisAngle::new(Vec3::new(v[0], v[1], v[2]), v[3]))
            }
            ("scale", NodeKind::Transform(_)) => FieldChange::Scale(vec3()?),
            ("translation", NodeKind::TextureTransform(_)) => {
                FieldChange::TextureTranslation(vec2()?)
            }
            ("rotation", NodeKind::TextureTransform(_)) => FieldChange::TextureRotation(scalar()?),
            ("scale", NodeKind::TextureTransform(_)) => FieldChange::TextureScale(vec2()?),
            ("whichChoice", NodeKind::Switch { .. }) => {
                let choice = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid_field(tag, field, format!("'{}' is not an integer", value)))?;
                FieldChange::WhichChoice(choice)
            }
            (
                "on",
                NodeKind::DirectionalLight(_) | NodeKind::PointLight(_) | NodeKind::SpotLight(_),
            ) => FieldChange::On(boolean()?),
            (
                "color",
                NodeKind::DirectionalLight(_) | NodeKind::PointLight(_) | NodeKind::SpotLight(_),
            ) => FieldChange::LightColor(color(ColorSpace::Gamma)?),
            (
                "intensity",
                NodeKind::DirectionalLight(_) | NodeKind::PointLight(_) | NodeKind::SpotLight(_),
            ) => FieldChange::Intensity(scalar()?),
            ("diffuseColor", NodeKind::Material(_)) => {
                FieldChange::DiffuseColor(color(ColorSpace::Gamma)?)
            }
            ("specularColor", NodeKind::Material(_)) => {
                FieldChange::SpecularColor(color(ColorSpace::Gamma)?)
            }
            ("emissiveColor", NodeKind::Material(_)) => {
                FieldChange::EmissiveColor(color(ColorSpace::Gamma)?)
            }
            ("emissiveColor", NodeKind::PbrAppearance(_)) => {
                FieldChange::EmissiveColor(color(ColorSpace::Linear)?)
            }
            ("shininess", NodeKind::Material(_)) => FieldChange::Shininess(scalar()?),
            ("transparency", NodeKind::Material(_) | NodeKind::PbrAppearance(_)) => {
                FieldChange::Transparency(scalar()?)
            }
            ("baseColor", NodeKind::PbrAppearance(_)) => {
                FieldChange::BaseColor(color(ColorSpace::Linear)?)
            }
            ("roughness", NodeKind::PbrAppearance(_)) => FieldChange::Roughness(scalar()?),
            ("metalness", NodeKind::PbrAppearance(_)) => FieldChange::Metalness(scalar()?),
            ("emissiveIntensity", NodeKind::PbrAppearance(_)) => {
                FieldChange::EmissiveIntensity(scalar()?)
            }
            _ => return Ok(None),
        };
        Ok(Some(change))
    }

    /// Write prepared changes into a node, then refresh dependent clones and
    /// textures
    pub fn commit_pose(&mut self, key: NodeKey, changes: Vec<FieldChange>) -> SceneResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut texture_transform_changed = false;
        {
            let node = self.store.node_mut(key).ok_or_else(|| protocol_error("pose target vanished"))?;
            for change in changes {
                match (change, &mut node.kind) {
                    (FieldChange::Render(render), _) => node.render = render,
                    (FieldChange::Translation(v), NodeKind::Transform(t)) => t.translation = v,
                    (FieldChange::Rotation(r), NodeKind::Transform(t)) => t.rotation = r,
                    (FieldChange::Scale(v), NodeKind::Transform(t)) => t.scale = v,
                    (FieldChange::WhichChoice(choice), NodeKind::Switch { which_choice }) => {
                        *which_choice = choice
                    }
                    (
                        change,
                        NodeKind::DirectionalLight(light)
                        | NodeKind::PointLight(light)
                        | NodeKind::SpotLight(light),
                    ) => match change {
                        FieldChange::On(on) => light.on = on,
                        FieldChange::LightColor(c) => light.color = c,
                        FieldChange::Intensity(i) => light.intensity = i,
                        _ => {}
                    },
                    (change, NodeKind::Material(material)) => match change {
                        FieldChange::DiffuseColor(c) => material.diffuse_color = c,
                        FieldChange::SpecularColor(c) => material.specular_color = c,
                        FieldChange::EmissiveColor(c) => material.emissive_color = c,
                        FieldChange::Shininess(s) => material.shininess = s,
                        FieldChange::Transparency(t) => material.transparency = t,
                        _ => {}
                    },
                    (change, NodeKind::PbrAppearance(pbr)) => match change {
                        FieldChange::BaseColor(c) => pbr.base_color = c,
                        FieldChange::EmissiveColor(c) => pbr.emissive_color = c,
                        FieldChange::Transparency(t) => pbr.transparency = t,
                        FieldChange::Roughness(r) => pbr.roughness = r,
                        FieldChange::Metalness(m) => pbr.metalness = m,
                        FieldChange::EmissiveIntensity(i) => pbr.emissive_intensity = i,
                        _ => {}
                    },
                    (change, NodeKind::TextureTransform(transform)) => {
                        texture_transform_changed = true;
                        match change {
                            FieldChange::TextureTranslation(v) => transform.translation = v,
                            FieldChange::TextureRotation(r) => transform.rotation = r,
                            FieldChange::TextureScale(v) => transform.scale = v,
                            _ => {}
                        }
                    }
                    (change, kind) => {
                        log::debug!("Ignoring {:?} on {}", change, kind.tag());
                    }
                }
            }
        }

        if texture_transform_changed {
            if let Some(owner) = self.store.node(key).and_then(|node| node.parent()) {
                self.rebind_owner_textures(owner);
            }
        }
        self.regenerate_aliases(key);
        Ok(())
    }

    /// Single-field pose write; `false` when the field does not apply
    pub fn apply_pose(&mut self, id: &NodeId, field: &str, value: &str) -> SceneResult<bool> {
        let key = self.store.resolve(id).or_not_found(id)?;
        match self.prepare_pose(key, field, value)? {
            Some(change) => {
                self.commit_pose(key, vec![change])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Move finished texture loads into the nodes waiting on them; returns
    /// whether anything visible changed
    pub fn apply_texture_events(&mut self, events: &[TextureEvent]) -> bool {
        let mut changed = false;
        for event in events {
            let binding = match &event.outcome {
                TextureOutcome::Loaded => TextureBinding::Ready(event.handle),
                TextureOutcome::Failed(_) => TextureBinding::Failed(event.handle),
                TextureOutcome::TimedOut => continue,
            };
            for &waiter in &event.waiters {
                let Some(node) = self.store.node_mut(waiter) else {
                    continue;
                };
                if let NodeKind::ImageTexture(texture) = &mut node.kind {
                    if texture.binding.handle() == Some(event.handle) {
                        texture.binding = binding;
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    fn kind(&self, key: NodeKey) -> SceneResult<&NodeKind> {
        self.store
            .node(key)
            .map(|node| node.kind())
            .ok_or_else(|| protocol_error("node key is no longer live"))
    }

    fn resolve_slot(&mut self, id: &NodeId, path: &FieldPath) -> SceneResult<(NodeKey, FieldSlot)> {
        let key = self.store.resolve(id).or_not_found(id)?;
        self.store.resolve_field(id, path).ok_or_else(|| {
            let kind = self
                .store
                .node(key)
                .map(|node| node.kind().tag())
                .unwrap_or("?");
            SceneError::InvalidFieldPath {
                id: id.to_string(),
                kind: kind.to_string(),
                field: path.to_string(),
            }
        })
    }

    /// Reject ids that repeat within the batch or name a live node outside
    /// the subtrees about to be replaced
    fn check_ids(&self, nodes: &[NodeDescription], replaced: &[NodeKey]) -> SceneResult<()> {
        let replaced: FxHashSet<NodeKey> = replaced
            .iter()
            .flat_map(|&key| self.store.descendants(key))
            .collect();
        check_unique_ids(nodes)?;
        for id in nodes.iter().flat_map(NodeDescription::ids) {
            if let Some(existing) = self.store.lookup(id) {
                if !replaced.contains(&existing) {
                    return Err(SceneError::DuplicateId { id: id.to_string() });
                }
            }
        }
        Ok(())
    }

    fn materialize(&mut self, description: &NodeDescription, placement: Placement) -> NodeKey {
        let key = self.store.build(description);
        self.store.attach(key, placement);
        self.bind_textures(key);
        key
    }

    /// Free a subtree and stop its textures from notifying it
    fn remove_subtree(&mut self, key: NodeKey) -> usize {
        for node_key in self.store.descendants(key) {
            let kind = self.store.node(node_key).map(Node::kind);
            if let Some(NodeKind::ImageTexture(texture)) = kind {
                if let Some(handle) = texture.binding.handle() {
                    self.textures.release(handle, node_key);
                }
            }
        }
        self.store.remove_subtree(key)
    }

    /// Request the image of every `ImageTexture` in a subtree
    fn bind_textures(&mut self, root: NodeKey) {
        for key in self.store.descendants(root) {
            let Some(node) = self.store.node(key) else {
                continue;
            };
            let NodeKind::ImageTexture(texture) = node.kind() else {
                continue;
            };
            let transform = node.parent().and_then(|owner| {
                let transform_key = self.store.slot(owner, FieldSlot::TextureTransform)?;
                match self.store.node(transform_key)?.kind() {
                    NodeKind::TextureTransform(transform) => Some(transform),
                    _ => None,
                }
            });
            let previous = texture.binding.handle();
            let binding = match texture.urls.first() {
                Some(url) => {
                    let texture_key = TextureKey::new(
                        resolve_url(self.texture_prefix, url),
                        texture,
                        transform,
                    );
                    self.textures
                        .request(texture_key, key, &mut *self.loader, self.now_ms)
                }
                None => TextureBinding::Unbound,
            };

            if let Some(previous) = previous {
                if binding.handle() != Some(previous) {
                    self.textures.release(previous, key);
                }
            }
            if let Some(NodeKind::ImageTexture(texture)) =
                self.store.node_mut(key).map(|node| &mut node.kind)
            {
                texture.binding = binding;
            }
        }
    }

    fn rebind_owner_textures(&mut self, owner: NodeKey) {
        let textures: Vec<NodeKey> = self
            .store
            .node(owner)
            .map(|node| {
                node.slots()
                    .filter(|(slot, _)| slot.is_texture())
                    .map(|(_, key)| key)
                    .collect()
            })
            .unwrap_or_default();
        for texture in textures {
            self.bind_textures(texture);
        }
    }

    /// Regenerate the `USE` clones of `start` and of every ancestor that is
    /// used elsewhere
    pub fn regenerate_aliases(&mut self, start: NodeKey) {
        let mut chain = vec![start];
        chain.extend(self.store.ancestors(start));
        for key in chain {
            let Some(id) = self.store.node(key).and_then(|node| node.id().cloned()) else {
                continue;
            };
            if self.store.is_tracked(&id) {
                self.regenerate_clones_of(&id, key);
            }
        }
    }

    fn regenerate_clones_of(&mut self, id: &NodeId, definition: NodeKey) {
        let Some(description) = self.store.describe(definition) else {
            return;
        };
        let clone = description.to_use_clone(id);
        let inside_definition: FxHashSet<NodeKey> =
            self.store.descendants(definition).into_iter().collect();

        let mut touched_parents = Vec::new();
        for site in self.store.use_sites(id).to_vec() {
            if inside_definition.contains(&site) || !self.store.contains(site) {
                continue;
            }
            let Some(placement) = self.store.placement(site) else {
                continue;
            };
            self.remove_subtree(site);
            self.materialize(&clone, placement);
            match placement {
                Placement::Child { parent, .. } => touched_parents.push(parent),
                Placement::Slot { owner, .. } => touched_parents.push(owner),
                Placement::Root => {}
            }
        }
        log::debug!("Regenerated {} clone(s) of {}", touched_parents.len(), id);

        // Clones may sit inside other definitions that are used elsewhere
        for parent in touched_parents {
            if self.store.contains(parent) {
                self.regenerate_aliases(parent);
            }
        }
    }
}
