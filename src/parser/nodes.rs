//! Node-description parser
//!
//! Turns markup into [`NodeDescription`] trees. Parsing never touches the
//! store beyond read-only `USE` lookups, so a message that fails to parse
//! leaves the scene exactly as it was.

use glam::{Vec2, Vec3};
use rustc_hash::FxHashMap;

use crate::constants::field_defaults as defaults;
use crate::constants::texture_constants::DEFAULT_ANISOTROPY;
use crate::error::{invalid_field, unsupported_field, SceneError, SceneResult};
use crate::parser::markup::{parse_markup, Element};
use crate::parser::values::Attributes;
use crate::scene::fields::{
    BackgroundFields, BackgroundUrls, Color, ColorSpace, ElevationGrid, FogFields, Geometry,
    ImageTextureFields, IndexedFaceSet, IndexedLineSet, LightFields, MaterialFields, NodeKind,
    PbrFields, PointSet, ShapeFields, TextureBinding, TextureRole, TextureTransformFields,
    TransformFields, ViewpointFields, WorldInfoFields,
};
use crate::scene::node::{NodeDescription, NodeId};
use crate::scene::store::SceneGraphStore;

/// Result of parsing one message
#[derive(Debug, Default)]
pub struct ParsedMessage {
    pub nodes: Vec<NodeDescription>,
    /// Non-fatal problems: skipped field holders, unsupported geometry
    pub diagnostics: Vec<SceneError>,
}

/// Tags that produce scene nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownTag {
    Scene,
    Group,
    Transform,
    Switch,
    Shape,
    DirectionalLight,
    PointLight,
    SpotLight,
    Box,
    Cone,
    Cylinder,
    Sphere,
    Plane,
    IndexedFaceSet,
    IndexedLineSet,
    ElevationGrid,
    PointSet,
    Appearance,
    Material,
    PbrAppearance,
    ImageTexture,
    TextureTransform,
    Background,
    Viewpoint,
    Fog,
    WorldInfo,
}

impl KnownTag {
    fn from_tag(tag: &str) -> Option<Self> {
        let known = match tag {
            "Scene" => KnownTag::Scene,
            "Group" => KnownTag::Group,
            "Transform" => KnownTag::Transform,
            "Switch" => KnownTag::Switch,
            "Shape" => KnownTag::Shape,
            "DirectionalLight" => KnownTag::DirectionalLight,
            "PointLight" => KnownTag::PointLight,
            "SpotLight" => KnownTag::SpotLight,
            "Box" => KnownTag::Box,
            "Cone" => KnownTag::Cone,
            "Cylinder" => KnownTag::Cylinder,
            "Sphere" => KnownTag::Sphere,
            "Plane" => KnownTag::Plane,
            "IndexedFaceSet" => KnownTag::IndexedFaceSet,
            "IndexedLineSet" => KnownTag::IndexedLineSet,
            "ElevationGrid" => KnownTag::ElevationGrid,
            "PointSet" => KnownTag::PointSet,
            "Appearance" => KnownTag::Appearance,
            "Material" => KnownTag::Material,
            "PBRAppearance" => KnownTag::PbrAppearance,
            "ImageTexture" => KnownTag::ImageTexture,
            "TextureTransform" => KnownTag::TextureTransform,
            "Background" => KnownTag::Background,
            "Viewpoint" => KnownTag::Viewpoint,
            "Fog" => KnownTag::Fog,
            "WorldInfo" => KnownTag::WorldInfo,
            _ => return None,
        };
        Some(known)
    }

    fn name(&self) -> &'static str {
        match self {
            KnownTag::Scene => "Scene",
            KnownTag::Group => "Group",
            KnownTag::Transform => "Transform",
            KnownTag::Switch => "Switch",
            KnownTag::Shape => "Shape",
            KnownTag::DirectionalLight => "DirectionalLight",
            KnownTag::PointLight => "PointLight",
            KnownTag::SpotLight => "SpotLight",
            KnownTag::Box => "Box",
            KnownTag::Cone => "Cone",
            KnownTag::Cylinder => "Cylinder",
            KnownTag::Sphere => "Sphere",
            KnownTag::Plane => "Plane",
            KnownTag::IndexedFaceSet => "IndexedFaceSet",
            KnownTag::IndexedLineSet => "IndexedLineSet",
            KnownTag::ElevationGrid => "ElevationGrid",
            KnownTag::PointSet => "PointSet",
            KnownTag::Appearance => "Appearance",
            KnownTag::Material => "Material",
            KnownTag::PbrAppearance => "PBRAppearance",
            KnownTag::ImageTexture => "ImageTexture",
            KnownTag::TextureTransform => "TextureTransform",
            KnownTag::Background => "Background",
            KnownTag::Viewpoint => "Viewpoint",
            KnownTag::Fog => "Fog",
            KnownTag::WorldInfo => "WorldInfo",
        }
    }
}

/// Geometry data children shared by id within one message
#[derive(Debug, Clone)]
enum DataNode {
    Points(Vec<Vec3>),
    TexCoords(Vec<Vec2>),
    Colors(Vec<Color>),
}

pub struct NodeDescriptionParser<'s> {
    store: &'s SceneGraphStore,
    /// Ids completed earlier in the same message, for `USE`
    defined: FxHashMap<NodeId, NodeDescription>,
    data: FxHashMap<String, DataNode>,
    diagnostics: Vec<SceneError>,
}

impl<'s> NodeDescriptionParser<'s> {
    pub fn new(store: &'s SceneGraphStore) -> Self {
        Self {
            store,
            defined: FxHashMap::default(),
            data: FxHashMap::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Parse a whole message against the current store
    pub fn parse(raw: &str, store: &'s SceneGraphStore) -> SceneResult<ParsedMessage> {
        let elements = parse_markup(raw)?;
        let mut parser = Self::new(store);
        let mut nodes = Vec::new();
        for element in &elements {
            nodes.extend(parser.parse_element(element)?);
        }
        Ok(ParsedMessage {
            nodes,
            diagnostics: parser.diagnostics,
        })
    }

    fn diagnose(&mut self, diagnostic: SceneError) {
        log::warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    /// Parse one element; unknown tags yield their flattened children
    fn parse_element(&mut self, element: &Element) -> SceneResult<Vec<NodeDescription>> {
        let Some(tag) = KnownTag::from_tag(&element.tag) else {
            log::debug!("Ignoring unknown tag <{}>", element.tag);
            let mut flattened = Vec::new();
            for child in &element.children {
                flattened.extend(self.parse_element(child)?);
            }
            return Ok(flattened);
        };

        if let Some(source) = element.attribute("USE") {
            return Ok(vec![self.resolve_use(&NodeId::from(source))?]);
        }

        let attributes = Attributes::new(tag.name(), element);
        let kind = self.parse_kind(tag, element, &attributes)?;
        let mut description = NodeDescription::new(kind);
        description.id = element
            .attribute("id")
            .or_else(|| element.attribute("DEF"))
            .map(NodeId::from);
        description.render = attributes.bool("render", true)?;

        if !matches!(description.kind, NodeKind::Geometry(_)) {
            self.parse_children(element, &mut description)?;
        }

        if let Some(id) = &description.id {
            self.defined.insert(id.clone(), description.clone());
        }
        Ok(vec![description])
    }

    fn resolve_use(&self, source: &NodeId) -> SceneResult<NodeDescription> {
        if let Some(definition) = self.defined.get(source) {
            return Ok(definition.to_use_clone(source));
        }
        self.store
            .lookup(source)
            .and_then(|key| self.store.describe(key))
            .map(|definition| definition.to_use_clone(source))
            .ok_or_else(|| SceneError::UnresolvedUse {
                id: source.to_string(),
            })
    }

    fn parse_children(&mut self, element: &Element, parent: &mut NodeDescription) -> SceneResult<()> {
        for child in &element.children {
            for description in self.parse_element(child)? {
                if description.kind.is_field_holder() {
                    match parent.kind.slot_for_child(&description.kind) {
                        Some(slot) => parent.set_slot(slot, description),
                        None => self.diagnose(unsupported_field(
                            parent.kind.tag(),
                            description.kind.tag(),
                            "no matching field slot, node skipped",
                        )),
                    }
                } else if parent.kind.is_grouping() {
                    parent.children.push(description);
                } else {
                    self.diagnose(unsupported_field(
                        parent.kind.tag(),
                        description.kind.tag(),
                        "node cannot have children, node skipped",
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_kind(
        &mut self,
        tag: KnownTag,
        element: &Element,
        attributes: &Attributes,
    ) -> SceneResult<NodeKind> {
        let kind = match tag {
            KnownTag::Scene => NodeKind::Scene,
            KnownTag::Group => NodeKind::Group,
            KnownTag::Transform => NodeKind::Transform(TransformFields {
                translation: attributes.vec3("translation", Vec3::ZERO)?,
                rotation: attributes.rotation("rotation")?,
                scale: attributes.vec3("scale", Vec3::ONE)?,
            }),
            KnownTag::Switch => NodeKind::Switch {
                which_choice: attributes.i32("whichChoice", -1)?,
            },
            KnownTag::Shape => NodeKind::Shape(ShapeFields {
                cast_shadows: attributes.bool("castShadows", false)?,
                is_pickable: attributes.bool("isPickable", true)?,
            }),
            KnownTag::DirectionalLight => NodeKind::DirectionalLight(parse_light(attributes)?),
            KnownTag::PointLight => NodeKind::PointLight(parse_light(attributes)?),
            KnownTag::SpotLight => NodeKind::SpotLight(parse_light(attributes)?),
            KnownTag::Box => NodeKind::Geometry(Geometry::Box {
                size: attributes.vec3("size", Vec3::from_array(defaults::BOX_SIZE))?,
            }),
            KnownTag::Cone => NodeKind::Geometry(Geometry::Cone {
                bottom_radius: attributes.f32("bottomRadius", defaults::CONE_BOTTOM_RADIUS)?,
                height: attributes.f32("height", defaults::CONE_HEIGHT)?,
                side: attributes.bool("side", true)?,
                bottom: attributes.bool("bottom", true)?,
                subdivision: attributes.u32("subdivision", defaults::ROUND_SUBDIVISION)?,
            }),
            KnownTag::Cylinder => NodeKind::Geometry(Geometry::Cylinder {
                radius: attributes.f32("radius", defaults::CYLINDER_RADIUS)?,
                height: attributes.f32("height", defaults::CYLINDER_HEIGHT)?,
                bottom: attributes.bool("bottom", true)?,
                side: attributes.bool("side", true)?,
                top: attributes.bool("top", true)?,
                subdivision: attributes.u32("subdivision", defaults::ROUND_SUBDIVISION)?,
            }),
            KnownTag::Sphere => NodeKind::Geometry(Geometry::Sphere {
                radius: attributes.f32("radius", defaults::SPHERE_RADIUS)?,
                subdivision: attributes.u32("subdivision", defaults::SPHERE_SUBDIVISION)?,
                ico: attributes.bool("ico", true)?,
            }),
            KnownTag::Plane => NodeKind::Geometry(Geometry::Plane {
                size: attributes.vec2("size", Vec2::from_array(defaults::PLANE_SIZE))?,
            }),
            KnownTag::IndexedFaceSet => {
                NodeKind::Geometry(self.parse_indexed_face_set(element, attributes)?)
            }
            KnownTag::IndexedLineSet => {
                NodeKind::Geometry(self.parse_indexed_line_set(element, attributes)?)
            }
            KnownTag::ElevationGrid => NodeKind::Geometry(self.parse_elevation_grid(attributes)?),
            KnownTag::PointSet => NodeKind::Geometry(self.parse_point_set(element)?),
            KnownTag::Appearance => NodeKind::Appearance,
            KnownTag::Material => NodeKind::Material(MaterialFields {
                diffuse_color: attributes.color(
                    "diffuseColor",
                    defaults::MATERIAL_DIFFUSE,
                    ColorSpace::Gamma,
                )?,
                specular_color: attributes.color("specularColor", [0.0; 3], ColorSpace::Gamma)?,
                emissive_color: attributes.color("emissiveColor", [0.0; 3], ColorSpace::Gamma)?,
                shininess: attributes.f32("shininess", defaults::MATERIAL_SHININESS)?,
                transparency: attributes.f32("transparency", 0.0)?,
                ambient_intensity: attributes
                    .f32("ambientIntensity", defaults::MATERIAL_AMBIENT_INTENSITY)?,
            }),
            KnownTag::PbrAppearance => NodeKind::PbrAppearance(PbrFields {
                base_color: attributes.color(
                    "baseColor",
                    defaults::PBR_BASE_COLOR,
                    ColorSpace::Linear,
                )?,
                roughness: attributes.f32("roughness", 0.0)?,
                metalness: attributes.f32("metalness", defaults::PBR_METALNESS)?,
                emissive_color: attributes.color("emissiveColor", [0.0; 3], ColorSpace::Linear)?,
                emissive_intensity: attributes.f32("emissiveIntensity", 1.0)?,
                transparency: attributes.f32("transparency", 0.0)?,
                ibl_strength: attributes.f32("IBLStrength", 1.0)?,
                normal_map_factor: attributes.f32("normalMapFactor", 1.0)?,
                occlusion_map_strength: attributes.f32("occlusionMapStrength", 1.0)?,
            }),
            KnownTag::ImageTexture => NodeKind::ImageTexture(parse_image_texture(attributes)?),
            KnownTag::TextureTransform => NodeKind::TextureTransform(TextureTransformFields {
                center: attributes.vec2("center", Vec2::ZERO)?,
                rotation: attributes.f32("rotation", 0.0)?,
                scale: attributes.vec2("scale", Vec2::ONE)?,
                translation: attributes.vec2("translation", Vec2::ZERO)?,
            }),
            KnownTag::Background => NodeKind::Background(BackgroundFields {
                sky_color: attributes.color("skyColor", [0.0; 3], ColorSpace::Gamma)?,
                luminosity: attributes.f32("luminosity", 1.0)?,
                urls: BackgroundUrls {
                    back: attributes.string_list("backUrl"),
                    bottom: attributes.string_list("bottomUrl"),
                    front: attributes.string_list("frontUrl"),
                    left: attributes.string_list("leftUrl"),
                    right: attributes.string_list("rightUrl"),
                    top: attributes.string_list("topUrl"),
                },
            }),
            KnownTag::Viewpoint => NodeKind::Viewpoint(ViewpointFields {
                position: attributes
                    .vec3("position", Vec3::from_array(defaults::VIEWPOINT_POSITION))?,
                orientation: attributes.rotation("orientation")?,
                field_of_view: attributes
                    .f32("fieldOfView", defaults::VIEWPOINT_FIELD_OF_VIEW)?,
                near: attributes.f32("near", defaults::VIEWPOINT_NEAR)?,
                far: attributes.f32("far", 0.0)?,
                followed_id: attributes
                    .string("followedId")
                    .filter(|id| !id.is_empty())
                    .map(NodeId::from),
                follow_type: attributes.string_or("followType", defaults::VIEWPOINT_FOLLOW_TYPE),
            }),
            KnownTag::Fog => NodeKind::Fog(FogFields {
                color: attributes.color("color", [1.0; 3], ColorSpace::Gamma)?,
                visibility_range: attributes.f32("visibilityRange", 0.0)?,
                fog_type: attributes.string_or("fogType", defaults::FOG_TYPE),
            }),
            KnownTag::WorldInfo => NodeKind::WorldInfo(WorldInfoFields {
                title: attributes.string_or("title", ""),
                window: attributes.string_or("window", ""),
                basic_time_step: attributes
                    .f32("basicTimeStep", defaults::WORLD_BASIC_TIME_STEP)?,
                coordinate_system: attributes
                    .string_or("coordinateSystem", defaults::WORLD_COORDINATE_SYSTEM),
            }),
        };
        Ok(kind)
    }

    /// Read a geometry data child (`Coordinate`, `Normal`, ...), following
    /// `USE` references to data defined earlier in the message
    fn data_child(
        &mut self,
        geometry: &'static str,
        element: &Element,
        tag: &str,
        field: &str,
    ) -> SceneResult<Option<DataNode>> {
        let Some(child) = element.children.iter().find(|child| child.tag == tag) else {
            return Ok(None);
        };
        if let Some(source) = child.attribute("USE") {
            return match self.data.get(source) {
                Some(data) => Ok(Some(data.clone())),
                None => {
                    self.diagnose(unsupported_field(
                        geometry,
                        tag,
                        format!("USE of '{}' outside the defining message", source),
                    ));
                    Ok(None)
                }
            };
        }

        let attributes = Attributes::new(geometry, child);
        let data = match tag {
            "TextureCoordinate" => DataNode::TexCoords(attributes.vec2_list(field)?),
            "Color" => DataNode::Colors(
                attributes
                    .vec3_list(field)?
                    .into_iter()
                    .map(Color::gamma)
                    .collect(),
            ),
            _ => DataNode::Points(attributes.vec3_list(field)?),
        };
        if let Some(id) = child.attribute("id").or_else(|| child.attribute("DEF")) {
            self.data.insert(id.to_string(), data.clone());
        }
        Ok(Some(data))
    }

    fn points(
        &mut self,
        geometry: &'static str,
        element: &Element,
        tag: &str,
        field: &str,
    ) -> SceneResult<Option<Vec<Vec3>>> {
        Ok(match self.data_child(geometry, element, tag, field)? {
            Some(DataNode::Points(points)) => Some(points),
            _ => None,
        })
    }

    fn parse_indexed_face_set(
        &mut self,
        element: &Element,
        attributes: &Attributes,
    ) -> SceneResult<Geometry> {
        const KIND: &str = "IndexedFaceSet";
        let coord_index = attributes.i32_list("coordIndex")?.unwrap_or_default();
        let normal_index = attributes.i32_list("normalIndex")?;
        let tex_coord_index = attributes.i32_list("texCoordIndex")?;

        let Some(coords) = self.points(KIND, element, "Coordinate", "point")? else {
            return Ok(Geometry::Unknown);
        };
        let normals = self.points(KIND, element, "Normal", "vector")?.unwrap_or_default();
        let tex_coords = match self.data_child(KIND, element, "TextureCoordinate", "point")? {
            Some(DataNode::TexCoords(points)) => points,
            _ => Vec::new(),
        };

        let polygons = split_polygons(&coord_index);
        if let Err(index) = check_range(&polygons, coords.len()) {
            self.diagnose(unsupported_field(
                KIND,
                "coordIndex",
                format!("index {} out of range of {} coordinates", index, coords.len()),
            ));
            return Ok(Geometry::Unknown);
        }

        let normal_triangles =
            self.secondary_triangles(KIND, "normalIndex", normal_index, &polygons, normals.len());
        let tex_coord_triangles = self.secondary_triangles(
            KIND,
            "texCoordIndex",
            tex_coord_index,
            &polygons,
            tex_coords.len(),
        );

        Ok(Geometry::IndexedFaceSet(IndexedFaceSet {
            triangles: triangulate(&polygons),
            coords,
            normals,
            tex_coords,
            normal_triangles,
            tex_coord_triangles,
            ccw: attributes.bool("ccw", true)?,
            solid: attributes.bool("solid", true)?,
            crease_angle: attributes.f32("creaseAngle", 0.0)?,
        }))
    }

    /// Triangles of a per-corner index list that must mirror `coordIndex`;
    /// a mismatch drops the list
    fn secondary_triangles(
        &mut self,
        kind: &'static str,
        field: &'static str,
        index: Option<Vec<i32>>,
        coord_polygons: &[Vec<u32>],
        available: usize,
    ) -> Option<Vec<[u32; 3]>> {
        let index = index?;
        let polygons = split_polygons(&index);
        let same_structure = polygons.len() == coord_polygons.len()
            && polygons
                .iter()
                .zip(coord_polygons)
                .all(|(a, b)| a.len() == b.len());
        if !same_structure {
            self.diagnose(unsupported_field(
                kind,
                field,
                "face structure differs from coordIndex, ignored",
            ));
            return None;
        }
        if let Err(bad) = check_range(&polygons, available) {
            self.diagnose(unsupported_field(
                kind,
                field,
                format!("index {} out of range of {} values, ignored", bad, available),
            ));
            return None;
        }
        Some(triangulate(&polygons))
    }

    fn parse_indexed_line_set(
        &mut self,
        element: &Element,
        attributes: &Attributes,
    ) -> SceneResult<Geometry> {
        const KIND: &str = "IndexedLineSet";
        let coord_index = attributes.i32_list("coordIndex")?.unwrap_or_default();
        let Some(coords) = self.points(KIND, element, "Coordinate", "point")? else {
            return Ok(Geometry::Unknown);
        };
        let polylines: Vec<Vec<u32>> = split_polygons(&coord_index)
            .into_iter()
            .filter(|line| line.len() >= 2)
            .collect();
        if let Err(index) = check_range(&polylines, coords.len()) {
            self.diagnose(unsupported_field(
                KIND,
                "coordIndex",
                format!("index {} out of range of {} coordinates", index, coords.len()),
            ));
            return Ok(Geometry::Unknown);
        }
        Ok(Geometry::IndexedLineSet(IndexedLineSet { coords, polylines }))
    }

    fn parse_elevation_grid(&mut self, attributes: &Attributes) -> SceneResult<Geometry> {
        let grid = ElevationGrid {
            heights: attributes.f32_list("height")?,
            x_dimension: attributes.u32("xDimension", 0)?,
            z_dimension: attributes.u32("zDimension", 0)?,
            x_spacing: attributes.f32("xSpacing", defaults::ELEVATION_SPACING)?,
            z_spacing: attributes.f32("zSpacing", defaults::ELEVATION_SPACING)?,
            thickness: attributes.f32("thickness", defaults::ELEVATION_THICKNESS)?,
        };
        let expected = grid.x_dimension as usize * grid.z_dimension as usize;
        if grid.heights.len() < expected {
            self.diagnose(unsupported_field(
                "ElevationGrid",
                "height",
                format!("{} heights for a {} point grid", grid.heights.len(), expected),
            ));
            return Ok(Geometry::Unknown);
        }
        Ok(Geometry::ElevationGrid(grid))
    }

    fn parse_point_set(&mut self, element: &Element) -> SceneResult<Geometry> {
        const KIND: &str = "PointSet";
        let Some(coords) = self.points(KIND, element, "Coordinate", "point")? else {
            return Ok(Geometry::Unknown);
        };
        let colors = match self.data_child(KIND, element, "Color", "color")? {
            Some(DataNode::Colors(colors)) => colors,
            _ => Vec::new(),
        };
        Ok(Geometry::PointSet(PointSet { coords, colors }))
    }
}

fn parse_light(attributes: &Attributes) -> SceneResult<LightFields> {
    Ok(LightFields {
        on: attributes.bool("on", true)?,
        color: attributes.color("color", defaults::LIGHT_COLOR, ColorSpace::Gamma)?,
        intensity: attributes.f32("intensity", 1.0)?,
        ambient_intensity: attributes.f32("ambientIntensity", 0.0)?,
        cast_shadows: attributes.bool("castShadows", false)?,
        direction: attributes.vec3("direction", Vec3::from_array(defaults::LIGHT_DIRECTION))?,
        location: attributes.vec3("location", Vec3::ZERO)?,
        attenuation: attributes
            .vec3("attenuation", Vec3::from_array(defaults::LIGHT_ATTENUATION))?,
        radius: attributes.f32("radius", defaults::LIGHT_RADIUS)?,
        beam_width: attributes.f32("beamWidth", defaults::SPOT_BEAM_WIDTH)?,
        cut_off_angle: attributes.f32("cutOffAngle", defaults::SPOT_CUT_OFF_ANGLE)?,
    })
}

fn parse_image_texture(attributes: &Attributes) -> SceneResult<ImageTextureFields> {
    let filtering = attributes.u32("filtering", u32::from(DEFAULT_ANISOTROPY))?;
    let role = match attributes.string("role") {
        None | Some("") => TextureRole::BaseColor,
        Some(name) => TextureRole::from_name(name).ok_or_else(|| {
            invalid_field(
                attributes.kind(),
                "role",
                format!("unknown texture role '{}'", name),
            )
        })?,
    };
    Ok(ImageTextureFields {
        urls: attributes.string_list("url"),
        repeat_s: attributes.bool("repeatS", true)?,
        repeat_t: attributes.bool("repeatT", true)?,
        anisotropy: filtering.min(u32::from(u8::MAX)) as u8,
        transparent: attributes.bool("isTransparent", false)?,
        role,
        binding: TextureBinding::Unbound,
    })
}

/// Split a `-1` terminated index list into faces; a missing final `-1` is
/// tolerated
fn split_polygons(index: &[i32]) -> Vec<Vec<u32>> {
    index
        .split(|&i| i < 0)
        .filter(|polygon| !polygon.is_empty())
        .map(|polygon| polygon.iter().map(|&i| i as u32).collect())
        .collect()
}

fn check_range(polygons: &[Vec<u32>], available: usize) -> Result<(), u32> {
    match polygons.iter().flatten().find(|&&i| i as usize >= available) {
        Some(&bad) => Err(bad),
        None => Ok(()),
    }
}

/// Fan triangulation; faces with fewer than three corners are dropped
fn triangulate(polygons: &[Vec<u32>]) -> Vec<[u32; 3]> {
    let mut triangles = Vec::new();
    for polygon in polygons.iter().filter(|polygon| polygon.len() >= 3) {
        for i in 1..polygon.len() - 1 {
            triangles.push([polygon[0], polygon[i], polygon[i + 1]]);
        }
    }
    triangles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::node::FieldSlot;

    fn parse(raw: &str) -> ParsedMessage {
        let store = SceneGraphStore::new();
        NodeDescriptionParser::parse(raw, &store).unwrap()
    }

    #[test]
    fn test_transform_with_shape() {
        let message = parse(
            "<Transform id='n1' translation='1 2 3'>\
               <Shape id='n2' castShadows='true'>\
                 <Appearance id='n3'><Material id='n4' diffuseColor='1 0 0'/></Appearance>\
                 <Box id='n5' size='1 1 1'/>\
               </Shape>\
             </Transform>",
        );
        assert_eq!(message.nodes.len(), 1);
        assert!(message.diagnostics.is_empty());
        let transform = &message.nodes[0];
        match &transform.kind {
            NodeKind::Transform(fields) => assert_eq!(fields.translation, Vec3::new(1.0, 2.0, 3.0)),
            other => panic!("unexpected kind {other:?}"),
        }
        let shape = &transform.children[0];
        assert!(shape.children.is_empty());
        let appearance = shape.slot(FieldSlot::Appearance).unwrap();
        let material = appearance.slot(FieldSlot::Material).unwrap();
        match &material.kind {
            NodeKind::Material(fields) => {
                assert_eq!(fields.diffuse_color.rgb, Vec3::X);
                assert_eq!(fields.diffuse_color.space, ColorSpace::Gamma);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(matches!(
            shape.slot(FieldSlot::Geometry).unwrap().kind,
            NodeKind::Geometry(Geometry::Box { size }) if size == Vec3::ONE
        ));
    }

    #[test]
    fn test_defaults_applied() {
        let message = parse("<Shape><Box/></Shape><Viewpoint/><Material/>");
        let shape = &message.nodes[0];
        assert!(matches!(
            shape.slot(FieldSlot::Geometry).unwrap().kind,
            NodeKind::Geometry(Geometry::Box { size }) if size == Vec3::splat(2.0)
        ));
        match &message.nodes[1].kind {
            NodeKind::Viewpoint(fields) => {
                assert_eq!(fields.position, Vec3::new(0.0, 0.0, 10.0));
                assert_eq!(fields.follow_type, "Tracking Shot");
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(message.nodes[2].kind, NodeKind::Material(MaterialFields::default()));
    }

    #[test]
    fn test_pbr_colors_are_linear() {
        let message = parse("<PBRAppearance baseColor='0.5 0.5 0.5'/>");
        match &message.nodes[0].kind {
            NodeKind::PbrAppearance(fields) => {
                assert_eq!(fields.base_color.space, ColorSpace::Linear);
                assert_eq!(fields.base_color.to_linear(), Vec3::splat(0.5));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_pbr_texture_roles() {
        let message = parse(
            "<PBRAppearance>\
               <ImageTexture url='\"base.png\"'/>\
               <ImageTexture role='roughness' url='\"rough.png\"'/>\
             </PBRAppearance>",
        );
        let appearance = &message.nodes[0];
        assert!(appearance.slot(FieldSlot::BaseColorMap).is_some());
        assert!(appearance.slot(FieldSlot::RoughnessMap).is_some());
    }

    #[test]
    fn test_unknown_tags_flatten_children() {
        let message = parse("<Transform id='n1'><Robot><Group id='n2'/></Robot></Transform><Solid><Group id='n3'/></Solid>");
        assert_eq!(message.nodes.len(), 2);
        assert_eq!(message.nodes[0].children[0].id, Some(NodeId::from("n2")));
        assert_eq!(message.nodes[1].id, Some(NodeId::from("n3")));
    }

    #[test]
    fn test_misplaced_field_holder_is_skipped() {
        let message = parse("<Transform><Material/><Group/></Transform>");
        assert_eq!(message.nodes[0].children.len(), 1);
        assert_eq!(message.diagnostics.len(), 1);
        assert!(matches!(
            message.diagnostics[0],
            SceneError::UnsupportedField { .. }
        ));
    }

    #[test]
    fn test_use_within_message() {
        let message = parse(
            "<Group><Shape id='n1'><Sphere/></Shape><Transform><Shape USE='n1'/></Transform></Group>",
        );
        let clone = &message.nodes[0].children[1].children[0];
        assert_eq!(clone.id, None);
        assert_eq!(clone.use_of, Some(NodeId::from("n1")));
        assert!(clone.slot(FieldSlot::Geometry).is_some());
    }

    #[test]
    fn test_use_resolves_against_store() {
        let mut store = SceneGraphStore::new();
        let existing = NodeDescriptionParser::parse("<Transform id='n7'><Group id='n8'/></Transform>", &store)
            .unwrap()
            .nodes
            .remove(0);
        let root = store.build(&existing);
        store.attach(root, crate::scene::store::Placement::Root);

        let message = NodeDescriptionParser::parse("<Transform USE='n7'/>", &store).unwrap();
        assert!(message.nodes[0].ids().is_empty());
        assert_eq!(message.nodes[0].children.len(), 1);

        let err = NodeDescriptionParser::parse("<Transform USE='n99'/>", &store).unwrap_err();
        assert!(matches!(err, SceneError::UnresolvedUse { .. }));
    }

    #[test]
    fn test_bad_number_fails_message() {
        let store = SceneGraphStore::new();
        let err = NodeDescriptionParser::parse(
            "<Group><Transform translation='0 x 0'/></Group>",
            &store,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Transform.translation"));
    }

    #[test]
    fn test_indexed_face_set_triangulation() {
        let message = parse(
            "<IndexedFaceSet coordIndex='0 1 2 3 -1 0 1 -1'>\
               <Coordinate point='0 0 0 1 0 0 1 1 0 0 1 0'/>\
             </IndexedFaceSet>",
        );
        match &message.nodes[0].kind {
            NodeKind::Geometry(Geometry::IndexedFaceSet(mesh)) => {
                assert_eq!(mesh.triangles, vec![[0, 1, 2], [0, 2, 3]]);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_indexed_face_set_out_of_range_falls_back() {
        let message = parse(
            "<Shape><IndexedFaceSet coordIndex='0 1 9 -1'><Coordinate point='0 0 0 1 0 0 1 1 0'/></IndexedFaceSet></Shape>",
        );
        let geometry = message.nodes[0].slot(FieldSlot::Geometry).unwrap();
        assert_eq!(geometry.kind, NodeKind::Geometry(Geometry::Unknown));
        assert_eq!(message.diagnostics.len(), 1);
    }

    #[test]
    fn test_mismatched_normal_index_dropped() {
        let message = parse(
            "<IndexedFaceSet coordIndex='0 1 2 -1' normalIndex='0 1 -1'>\
               <Coordinate point='0 0 0 1 0 0 1 1 0'/>\
               <Normal vector='0 0 1 0 0 1 0 0 1'/>\
             </IndexedFaceSet>",
        );
        match &message.nodes[0].kind {
            NodeKind::Geometry(Geometry::IndexedFaceSet(mesh)) => {
                assert_eq!(mesh.normal_triangles, None);
                assert_eq!(mesh.normals.len(), 3);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(message.diagnostics.len(), 1);
    }

    #[test]
    fn test_coordinate_use_outside_message() {
        let message = parse(
            "<IndexedFaceSet coordIndex='0 1 2 -1'><Coordinate USE='c1'/></IndexedFaceSet>",
        );
        assert_eq!(message.nodes[0].kind, NodeKind::Geometry(Geometry::Unknown));
        assert_eq!(message.diagnostics.len(), 1);
    }

    #[test]
    fn test_render_flag_and_def_fallback() {
        let message = parse("<Transform DEF='n4' render='false'/>");
        assert_eq!(message.nodes[0].id, Some(NodeId::from("n4")));
        assert!(!message.nodes[0].render);
    }
}
