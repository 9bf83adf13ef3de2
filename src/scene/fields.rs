//! Typed fields of every supported node kind
//!
//! [`NodeKind`] is a closed sum type: one variant per tag of the
//! node-description format. Adding a kind means adding a variant here and a
//! parse function in [`crate::parser::nodes`]; the compiler points at every
//! match that needs updating.

use glam::{Vec2, Vec3};

use crate::constants::field_defaults as defaults;
use crate::constants::texture_constants::DEFAULT_ANISOTROPY;
use crate::scene::node::{FieldSlot, NodeId};
use crate::texture::TextureHandle;

/// Encoding of a color triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// sRGB encoded, used by `Material`, lights, `Background` and `Fog`
    Gamma,
    /// Linear, used by `PBRAppearance`
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub rgb: Vec3,
    pub space: ColorSpace,
}

impl Color {
    pub const fn gamma(rgb: Vec3) -> Self {
        Self {
            rgb,
            space: ColorSpace::Gamma,
        }
    }

    pub const fn linear(rgb: Vec3) -> Self {
        Self {
            rgb,
            space: ColorSpace::Linear,
        }
    }

    pub fn from_array(rgb: [f32; 3], space: ColorSpace) -> Self {
        Self {
            rgb: Vec3::from_array(rgb),
            space,
        }
    }

    /// Linear value for lighting math, whatever the stored encoding
    pub fn to_linear(&self) -> Vec3 {
        match self.space {
            ColorSpace::Linear => self.rgb,
            ColorSpace::Gamma => Vec3::new(
                srgb_to_linear(self.rgb.x),
                srgb_to_linear(self.rgb.y),
                srgb_to_linear(self.rgb.z),
            ),
        }
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Axis-angle rotation with a unit axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisAngle {
    pub axis: Vec3,
    pub angle: f32,
}

impl AxisAngle {
    pub const IDENTITY: AxisAngle = AxisAngle {
        axis: Vec3::Y,
        angle: 0.0,
    };

    /// Normalizes the axis; a degenerate axis gives the identity
    pub fn new(axis: Vec3, angle: f32) -> Self {
        if axis.length_squared() <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self {
            axis: axis.normalize(),
            angle,
        }
    }

    pub fn to_quat(&self) -> glam::Quat {
        glam::Quat::from_axis_angle(self.axis, self.angle)
    }
}

impl Default for AxisAngle {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformFields {
    pub translation: Vec3,
    pub rotation: AxisAngle,
    pub scale: Vec3,
}

impl Default for TransformFields {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: AxisAngle::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeFields {
    pub cast_shadows: bool,
    pub is_pickable: bool,
}

impl Default for ShapeFields {
    fn default() -> Self {
        Self {
            cast_shadows: false,
            is_pickable: true,
        }
    }
}

/// Shared by directional, point and spot lights; unused members keep their
/// defaults for kinds that do not read them
#[derive(Debug, Clone, PartialEq)]
pub struct LightFields {
    pub on: bool,
    pub color: Color,
    pub intensity: f32,
    pub ambient_intensity: f32,
    pub cast_shadows: bool,
    pub direction: Vec3,
    pub location: Vec3,
    pub attenuation: Vec3,
    pub radius: f32,
    pub beam_width: f32,
    pub cut_off_angle: f32,
}

impl Default for LightFields {
    fn default() -> Self {
        Self {
            on: true,
            color: Color::from_array(defaults::LIGHT_COLOR, ColorSpace::Gamma),
            intensity: 1.0,
            ambient_intensity: 0.0,
            cast_shadows: false,
            direction: Vec3::from_array(defaults::LIGHT_DIRECTION),
            location: Vec3::ZERO,
            attenuation: Vec3::from_array(defaults::LIGHT_ATTENUATION),
            radius: defaults::LIGHT_RADIUS,
            beam_width: defaults::SPOT_BEAM_WIDTH,
            cut_off_angle: defaults::SPOT_CUT_OFF_ANGLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFaceSet {
    pub coords: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub triangles: Vec<[u32; 3]>,
    pub normal_triangles: Option<Vec<[u32; 3]>>,
    pub tex_coord_triangles: Option<Vec<[u32; 3]>>,
    pub ccw: bool,
    pub solid: bool,
    pub crease_angle: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedLineSet {
    pub coords: Vec<Vec3>,
    pub polylines: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    pub heights: Vec<f32>,
    pub x_dimension: u32,
    pub z_dimension: u32,
    pub x_spacing: f32,
    pub z_spacing: f32,
    pub thickness: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    pub coords: Vec<Vec3>,
    pub colors: Vec<Color>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Box {
        size: Vec3,
    },
    Cone {
        bottom_radius: f32,
        height: f32,
        side: bool,
        bottom: bool,
        subdivision: u32,
    },
    Cylinder {
        radius: f32,
        height: f32,
        bottom: bool,
        side: bool,
        top: bool,
        subdivision: u32,
    },
    Sphere {
        radius: f32,
        subdivision: u32,
        ico: bool,
    },
    Plane {
        size: Vec2,
    },
    IndexedFaceSet(IndexedFaceSet),
    IndexedLineSet(IndexedLineSet),
    ElevationGrid(ElevationGrid),
    PointSet(PointSet),
    /// Placeholder kept renderable when geometry is missing or unsupported
    Unknown,
}

impl Geometry {
    pub fn tag(&self) -> &'static str {
        match self {
            Geometry::Box { .. } => "Box",
            Geometry::Cone { .. } => "Cone",
            Geometry::Cylinder { .. } => "Cylinder",
            Geometry::Sphere { .. } => "Sphere",
            Geometry::Plane { .. } => "Plane",
            Geometry::IndexedFaceSet(_) => "IndexedFaceSet",
            Geometry::IndexedLineSet(_) => "IndexedLineSet",
            Geometry::ElevationGrid(_) => "ElevationGrid",
            Geometry::PointSet(_) => "PointSet",
            Geometry::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialFields {
    pub diffuse_color: Color,
    pub specular_color: Color,
    pub emissive_color: Color,
    pub shininess: f32,
    pub transparency: f32,
    pub ambient_intensity: f32,
}

impl MaterialFields {
    /// Fallback used when a material is deleted out from under a shape
    pub fn flat_white() -> Self {
        Self {
            diffuse_color: Color::gamma(Vec3::ONE),
            specular_color: Color::gamma(Vec3::ZERO),
            emissive_color: Color::gamma(Vec3::ZERO),
            shininess: 0.0,
            transparency: 0.0,
            ambient_intensity: 0.0,
        }
    }
}

impl Default for MaterialFields {
    fn default() -> Self {
        Self {
            diffuse_color: Color::from_array(defaults::MATERIAL_DIFFUSE, ColorSpace::Gamma),
            specular_color: Color::gamma(Vec3::ZERO),
            emissive_color: Color::gamma(Vec3::ZERO),
            shininess: defaults::MATERIAL_SHININESS,
            transparency: 0.0,
            ambient_intensity: defaults::MATERIAL_AMBIENT_INTENSITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PbrFields {
    pub base_color: Color,
    pub roughness: f32,
    pub metalness: f32,
    pub emissive_color: Color,
    pub emissive_intensity: f32,
    pub transparency: f32,
    pub ibl_strength: f32,
    pub normal_map_factor: f32,
    pub occlusion_map_strength: f32,
}

impl Default for PbrFields {
    fn default() -> Self {
        Self {
            base_color: Color::from_array(defaults::PBR_BASE_COLOR, ColorSpace::Linear),
            roughness: 0.0,
            metalness: defaults::PBR_METALNESS,
            emissive_color: Color::linear(Vec3::ZERO),
            emissive_intensity: 1.0,
            transparency: 0.0,
            ibl_strength: 1.0,
            normal_map_factor: 1.0,
            occlusion_map_strength: 1.0,
        }
    }
}

/// Which PBR map an `ImageTexture` feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureRole {
    #[default]
    BaseColor,
    Roughness,
    Metalness,
    Normal,
    Occlusion,
    EmissiveColor,
}

impl TextureRole {
    pub fn from_name(name: &str) -> Option<Self> {
        let role = match name {
            "baseColor" => TextureRole::BaseColor,
            "roughness" => TextureRole::Roughness,
            "metalness" => TextureRole::Metalness,
            "normal" => TextureRole::Normal,
            "occlusion" => TextureRole::Occlusion,
            "emissiveColor" => TextureRole::EmissiveColor,
            _ => return None,
        };
        Some(role)
    }

    pub fn pbr_slot(&self) -> FieldSlot {
        match self {
            TextureRole::BaseColor => FieldSlot::BaseColorMap,
            TextureRole::Roughness => FieldSlot::RoughnessMap,
            TextureRole::Metalness => FieldSlot::MetalnessMap,
            TextureRole::Normal => FieldSlot::NormalMap,
            TextureRole::Occlusion => FieldSlot::OcclusionMap,
            TextureRole::EmissiveColor => FieldSlot::EmissiveColorMap,
        }
    }
}

/// Load state of the image behind an `ImageTexture`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureBinding {
    /// No url, or not requested yet
    #[default]
    Unbound,
    Pending(TextureHandle),
    Ready(TextureHandle),
    Failed(TextureHandle),
}

impl TextureBinding {
    pub fn handle(&self) -> Option<TextureHandle> {
        match self {
            TextureBinding::Unbound => None,
            TextureBinding::Pending(handle)
            | TextureBinding::Ready(handle)
            | TextureBinding::Failed(handle) => Some(*handle),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageTextureFields {
    pub urls: Vec<String>,
    pub repeat_s: bool,
    pub repeat_t: bool,
    pub anisotropy: u8,
    pub transparent: bool,
    pub role: TextureRole,
    pub binding: TextureBinding,
}

impl Default for ImageTextureFields {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            repeat_s: true,
            repeat_t: true,
            anisotropy: DEFAULT_ANISOTROPY,
            transparent: false,
            role: TextureRole::BaseColor,
            binding: TextureBinding::Unbound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureTransformFields {
    pub center: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
    pub translation: Vec2,
}

impl Default for TextureTransformFields {
    fn default() -> Self {
        Self {
            center: Vec2::ZERO,
            rotation: 0.0,
            scale: Vec2::ONE,
            translation: Vec2::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackgroundUrls {
    pub back: Vec<String>,
    pub bottom: Vec<String>,
    pub front: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub top: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundFields {
    pub sky_color: Color,
    pub luminosity: f32,
    pub urls: BackgroundUrls,
}

impl Default for BackgroundFields {
    fn default() -> Self {
        Self {
            sky_color: Color::gamma(Vec3::ZERO),
            luminosity: 1.0,
            urls: BackgroundUrls::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewpointFields {
    pub position: Vec3,
    pub orientation: AxisAngle,
    pub field_of_view: f32,
    pub near: f32,
    /// Zero means no far plane
    pub far: f32,
    pub followed_id: Option<NodeId>,
    pub follow_type: String,
}

impl Default for ViewpointFields {
    fn default() -> Self {
        Self {
            position: Vec3::from_array(defaults::VIEWPOINT_POSITION),
            orientation: AxisAngle::IDENTITY,
            field_of_view: defaults::VIEWPOINT_FIELD_OF_VIEW,
            near: defaults::VIEWPOINT_NEAR,
            far: 0.0,
            followed_id: None,
            follow_type: defaults::VIEWPOINT_FOLLOW_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FogFields {
    pub color: Color,
    pub visibility_range: f32,
    pub fog_type: String,
}

impl Default for FogFields {
    fn default() -> Self {
        Self {
            color: Color::gamma(Vec3::ONE),
            visibility_range: 0.0,
            fog_type: defaults::FOG_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldInfoFields {
    pub title: String,
    pub window: String,
    pub basic_time_step: f32,
    pub coordinate_system: String,
}

impl Default for WorldInfoFields {
    fn default() -> Self {
        Self {
            title: String::new(),
            window: String::new(),
            basic_time_step: defaults::WORLD_BASIC_TIME_STEP,
            coordinate_system: defaults::WORLD_COORDINATE_SYSTEM.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Scene,
    Group,
    Transform(TransformFields),
    Switch { which_choice: i32 },
    Shape(ShapeFields),
    DirectionalLight(LightFields),
    PointLight(LightFields),
    SpotLight(LightFields),
    Geometry(Geometry),
    Appearance,
    Material(MaterialFields),
    PbrAppearance(PbrFields),
    ImageTexture(ImageTextureFields),
    TextureTransform(TextureTransformFields),
    Background(BackgroundFields),
    Viewpoint(ViewpointFields),
    Fog(FogFields),
    WorldInfo(WorldInfoFields),
}

impl NodeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Scene => "Scene",
            NodeKind::Group => "Group",
            NodeKind::Transform(_) => "Transform",
            NodeKind::Switch { .. } => "Switch",
            NodeKind::Shape(_) => "Shape",
            NodeKind::DirectionalLight(_) => "DirectionalLight",
            NodeKind::PointLight(_) => "PointLight",
            NodeKind::SpotLight(_) => "SpotLight",
            NodeKind::Geometry(geometry) => geometry.tag(),
            NodeKind::Appearance => "Appearance",
            NodeKind::Material(_) => "Material",
            NodeKind::PbrAppearance(_) => "PBRAppearance",
            NodeKind::ImageTexture(_) => "ImageTexture",
            NodeKind::TextureTransform(_) => "TextureTransform",
            NodeKind::Background(_) => "Background",
            NodeKind::Viewpoint(_) => "Viewpoint",
            NodeKind::Fog(_) => "Fog",
            NodeKind::WorldInfo(_) => "WorldInfo",
        }
    }

    /// Kinds that only ever live in a parent's field slot
    pub fn is_field_holder(&self) -> bool {
        matches!(
            self,
            NodeKind::Geometry(_)
                | NodeKind::Appearance
                | NodeKind::Material(_)
                | NodeKind::PbrAppearance(_)
                | NodeKind::ImageTexture(_)
                | NodeKind::TextureTransform(_)
        )
    }

    /// Kinds with an ordered child list
    pub fn is_grouping(&self) -> bool {
        matches!(
            self,
            NodeKind::Scene | NodeKind::Group | NodeKind::Transform(_) | NodeKind::Switch { .. }
        )
    }

    /// Slot a field-holder child occupies under this kind, if any
    pub fn slot_for_child(&self, child: &NodeKind) -> Option<FieldSlot> {
        match (self, child) {
            (NodeKind::Shape(_), NodeKind::Appearance | NodeKind::PbrAppearance(_)) => {
                Some(FieldSlot::Appearance)
            }
            (NodeKind::Shape(_), NodeKind::Geometry(_)) => Some(FieldSlot::Geometry),
            (NodeKind::Appearance, NodeKind::Material(_)) => Some(FieldSlot::Material),
            (NodeKind::Appearance, NodeKind::ImageTexture(_)) => Some(FieldSlot::Texture),
            (NodeKind::Appearance | NodeKind::PbrAppearance(_), NodeKind::TextureTransform(_)) => {
                Some(FieldSlot::TextureTransform)
            }
            (NodeKind::PbrAppearance(_), NodeKind::ImageTexture(texture)) => {
                Some(texture.role.pbr_slot())
            }
            _ => None,
        }
    }

    /// Whether `slot` is addressable on this kind, occupied or not
    pub fn accepts_slot(&self, slot: FieldSlot) -> bool {
        match self {
            NodeKind::Shape(_) => matches!(slot, FieldSlot::Appearance | FieldSlot::Geometry),
            NodeKind::Appearance => matches!(
                slot,
                FieldSlot::Material | FieldSlot::Texture | FieldSlot::TextureTransform
            ),
            NodeKind::PbrAppearance(_) => {
                slot == FieldSlot::TextureTransform || (slot.is_texture() && slot != FieldSlot::Texture)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_angle_normalizes() {
        let rotation = AxisAngle::new(Vec3::new(0.0, 0.0, 2.0), 1.0);
        assert_eq!(rotation.axis, Vec3::Z);
        assert_eq!(AxisAngle::new(Vec3::ZERO, 3.0), AxisAngle::IDENTITY);
    }

    #[test]
    fn test_gamma_color_linearizes() {
        let gamma = Color::gamma(Vec3::splat(0.5));
        let linear = gamma.to_linear();
        assert!((linear.x - 0.214).abs() < 1e-3);
        let already = Color::linear(Vec3::splat(0.5));
        assert_eq!(already.to_linear(), Vec3::splat(0.5));
    }

    #[test]
    fn test_slot_rules() {
        let shape = NodeKind::Shape(ShapeFields::default());
        assert_eq!(
            shape.slot_for_child(&NodeKind::Appearance),
            Some(FieldSlot::Appearance)
        );
        assert_eq!(
            shape.slot_for_child(&NodeKind::Geometry(Geometry::Unknown)),
            Some(FieldSlot::Geometry)
        );
        let transform = NodeKind::Transform(TransformFields::default());
        assert_eq!(transform.slot_for_child(&NodeKind::Appearance), None);

        let pbr = NodeKind::PbrAppearance(PbrFields::default());
        let roughness = NodeKind::ImageTexture(ImageTextureFields {
            role: TextureRole::Roughness,
            ..Default::default()
        });
        assert_eq!(pbr.slot_for_child(&roughness), Some(FieldSlot::RoughnessMap));
        assert!(pbr.accepts_slot(FieldSlot::NormalMap));
        assert!(!pbr.accepts_slot(FieldSlot::Texture));
    }

    #[test]
    fn test_default_material_is_not_flat_white() {
        assert_ne!(MaterialFields::default(), MaterialFields::flat_white());
        assert_eq!(MaterialFields::flat_white().diffuse_color.rgb, Vec3::ONE);
    }
}
