// Scene Stream Constants
//
// Protocol tags, timing values and per-kind field defaults live here so the
// parser, the mutator and the session agree on them.

/// Transport message tags
pub mod protocol_constants {
    /// Node insertion, `node:<parentId>:<markup>`
    pub const NODE_TAG: &str = "node:";

    /// Node deletion, `delete:<id>`
    pub const DELETE_TAG: &str = "delete:";

    /// Pose update batch, `application/json:<json>`
    pub const POSE_TAG: &str = "application/json:";

    /// Full world replacement, `model:<markup>`
    pub const MODEL_TAG: &str = "model:";

    /// Texture path prefix, `url:<prefix>`
    pub const TEXTURE_PREFIX_TAG: &str = "url:";

    /// Controller file opened in the editor
    pub const CONTROLLER_TAG: &str = "set controller:";

    /// Overlay label, `label:<json>`
    pub const LABEL_TAG: &str = "label:";

    /// Loading progress, `loading:<stage>:<percent>`
    pub const LOADING_TAG: &str = "loading:";

    /// Simulation time in milliseconds
    pub const REAL_TIME_TAG: &str = "real-time:";

    pub const SCENE_LOAD_COMPLETED: &str = "scene load completed";
    pub const RESET_FINISHED: &str = "reset finished";
    pub const PAUSE: &str = "pause";

    /// Parent id meaning "no parent, insert as root"
    pub const ROOT_PARENT_ID: &str = "-1";

    /// Prefix added to numeric ids coming from pose batches
    pub const NODE_ID_PREFIX: char = 'n';
}

/// Texture loading
pub mod texture_constants {
    /// Time after which a pending texture stops blocking "all textures loaded"
    pub const TEXTURE_TIMEOUT_MS: u64 = 10_000;

    /// Anisotropy used when the `filtering` attribute is absent
    pub const DEFAULT_ANISOTROPY: u8 = 4;

    /// Url schemes that are never prefixed with the texture path prefix
    pub const ABSOLUTE_URL_PREFIXES: &[&str] = &["http://", "https://", "data:", "blob:", "/"];
}

/// Animation playback
pub mod animation_constants {
    /// Frame duration used when a recording omits `basicTimeStep`
    pub const DEFAULT_FRAME_DURATION_MS: u64 = 32;

    /// Separator of the `ids` list in recordings
    pub const ID_LIST_SEPARATOR: char = ';';
}

/// Default field values applied when an attribute is absent
pub mod field_defaults {
    pub const BOX_SIZE: [f32; 3] = [2.0, 2.0, 2.0];
    pub const PLANE_SIZE: [f32; 2] = [1.0, 1.0];

    pub const CONE_BOTTOM_RADIUS: f32 = 1.0;
    pub const CONE_HEIGHT: f32 = 2.0;
    pub const CYLINDER_RADIUS: f32 = 1.0;
    pub const CYLINDER_HEIGHT: f32 = 2.0;
    pub const ROUND_SUBDIVISION: u32 = 12;
    pub const SPHERE_RADIUS: f32 = 1.0;
    pub const SPHERE_SUBDIVISION: u32 = 1;

    pub const ELEVATION_SPACING: f32 = 1.0;
    pub const ELEVATION_THICKNESS: f32 = 1.0;

    pub const MATERIAL_DIFFUSE: [f32; 3] = [0.8, 0.8, 0.8];
    pub const MATERIAL_SHININESS: f32 = 0.2;
    pub const MATERIAL_AMBIENT_INTENSITY: f32 = 0.2;

    pub const PBR_BASE_COLOR: [f32; 3] = [1.0, 1.0, 1.0];
    pub const PBR_METALNESS: f32 = 1.0;

    pub const LIGHT_COLOR: [f32; 3] = [1.0, 1.0, 1.0];
    pub const LIGHT_DIRECTION: [f32; 3] = [0.0, 0.0, -1.0];
    pub const LIGHT_ATTENUATION: [f32; 3] = [1.0, 0.0, 0.0];
    pub const LIGHT_RADIUS: f32 = 100.0;
    pub const SPOT_BEAM_WIDTH: f32 = 1.570796;
    pub const SPOT_CUT_OFF_ANGLE: f32 = 0.785398;

    pub const VIEWPOINT_POSITION: [f32; 3] = [0.0, 0.0, 10.0];
    pub const VIEWPOINT_FIELD_OF_VIEW: f32 = 0.785398;
    pub const VIEWPOINT_NEAR: f32 = 0.05;
    pub const VIEWPOINT_FOLLOW_TYPE: &str = "Tracking Shot";

    pub const FOG_TYPE: &str = "LINEAR";

    pub const WORLD_BASIC_TIME_STEP: f32 = 32.0;
    pub const WORLD_COORDINATE_SYSTEM: &str = "ENU";
}
