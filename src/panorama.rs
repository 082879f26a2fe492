// panorama.rs — 视角参数与视图模式

/// Camera placement relative to the panorama sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Perspective, // 透视图：相机在球心向外看
    LittlePlanet, // 小行星：相机在球面上看向球心
    CrystalBall,  // 水晶球：相机在球外 1.5 倍半径处
}

impl ViewMode {
    pub fn default_pitch(self) -> f32 {
        match self {
            ViewMode::Perspective | ViewMode::CrystalBall => 0.0,
            ViewMode::LittlePlanet => 90.0,
        }
    }

    pub fn default_fov(self) -> f32 {
        match self {
            ViewMode::Perspective => 60.0,
            ViewMode::LittlePlanet => 120.0,
            ViewMode::CrystalBall => 85.0,
        }
    }

    /// Distance of the eye from the sphere center for the outside-looking-in
    /// modes. Perspective keeps the eye at the origin.
    pub fn eye_distance(self) -> f32 {
        match self {
            ViewMode::Perspective => 0.0,
            ViewMode::LittlePlanet => 1.0,
            ViewMode::CrystalBall => 1.5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ViewMode::Perspective => "Perspective",
            ViewMode::LittlePlanet => "Little planet",
            ViewMode::CrystalBall => "Crystal ball",
        }
    }
}

/// Interactive camera parameters. Angles are in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub mode: ViewMode,
    pub pitch: f32,
    pub yaw: f32,
    pub prev_pitch: f32,
    pub fov: f32,
    /// Sign of the reference up vector, flipped on every pole crossing.
    pub up_sign: f32,
    pub dragging: bool,
    pub last_cursor: (f64, f64),
}

impl ViewState {
    pub fn new(mode: ViewMode) -> Self {
        let pitch = mode.default_pitch();
        Self {
            mode,
            pitch,
            yaw: 0.0,
            prev_pitch: pitch,
            fov: mode.default_fov(),
            up_sign: 1.0,
            dragging: false,
            last_cursor: (0.0, 0.0),
        }
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new(ViewMode::Perspective)
    }
}
