// error.rs — 错误类型

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the panorama viewer and its export pipeline.
#[derive(Debug, Error)]
pub enum PanoramaError {
    /// The file extension matches neither the image nor the video set.
    #[error("unsupported file type: {}", .0.display())]
    UnsupportedFileType(PathBuf),

    /// The decoder could not open the video or decode the image.
    #[error("cannot open media {}: {reason}", .path.display())]
    MediaOpen { path: PathBuf, reason: String },

    /// Adapter, device, shader or pipeline creation failed.
    #[error("graphics setup failed: {0}")]
    GraphicsSetup(String),

    /// A second export was requested while one is still running.
    #[error("export already in progress")]
    ExportAlreadyInProgress,

    /// The offscreen render target for an export could not be built.
    #[error("framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),

    /// Keyframe/duration tables violate the track invariants.
    #[error("invalid animation track: {0}")]
    InvalidTrack(String),

    /// Export was requested without an active animation.
    #[error("no animation effect to export")]
    NoActiveAnimation,

    /// The frame sink rejected a frame.
    #[error("frame encoding failed: {0}")]
    Encode(String),

    /// Configuration file could not be parsed or holds invalid values.
    #[error("config error: {0}")]
    Config(String),

    /// The export worker thread could not be started.
    #[error("failed to spawn export thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl PanoramaError {
    pub fn media_open(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::MediaOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_track(msg: impl Into<String>) -> Self {
        Self::InvalidTrack(msg.into())
    }

    /// Errors that terminate the whole process. Export-scoped failures are
    /// reported and the interactive session keeps running; a bad config file
    /// falls back to defaults.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFileType(_)
                | Self::MediaOpen { .. }
                | Self::GraphicsSetup(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PanoramaError>;
