// media.rs — 全景图像 / 视频源

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::io::Reader as ImageReader;
use image::RgbaImage;

use crate::error::{PanoramaError, Result};

pub const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".bmp", ".tga"];
pub const VIDEO_EXTENSIONS: [&str; 4] = [".mp4", ".avi", ".mov", ".mkv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify by file-name suffix. The match is case-sensitive, so
    /// `PANO.JPG` is not recognized.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.to_string_lossy();
        if IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            Ok(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            Ok(MediaKind::Video)
        } else {
            Err(PanoramaError::UnsupportedFileType(path.to_path_buf()))
        }
    }

    /// Camera-move effects are only offered for still panoramas.
    pub fn supports_animation(self) -> bool {
        self == MediaKind::Image
    }
}

/// Decode a still panorama into RGBA8. Large panoramas are common, so the
/// decoder's allocation limits are lifted.
pub fn load_image(path: &Path) -> Result<RgbaImage> {
    let file = File::open(path).map_err(|e| PanoramaError::media_open(path, e))?;
    let img = ImageReader::new(BufReader::new(file))
        .with_guessed_format()
        .map_err(|e| PanoramaError::media_open(path, e))
        .and_then(|mut r| {
            r.no_limits();
            r.decode().map_err(|e| PanoramaError::media_open(path, e))
        })?;

    log::info!(
        "loaded image {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );
    Ok(img.to_rgba8())
}

/// Frame-by-frame video decoding, supplied by an external backend.
pub trait VideoDecoder {
    /// Next frame, or `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<RgbaImage>>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;
}

/// Plays a decoder forever: end of stream seeks to the start and re-reads.
pub struct LoopingVideo<D> {
    decoder: D,
    path: PathBuf,
    loops: u64,
}

impl<D: VideoDecoder> LoopingVideo<D> {
    pub fn new(decoder: D, path: impl Into<PathBuf>) -> Self {
        Self {
            decoder,
            path: path.into(),
            loops: 0,
        }
    }

    pub fn loops(&self) -> u64 {
        self.loops
    }

    pub fn next_frame(&mut self) -> Result<RgbaImage> {
        if let Some(frame) = self.decoder.read_frame()? {
            return Ok(frame);
        }

        self.decoder.rewind()?;
        self.loops += 1;
        log::debug!("video {} looped ({})", self.path.display(), self.loops);
        self.decoder
            .read_frame()?
            .ok_or_else(|| PanoramaError::media_open(&self.path, "stream has no frames"))
    }
}

/// A panorama source for the render loop.
pub enum MediaSource {
    Image(RgbaImage),
    Video(LoopingVideo<Box<dyn VideoDecoder>>),
}

impl MediaSource {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaSource::Image(_) => MediaKind::Image,
            MediaSource::Video(_) => MediaKind::Video,
        }
    }
}

impl VideoDecoder for Box<dyn VideoDecoder> {
    fn read_frame(&mut self) -> Result<Option<RgbaImage>> {
        (**self).read_frame()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }
}

/// Open `path` as an image or video panorama.
pub fn open(path: &Path) -> Result<MediaSource> {
    match MediaKind::from_path(path)? {
        MediaKind::Image => load_image(path).map(MediaSource::Image),
        MediaKind::Video => open_video(path).map(|d| MediaSource::Video(LoopingVideo::new(d, path))),
    }
}

fn open_video(path: &Path) -> Result<Box<dyn VideoDecoder>> {
    if !path.exists() {
        return Err(PanoramaError::media_open(path, "file not found"));
    }
    Err(PanoramaError::media_open(
        path,
        "no video decoder backend is available in this build",
    ))
}
