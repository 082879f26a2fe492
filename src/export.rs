// export.rs — 导出“照片动画师”为帧序列
//
// 与实时播放共用 AnimationTrack::interpolate + projector::project，
// 所以导出的画面与预览一致。同一时间只允许一个导出任务。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use image::RgbImage;

use crate::animation::AnimationTrack;
use crate::error::{PanoramaError, Result};
use crate::projector::{self, ViewProjection};

/// Absorbs representation error in `total * fps` (e.g. 0.7 s at 30 fps).
const FRAME_COUNT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRequest {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl ExportRequest {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportReport {
    pub frames: u32,
    pub duration: f32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// `floor(total * fps)` frames; none for empty or invalid tracks.
pub fn frame_count(total_duration: f32, fps: u32) -> u32 {
    let frames = f64::from(total_duration) * f64::from(fps);
    if !frames.is_finite() || frames <= 0.0 {
        return 0;
    }
    (frames + FRAME_COUNT_TOLERANCE).floor() as u32
}

/// Simulated time of frame `k`.
pub fn frame_time(k: u32, fps: u32) -> f32 {
    (f64::from(k) / f64::from(fps)) as f32
}

/// Renders one frame for a camera into an RGB image (off-screen target plus
/// pixel readback).
pub trait FrameRenderer {
    fn render(&mut self, camera: &ViewProjection) -> Result<RgbImage>;
}

/// Receives finished frames in order (the encoder/muxer boundary).
pub trait FrameSink {
    fn write_frame(&mut self, index: u32, frame: &RgbImage) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sample `track` at `1/fps` steps and push every rendered frame to `sink`.
pub fn render_track<R, S>(
    track: &AnimationTrack,
    request: &ExportRequest,
    renderer: &mut R,
    sink: &mut S,
) -> Result<ExportReport>
where
    R: FrameRenderer + ?Sized,
    S: FrameSink + ?Sized,
{
    if request.fps == 0 {
        return Err(PanoramaError::Encode("frame rate must be at least 1".into()));
    }
    if request.width == 0 || request.height == 0 {
        return Err(PanoramaError::FramebufferIncomplete(format!(
            "zero-sized target {}x{}",
            request.width, request.height
        )));
    }

    let duration = track.total_duration();
    let frames = frame_count(duration, request.fps);
    let aspect = request.aspect_ratio();
    log::info!(
        "exporting {frames} frames ({duration:.2}s @ {} fps, {}x{})",
        request.fps,
        request.width,
        request.height
    );

    for k in 0..frames {
        let pose = track.interpolate(frame_time(k, request.fps));
        let camera = projector::project(&pose, aspect);
        let frame = renderer.render(&camera)?;
        if frame.dimensions() != (request.width, request.height) {
            return Err(PanoramaError::Encode(format!(
                "frame {k} is {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                request.width,
                request.height
            )));
        }
        sink.write_frame(k, &frame)?;
        if (k + 1) % request.fps == 0 {
            log::debug!("export progress {}/{}", k + 1, frames);
        }
    }
    sink.finish()?;

    Ok(ExportReport {
        frames,
        duration,
        fps: request.fps,
        width: request.width,
        height: request.height,
    })
}

/// Held for the duration of one export; clears the in-flight flag on drop.
#[derive(Debug)]
pub struct ExportTicket {
    in_flight: Arc<AtomicBool>,
}

impl Drop for ExportTicket {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Guards the single in-flight export.
#[derive(Debug, Clone, Default)]
pub struct ExportPipeline {
    in_flight: Arc<AtomicBool>,
}

impl ExportPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_exporting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Atomically claim the export slot. A second claim is rejected and
    /// leaves the running export untouched.
    pub fn try_begin(&self) -> Result<ExportTicket> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                log::warn!("export already in progress, request ignored");
                PanoramaError::ExportAlreadyInProgress
            })?;
        Ok(ExportTicket {
            in_flight: self.in_flight.clone(),
        })
    }

    /// Blocking export on the caller's thread.
    pub fn export<R, S>(
        &self,
        track: &AnimationTrack,
        request: &ExportRequest,
        renderer: &mut R,
        sink: &mut S,
    ) -> Result<ExportReport>
    where
        R: FrameRenderer + ?Sized,
        S: FrameSink + ?Sized,
    {
        let _ticket = self.try_begin()?;
        render_track(track, request, renderer, sink)
    }

    /// Run `job` on a dedicated worker thread. The slot is claimed before the
    /// thread starts and released when `job` returns.
    pub fn spawn<F>(&self, job: F) -> Result<JoinHandle<Result<ExportReport>>>
    where
        F: FnOnce() -> Result<ExportReport> + Send + 'static,
    {
        self.spawn_worker(move |ticket| {
            let _ticket = ticket;
            job()
        })
    }

    /// Like `spawn`, but the outcome is posted to `reports` for a polling
    /// render loop. The slot is free again by the time the report arrives.
    pub fn spawn_reporting<F>(&self, job: F, reports: Sender<Result<ExportReport>>) -> Result<()>
    where
        F: FnOnce() -> Result<ExportReport> + Send + 'static,
    {
        self.spawn_worker(move |ticket| {
            let result = job();
            drop(ticket);
            if reports.send(result).is_err() {
                log::warn!("export finished but nobody is listening for the report");
            }
        })
        .map(|_| ())
    }

    fn spawn_worker<F, T>(&self, work: F) -> Result<JoinHandle<T>>
    where
        F: FnOnce(ExportTicket) -> T + Send + 'static,
        T: Send + 'static,
    {
        let ticket = self.try_begin()?;
        thread::Builder::new()
            .name("panorama-export".into())
            .spawn(move || work(ticket))
            .map_err(PanoramaError::ThreadSpawn)
    }
}

/// Writes frames as `frame_00000.png`, `frame_00001.png`, ... into a directory.
#[derive(Debug)]
pub struct PngSequenceSink {
    dir: PathBuf,
    written: u32,
}

impl PngSequenceSink {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, written: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("frame_{index:05}.png"))
    }
}

impl FrameSink for PngSequenceSink {
    fn write_frame(&mut self, index: u32, frame: &RgbImage) -> Result<()> {
        frame.save(self.frame_path(index))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        log::info!("wrote {} frames to {}", self.written, self.dir.display());
        Ok(())
    }
}
