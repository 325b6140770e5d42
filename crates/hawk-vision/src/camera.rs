use anyhow::{Context, Result};
use hawk_proto::LatestCell;
use image::ImageFormat;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mjpeg::JpegSplitter;
use crate::Frame;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    pub mode: String, // "libcamera-mjpeg" | "v4l2-mjpeg" | "url" | "file"
    #[serde(default)]
    pub device: String, // /dev/video0 (v4l2)
    #[serde(default)]
    pub url: String, // udp://0.0.0.0:11111 for the Tello video feed
    #[serde(default)]
    pub path: String, // still image (file)
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

pub const CAMERA_MODES: &[&str] = &["libcamera-mjpeg", "v4l2-mjpeg", "url", "file"];

/// Supplies the most recent frame on demand.
pub trait FrameSource: Send {
    /// Never blocks; may hand back the same frame twice, or nothing yet.
    fn read_latest_frame(&mut self) -> Option<Frame>;

    fn stop(&mut self) {}
}

/// Must be called from inside a tokio runtime (capture modes spawn a reader task).
pub fn open(cfg: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    match cfg.mode.as_str() {
        "file" => Ok(Box::new(StillImage::open(&cfg.path)?)),
        "libcamera-mjpeg" | "v4l2-mjpeg" | "url" => Ok(Box::new(PipeCamera::spawn(cfg)?)),
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}

/// Capture process writing MJPEG to stdout:
/// - libcamera-mjpeg: `libcamera-vid --codec mjpeg -o -` (Pi camera)
/// - v4l2-mjpeg: `ffmpeg` reading a V4L2 device
/// - url: `ffmpeg` transcoding any stream it can open (e.g. the Tello H.264 feed)
fn capture_command(cfg: &CameraConfig) -> Result<Command> {
    let size = format!("{}x{}", cfg.width, cfg.height);
    let cmd = match cfg.mode.as_str() {
        "libcamera-mjpeg" => {
            let mut cmd = Command::new("libcamera-vid");
            cmd.args([
                "-n",                 // no preview
                "-t", "0",            // run until killed
                "--codec", "mjpeg",
                "--width", &cfg.width.to_string(),
                "--height", &cfg.height.to_string(),
                "--framerate", &cfg.fps.to_string(),
                "-o", "-",
            ]);
            cmd
        }
        "v4l2-mjpeg" => {
            anyhow::ensure!(!cfg.device.is_empty(), "camera.device missing (v4l2-mjpeg)");
            let mut cmd = Command::new("ffmpeg");
            cmd.args([
                "-hide_banner", "-loglevel", "error",
                "-f", "video4linux2",
                "-input_format", "mjpeg",
                "-video_size", &size,
                "-i", &cfg.device,
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-",
            ]);
            cmd
        }
        "url" => {
            anyhow::ensure!(!cfg.url.is_empty(), "camera.url missing (url)");
            let mut cmd = Command::new("ffmpeg");
            cmd.args([
                "-hide_banner", "-loglevel", "error",
                "-fflags", "nobuffer",
                "-i", &cfg.url,
                "-vf", &format!("scale={}:{}", cfg.width, cfg.height),
                "-r", &cfg.fps.to_string(),
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-q:v", "5",
                "-",
            ]);
            cmd
        }
        other => anyhow::bail!("camera.mode {} is not a capture process", other),
    };
    Ok(cmd)
}

/// Frame source backed by a long-running capture process.
///
/// A reader task splits stdout into JPEGs and keeps only the newest decoded
/// frame; frames that arrive while a decode is running are dropped.
pub struct PipeCamera {
    latest: Arc<LatestCell<Frame>>,
    reader: Option<JoinHandle<()>>,
}

impl PipeCamera {
    pub fn spawn(cfg: &CameraConfig) -> Result<Self> {
        let mut cmd = capture_command(cfg)?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);
        let child = cmd.spawn().with_context(|| format!("spawn capture process ({})", cfg.mode))?;
        info!("camera: {} capture started ({}x{} @ {}fps)", cfg.mode, cfg.width, cfg.height, cfg.fps);

        let latest = Arc::new(LatestCell::new());
        let reader = tokio::spawn(read_stream(child, Arc::clone(&latest)));
        Ok(Self { latest, reader: Some(reader) })
    }
}

async fn read_stream(mut child: Child, latest: Arc<LatestCell<Frame>>) {
    let Some(mut stdout) = child.stdout.take() else {
        warn!("camera: capture process has no stdout");
        return;
    };
    let mut splitter = JpegSplitter::new();
    let mut chunk = vec![0u8; 64 * 1024];

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => {
                warn!("camera: capture process closed its output");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("camera: read failed: {:#}", e);
                break;
            }
        };
        // only the newest completed image is worth decoding
        let Some(jpeg) = splitter.push(&chunk[..n]).pop() else { continue };
        match tokio::task::spawn_blocking(move || decode_jpeg(&jpeg)).await {
            Ok(Ok(frame)) => latest.publish(frame),
            Ok(Err(e)) => debug!("camera: dropped undecodable frame: {:#}", e),
            Err(e) => warn!("camera: decode task failed: {}", e),
        }
    }
    let _ = child.kill().await;
}

pub fn decode_jpeg(jpeg: &[u8]) -> Result<Frame> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).context("decode jpeg")?;
    Ok(Frame::new(img.to_rgb8()))
}

impl FrameSource for PipeCamera {
    fn read_latest_frame(&mut self) -> Option<Frame> {
        self.latest.snapshot()
    }

    fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            // dropping the task drops the child, which kills it
            reader.abort();
            info!("camera: capture stopped");
        }
    }
}

impl Drop for PipeCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A single image served as every frame; for dry runs without a camera.
pub struct StillImage {
    frame: Frame,
}

impl StillImage {
    pub fn open(path: &str) -> Result<Self> {
        anyhow::ensure!(!path.is_empty(), "camera.path missing (file)");
        let img = image::open(path).with_context(|| format!("open still image {}", path))?;
        info!("camera: serving still image {} ({}x{})", path, img.width(), img.height());
        Ok(Self { frame: Frame::new(img.to_rgb8()) })
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self { frame }
    }
}

impl FrameSource for StillImage {
    fn read_latest_frame(&mut self) -> Option<Frame> {
        Some(self.frame.clone())
    }
}
