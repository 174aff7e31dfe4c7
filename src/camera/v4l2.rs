use crate::camera::Camera;
use crate::common::config::CameraConfig;
use crate::common::{FaceProofError, Result};
use crate::core::face::Frame;
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use std::fs;
use std::io;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub features: Vec<String>,
}

/// V4L2 webcam. Blocking device calls run on the blocking thread pool.
pub struct V4lCamera {
    config: CameraConfig,
    device: Option<(Device, Format)>,
}

impl V4lCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config, device: None }
    }

    /// Lists `/dev/video*` devices that answer a capability query.
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        for entry in fs::read_dir("/dev")? {
            let path = entry?.path();
            let Some(index) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("video"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };

            let Ok(device) = Device::new(index as usize) else { continue };
            let Ok(caps) = device.query_caps() else { continue };

            let mut features = Vec::new();
            if caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                features.push("VIDEO_CAPTURE".to_string());
            }
            for fmt in device.enum_formats().unwrap_or_default() {
                let fourcc = fmt.fourcc.str().unwrap_or("UNKNOWN");
                if is_supported(&fmt.fourcc) {
                    features.push(format!("Supported format ({})", fourcc));
                } else {
                    features.push(format!("Format ({})", fourcc));
                }
            }

            cameras.push(CameraInfo { index, name: caps.card.clone(), features });
        }

        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }
}

#[async_trait]
impl Camera for V4lCamera {
    async fn open(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        let config = self.config.clone();
        let opened = tokio::task::spawn_blocking(move || open_device(&config))
            .await
            .map_err(|e| FaceProofError::Camera(format!("Camera open task failed: {}", e)))??;
        self.device = Some(opened);
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame> {
        let (device, format) = self
            .device
            .take()
            .ok_or_else(|| FaceProofError::Camera("Camera is not open".into()))?;
        let warmup = self.config.warmup_frames;
        let delay = Duration::from_millis(self.config.warmup_delay_ms);

        let (device, format, frame) = tokio::task::spawn_blocking(move || {
            let frame = capture_blocking(&device, &format, warmup, delay);
            (device, format, frame)
        })
        .await
        .map_err(|e| FaceProofError::Camera(format!("Capture task failed: {}", e)))?;

        self.device = Some((device, format));
        frame
    }

    fn release(&mut self) {
        if self.device.take().is_some() {
            tracing::debug!("Released camera {}", self.config.device_index);
        }
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        self.release();
    }
}

fn camera_error(context: &str, e: io::Error) -> FaceProofError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        FaceProofError::CameraPermission(format!("{}: {}", context, e))
    } else {
        FaceProofError::Camera(format!("{}: {}", context, e))
    }
}

fn is_supported(fourcc: &FourCC) -> bool {
    matches!(&fourcc.repr, b"GREY" | b"YUYV" | b"MJPG" | b"RGB3")
}

fn open_device(config: &CameraConfig) -> Result<(Device, Format)> {
    let index = config.device_index;
    tracing::info!("Opening camera device {}", index);

    let device = Device::new(index as usize).map_err(|e| camera_error(&format!("Failed to open camera {}", index), e))?;

    let caps = device.query_caps().map_err(|e| camera_error("Failed to query capabilities", e))?;
    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        tracing::warn!("Device {} ({}) may not support standard video capture", index, caps.card);
    }

    let mut fmt = device.format().map_err(|e| camera_error("Failed to get format", e))?;
    fmt.width = config.width;
    fmt.height = config.height;
    if !is_supported(&fmt.fourcc) {
        fmt.fourcc = FourCC::new(b"MJPG");
    }

    // Not every device supports the exact resolution requested
    if let Err(e) = device.set_format(&fmt) {
        tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
    }

    let actual = device.format().map_err(|e| camera_error("Failed to get final format", e))?;
    if actual.width != config.width || actual.height != config.height {
        tracing::warn!(
            "Camera resolution {}x{} differs from requested {}x{}",
            actual.width, actual.height, config.width, config.height
        );
    }
    if !is_supported(&actual.fourcc) {
        return Err(FaceProofError::Camera(format!(
            "Unsupported pixel format {}",
            actual.fourcc.str().unwrap_or("UNKNOWN")
        )));
    }

    Ok((device, actual))
}

fn capture_blocking(device: &Device, format: &Format, warmup_frames: u32, warmup_delay: Duration) -> Result<Frame> {
    let mut stream = v4l::io::mmap::Stream::with_buffers(device, Type::VideoCapture, 4)
        .map_err(|e| camera_error("Failed to create stream", e))?;

    for _ in 0..warmup_frames {
        stream.next().map_err(|e| camera_error("Failed to capture warmup frame", e))?;
        std::thread::sleep(warmup_delay);
    }

    let (buf, _meta) = stream.next().map_err(|e| camera_error("Failed to capture", e))?;
    decode_frame(buf, format.width, format.height, &format.fourcc)
}

fn decode_frame(data: &[u8], width: u32, height: u32, fourcc: &FourCC) -> Result<Frame> {
    let pixels = (width * height) as usize;
    let short = || FaceProofError::Camera(format!("Short frame buffer: {} bytes for {}x{}", data.len(), width, height));

    match &fourcc.repr {
        b"GREY" => {
            let raw = data.get(..pixels).ok_or_else(short)?.to_vec();
            GrayImage::from_raw(width, height, raw)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(short)
        }
        b"YUYV" => {
            // Luma only; chroma is not needed for matching
            let raw: Vec<u8> = data.get(..pixels * 2).ok_or_else(short)?.iter().step_by(2).copied().collect();
            GrayImage::from_raw(width, height, raw)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(short)
        }
        b"RGB3" => {
            let raw = data.get(..pixels * 3).ok_or_else(short)?.to_vec();
            RgbImage::from_raw(width, height, raw)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(short)
        }
        b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
        other => Err(FaceProofError::Camera(format!(
            "Unsupported pixel format {}",
            String::from_utf8_lossy(other)
        ))),
    }
}
