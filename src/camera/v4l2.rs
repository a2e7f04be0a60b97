use crate::camera::FrameSource;
use crate::common::{AttendanceError, Result, config::CameraConfig};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// V4L2 webcam as a frame source. The capture stream is opened on the first
/// frame and warmed up once; `release` drops both stream and device.
pub struct V4lCamera {
    device: Option<Device>,
    stream: Option<Stream<'static>>,
    format: v4l::Format,
    config: CameraConfig,
}

impl V4lCamera {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let index = config.device_index;
        let device = Device::new(index as usize)
            .map_err(|e| AttendanceError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device
            .query_caps()
            .map_err(|e| AttendanceError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} ({}) may not support video capture", index, caps.card);
        }

        let mut fmt = device
            .format()
            .map_err(|e| AttendanceError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = config.width;
        fmt.height = config.height;
        if fmt.fourcc != FourCC::new(b"GREY") {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set {}x{} {}: {}. Using device defaults.", fmt.width, fmt.height, fmt.fourcc, e);
        }

        let format = device
            .format()
            .map_err(|e| AttendanceError::Camera(format!("Failed to get final format: {}", e)))?;
        if format.width != config.width || format.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                format.width,
                format.height,
                config.width,
                config.height
            );
        }
        tracing::info!("Opened /dev/video{} ({}) at {}x{} {}", index, caps.card, format.width, format.height, format.fourcc);

        Ok(Self {
            device: Some(device),
            stream: None,
            format,
            config: config.clone(),
        })
    }

    fn stream(&mut self) -> Result<&mut Stream<'static>> {
        if self.stream.is_none() {
            let device = self
                .device
                .as_ref()
                .ok_or_else(|| AttendanceError::Camera("camera already released".into()))?;
            let mut stream = Stream::with_buffers(device, Type::VideoCapture, 4)
                .map_err(|e| AttendanceError::Camera(format!("Failed to create stream: {}", e)))?;

            for i in 0..self.config.warmup_frames {
                stream
                    .next()
                    .map_err(|e| AttendanceError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
                std::thread::sleep(std::time::Duration::from_millis(self.config.warmup_delay_ms));
            }
            self.stream = Some(stream);
        }

        self.stream
            .as_mut()
            .ok_or_else(|| AttendanceError::Camera("capture stream unavailable".into()))
    }

    fn decode(&self, data: &[u8]) -> Result<DynamicImage> {
        match &self.format.fourcc.repr {
            b"GREY" => {
                let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(self.format.width, self.format.height, data.to_vec())
                    .ok_or_else(|| AttendanceError::Camera("Failed to create grayscale image buffer".into()))?;
                Ok(DynamicImage::ImageLuma8(buffer))
            }
            b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
            other => Err(AttendanceError::Camera(format!(
                "Unsupported pixel format {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

impl FrameSource for V4lCamera {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        let stream = self.stream()?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| AttendanceError::Camera(format!("Failed to capture: {}", e)))?;
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let data = buf[..used].to_vec();
        self.decode(&data).map(Some)
    }

    fn release(&mut self) {
        if self.device.is_some() {
            self.stream = None;
            self.device = None;
            tracing::debug!("Camera released");
        }
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        self.release();
    }
}
