//! Webcam capture through a GStreamer `appsink` pipeline.

use std::sync::OnceLock;

use eduvision_common::frame::Frame;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;

use super::{CameraBackend, CameraDevice, CaptureFormat};
use crate::error::CameraError;

/// Opens platform webcams by device index.
#[derive(Debug, Default, Clone, Copy)]
pub struct GstreamerBackend;

impl GstreamerBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for GstreamerBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn open(&self, index: u32, format: &CaptureFormat) -> Result<Box<dyn CameraDevice>, CameraError> {
        init_gstreamer().map_err(|e| CameraError::unopenable(index, e))?;

        let launch = launch_description(index, format);
        tracing::debug!(camera = index, pipeline = %launch, "Building camera pipeline");

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| CameraError::unopenable(index, format!("Failed to build pipeline: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CameraError::unopenable(index, "Launch string did not produce a pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::unopenable(index, "appsink element missing from pipeline"))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| CameraError::unopenable(index, "appsink element has unexpected type"))?;

        let mut device = GstCameraDevice {
            index,
            pipeline,
            appsink,
            timeout: gst::ClockTime::from_nseconds(format.read_timeout.as_nanos() as u64),
            released: false,
        };
        device.start()?;
        Ok(Box::new(device))
    }
}

struct GstCameraDevice {
    index: u32,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    timeout: gst::ClockTime,
    released: bool,
}

impl GstCameraDevice {
    fn start(&mut self) -> Result<(), CameraError> {
        if let Err(e) = self.pipeline.set_state(gst::State::Playing) {
            self.release();
            return Err(CameraError::unopenable(
                self.index,
                format!("Failed to start pipeline: {e:?}"),
            ));
        }

        // Live sources open the device asynchronously; wait for the outcome.
        match self.pipeline.state(self.timeout) {
            (Ok(_), gst::State::Playing, _) => Ok(()),
            (Ok(_), state, _) => {
                tracing::warn!(
                    camera = self.index,
                    ?state,
                    "Pipeline did not reach Playing state within timeout"
                );
                Ok(())
            }
            (Err(e), _, _) => {
                let reason = self.bus_error().unwrap_or_else(|| format!("{e:?}"));
                self.release();
                Err(CameraError::unopenable(self.index, reason))
            }
        }
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop() {
            if let gst::MessageView::Error(err) = msg.view() {
                return Some(err.error().to_string());
            }
        }
        None
    }
}

impl CameraDevice for GstCameraDevice {
    fn read(&mut self) -> Result<Frame, CameraError> {
        if self.released {
            return Err(CameraError::read_failed(self.index, "device released"));
        }
        let sample = self.appsink.try_pull_sample(self.timeout).ok_or_else(|| {
            let reason = self
                .bus_error()
                .unwrap_or_else(|| "no sample before timeout".to_string());
            CameraError::read_failed(self.index, reason)
        })?;

        let (pixels, width, height) = sample_to_pixels(&sample)
            .map_err(|reason| CameraError::read_failed(self.index, reason))?;
        Frame::from_rgb(width, height, pixels, self.index)
            .ok_or_else(|| CameraError::read_failed(self.index, "short frame buffer"))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(camera = self.index, error = ?e, "Failed to release camera pipeline");
        } else {
            tracing::debug!(camera = self.index, "Camera pipeline released");
        }
    }
}

impl Drop for GstCameraDevice {
    fn drop(&mut self) {
        self.release();
    }
}

fn launch_description(index: u32, format: &CaptureFormat) -> String {
    let fps = format.fps.clamp(1, 60);
    format!(
        "{} ! videoconvert ! videoscale ! videorate ! video/x-raw,format=RGB,width={},height={},framerate={fps}/1 ! appsink name=sink sync=false max-buffers=1 drop=true",
        source_element(index),
        format.width,
        format.height,
    )
}

fn source_element(index: u32) -> String {
    if cfg!(target_os = "windows") {
        format!("ksvideosrc device-index={index}")
    } else if cfg!(target_os = "macos") {
        format!("avfvideosrc device-index={index}")
    } else {
        format!("v4l2src device=/dev/video{index}")
    }
}

fn sample_to_pixels(sample: &gst::Sample) -> Result<(Vec<u8>, u32, u32), String> {
    let buffer = sample.buffer().ok_or("sample missing buffer")?;
    let caps = sample.caps().ok_or("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| format!("caps are not raw video: {e}"))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| format!("failed to map buffer: {e}"))?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or("buffer row is out of bounds")?;
        pixels.extend_from_slice(line);
    }
    Ok((pixels, width, height))
}

fn init_gstreamer() -> Result<(), String> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    GST_INIT
        .get_or_init(|| gst::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| format!("Failed to initialize GStreamer: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_requests_rgb_at_configured_size() {
        let format = CaptureFormat {
            width: 640,
            height: 480,
            fps: 30,
            ..CaptureFormat::default()
        };
        let launch = launch_description(2, &format);
        assert!(launch.contains("video/x-raw,format=RGB,width=640,height=480,framerate=30/1"));
        assert!(launch.ends_with("appsink name=sink sync=false max-buffers=1 drop=true"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_uses_v4l2_device_node() {
        assert_eq!(source_element(1), "v4l2src device=/dev/video1");
    }
}
