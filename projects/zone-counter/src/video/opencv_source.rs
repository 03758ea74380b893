use super::VideoSource;
use anyhow::{anyhow, Context, Result};
use opencv::{
    core::{Mat, Vector},
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_BUFFERSIZE, CAP_PROP_FPS, CAP_PROP_HW_ACCELERATION,
        VIDEO_ACCELERATION_ANY,
    },
};

/// Camera index (`"0"`), file path or stream URL opened through OpenCV.
///
/// The capture is opened on first read and dropped after a failed read, so the
/// next read reopens it. That lets a dropped network stream recover.
pub struct OpencvSource {
    location: String,
    capture: Option<VideoCapture>,
}

impl OpencvSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            capture: None,
        }
    }

    fn ensure_open(&mut self) -> Result<&mut VideoCapture> {
        if self.capture.is_none() {
            self.capture = Some(open_capture(&self.location)?);
        }
        self.capture
            .as_mut()
            .ok_or_else(|| anyhow!("Capture for {} is not open", self.location))
    }
}

/// Open-time properties; hardware decoding is only honoured when requested here.
fn capture_params() -> Vector<i32> {
    Vector::from_slice(&[CAP_PROP_HW_ACCELERATION, VIDEO_ACCELERATION_ANY])
}

fn open_capture(location: &str) -> Result<VideoCapture> {
    let params = capture_params();
    let mut capture = match location.parse::<i32>() {
        Ok(index) => VideoCapture::new_with_params(index, CAP_ANY, &params)?,
        Err(_) => VideoCapture::from_file_with_params(location, CAP_ANY, &params)?,
    };
    if !capture.is_opened()? {
        return Err(anyhow!("Failed to open video source: {}", location));
    }

    // Keep the driver buffer minimal so reads return the freshest frame
    if let Ok(false) | Err(_) = capture.set(CAP_PROP_BUFFERSIZE, 1.0) {
        tracing::debug!("OpencvSource: buffer size hint not supported for {}", location);
    }

    let hw = capture.get(CAP_PROP_HW_ACCELERATION).unwrap_or(0.0);
    let fps = capture.get(CAP_PROP_FPS).context("Failed to query source FPS")?;

    tracing::info!(
        "OpencvSource: opened {}, source_fps={:.2}, hw_accel={}",
        location,
        fps,
        hw
    );
    Ok(capture)
}

impl VideoSource for OpencvSource {
    fn read_frame(&mut self) -> Result<Mat> {
        let capture = self.ensure_open()?;

        let mut frame = Mat::default();
        let success = capture.read(&mut frame)?;
        if !success || frame.empty() {
            self.release();
            return Err(anyhow!("Failed to read frame from {}", self.location));
        }
        Ok(frame)
    }

    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!("OpencvSource: release failed for {}: {}", self.location, e);
            }
        }
    }
}
