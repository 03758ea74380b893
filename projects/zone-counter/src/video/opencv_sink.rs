use super::OutputSink;
use anyhow::{anyhow, Result};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::VideoWriter,
};

/// H.264 writer to a file path or streaming URL understood by OpenCV's backends.
pub struct OpencvSink {
    url: String,
    writer: Option<VideoWriter>,
}

impl OpencvSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            writer: None,
        }
    }
}

impl OutputSink for OpencvSink {
    fn open(&mut self, frame_size: Size, fps: f64) -> Result<()> {
        let fourcc = VideoWriter::fourcc('a', 'v', 'c', '1')?;
        let writer = VideoWriter::new(&self.url, fourcc, fps, frame_size, true)?;
        if !writer.is_opened()? {
            return Err(anyhow!("Failed to open output sink: {}", self.url));
        }
        tracing::info!(
            "OpencvSink: writing {}x{} @ {:.1} fps to {}",
            frame_size.width,
            frame_size.height,
            fps,
            self.url
        );
        self.writer = Some(writer);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn write(&mut self, frame: &Mat) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("Output sink {} is not open", self.url))?;
        writer.write(frame)?;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.release() {
                tracing::warn!("OpencvSink: release failed for {}: {}", self.url, e);
            }
        }
    }
}
