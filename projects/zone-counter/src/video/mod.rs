pub mod handle;
pub mod opencv_source;
pub mod opencv_sink;

use anyhow::Result;
use opencv::core::{Mat, Size};

pub use handle::ResourceHandle;

/// Frame source. A failed read is an `Err` and is retried by the capture stage.
pub trait VideoSource: Send {
    fn read_frame(&mut self) -> Result<Mat>;
    /// Free the underlying device or stream. Must be safe to call more than once.
    fn release(&mut self);
}

/// Continuous consumer of annotated frames (file, RTMP/RTSP URL, ...).
pub trait OutputSink: Send {
    fn open(&mut self, frame_size: Size, fps: f64) -> Result<()>;
    fn is_open(&self) -> bool;
    fn write(&mut self, frame: &Mat) -> Result<()>;
    fn release(&mut self);
}
