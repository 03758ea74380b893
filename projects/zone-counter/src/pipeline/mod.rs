// Video processing pipeline: capture -> detection -> counting/annotation -> output

pub mod annotate;
pub mod capture;
pub mod detection;
pub mod dispatch;
pub mod monitor;
pub mod orchestrator;
pub mod output;
pub mod queue;
pub mod types;

pub use detection::{Detector, ReplayDetector, TrackedBox};
pub use orchestrator::Pipeline;
pub use output::{encode_jpeg, FrameCursor, LatestOutput};
pub use types::PerformanceReport;
