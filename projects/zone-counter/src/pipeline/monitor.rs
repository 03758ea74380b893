use crate::pipeline::output::OutputStage;
use crate::pipeline::queue::{QueueDepth, StageQueue};
use crate::pipeline::types::{DetectionResult, FrameEnvelope, PerformanceReport, PipelineState};
use anyhow::Result;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Read-only view of the three stage queues, for depth sampling
#[derive(Clone)]
pub struct QueueProbe {
    pub capture: Arc<StageQueue<FrameEnvelope>>,
    pub results: Arc<StageQueue<DetectionResult>>,
    pub output: Arc<OutputStage>,
}

impl QueueProbe {
    pub fn depths(&self) -> [QueueDepth; 3] {
        [self.capture.depth(), self.results.depth(), self.output.depth()]
    }
}

pub fn log_report(report: &PerformanceReport) {
    match report.mean_latency_ms {
        Some(latency) => tracing::info!(
            "Performance: latency {:.1}ms, fps {:.1} (avg {:.1}), frames {}/{}/{}, queues {}/{}/{}",
            latency,
            report.instant_fps,
            report.average_fps,
            report.frames_captured,
            report.frames_detected,
            report.frames_published,
            report.capture_queue.len,
            report.result_queue.len,
            report.output_queue.len,
        ),
        None => tracing::info!(
            "Performance: no detections yet, frames captured {}, queues {}/{}/{}",
            report.frames_captured,
            report.capture_queue.len,
            report.result_queue.len,
            report.output_queue.len,
        ),
    }

    let dropped = report.capture_queue.dropped + report.result_queue.dropped;
    if dropped > 0 {
        tracing::debug!(
            "Dropped so far: capture {}, results {}, output {}",
            report.capture_queue.dropped,
            report.result_queue.dropped,
            report.output_queue.dropped
        );
    }
}

/// Periodic performance logger. Sleeps in `poll_timeout` slices so a stop is
/// noticed promptly even with a long reporting interval.
pub fn monitor_worker(
    probe: QueueProbe,
    state: Arc<PipelineState>,
    interval: Duration,
    poll_timeout: Duration,
) -> Result<()> {
    let mut next_report = Instant::now() + interval;

    while state.is_active() {
        let now = Instant::now();
        if now < next_report {
            thread::sleep((next_report - now).min(poll_timeout));
            continue;
        }

        log_report(&state.performance_report(probe.depths()));
        next_report = now + interval;
    }

    Ok(())
}
