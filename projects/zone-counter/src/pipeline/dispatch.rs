use crate::pipeline::detection::Detector;
use crate::pipeline::queue::{PushOutcome, StageQueue};
use crate::pipeline::types::{DetectionResult, FrameEnvelope, PipelineState};
use anyhow::Result;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// Run the detector on one frame and time it.
///
/// A detector error or panic drops the frame; the caller moves on to the next one.
pub fn dispatch_frame(
    detector: &mut dyn Detector,
    frame: FrameEnvelope,
    state: &PipelineState,
) -> Option<DetectionResult> {
    let start_inst = Instant::now();
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&frame.mat))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            tracing::error!(
                "Detector panicked on frame {}: {}",
                frame.id,
                panic_message(payload.as_ref())
            );
            return None;
        }
    };

    match outcome {
        Ok(tracks) => {
            let latency = start_inst.elapsed();
            state.record_latency(latency);
            state.frames_detected.fetch_add(1, Ordering::Relaxed);
            Some(DetectionResult {
                frame,
                tracks,
                latency,
            })
        }
        Err(e) => {
            tracing::warn!("Detection failed on frame {}: {:#}", frame.id, e);
            None
        }
    }
}

/// Worker that owns the detector and calls it serially, one frame at a time.
pub fn dispatch_worker(
    mut detector: Box<dyn Detector>,
    input: Arc<StageQueue<FrameEnvelope>>,
    output: Arc<StageQueue<DetectionResult>>,
    state: Arc<PipelineState>,
    poll_timeout: Duration,
) -> Result<()> {
    while state.is_active() {
        let Some(frame) = input.pop_timeout(poll_timeout) else {
            continue;
        };

        if let Some(result) = dispatch_frame(detector.as_mut(), frame, &state) {
            let frame_id = result.frame.id;
            if output.push(result) == PushOutcome::DroppedNewest {
                tracing::debug!("Dispatch: dropped result for frame {}", frame_id);
            }
        }
    }

    Ok(())
}
