// Capture worker: paces reads from the video source and feeds the detection queue

use crate::config::PipelineConfig;
use crate::pipeline::queue::{PushOutcome, StageQueue};
use crate::pipeline::types::{FrameEnvelope, PipelineState};
use crate::video::{ResourceHandle, VideoSource};
use anyhow::Result;
use opencv::core::{Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Resize to the working resolution, skipping the copy when it already matches.
pub fn resize_frame(frame: Mat, size: Size) -> Result<Mat> {
    if frame.size()? == size {
        return Ok(frame);
    }
    let mut resized = Mat::default();
    imgproc::resize(&frame, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
    Ok(resized)
}

/// Reads at most one frame per `1 / target_fps`, against a monotonic clock.
///
/// Read failures are logged and retried after `read_retry` forever; the loop
/// only ends when the stop flag clears or the source handle has been released.
/// The worker releases the source itself on exit.
pub fn capture_worker(
    source: ResourceHandle<dyn VideoSource>,
    queue: Arc<StageQueue<FrameEnvelope>>,
    state: Arc<PipelineState>,
    config: PipelineConfig,
) -> Result<()> {
    let interval = config.frame_interval();
    let working_size = Size::new(config.frame_width, config.frame_height);
    let mut last_capture: Option<Instant> = None;
    let mut next_id: u64 = 0;

    while state.is_active() {
        if let Some(prev) = last_capture {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                thread::sleep((interval - elapsed).min(config.poll_timeout()));
                continue;
            }
        }

        let now = Instant::now();
        let read = {
            let mut guard = source.lock();
            match guard.as_mut() {
                Some(source) => source.read_frame(),
                None => {
                    tracing::info!("Capture: source released, exiting");
                    break;
                }
            }
        };

        let raw = match read {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Capture: {:#}; retrying in {:?}", e, config.read_retry());
                thread::sleep(config.read_retry());
                continue;
            }
        };

        let mat = match resize_frame(raw, working_size) {
            Ok(mat) => mat,
            Err(e) => {
                tracing::warn!("Capture: failed to resize frame: {:#}", e);
                continue;
            }
        };

        state.frames_captured.fetch_add(1, Ordering::Relaxed);
        let outcome = queue.push(FrameEnvelope {
            id: next_id,
            mat,
            captured_at: now,
        });
        if outcome == PushOutcome::DroppedNewest {
            tracing::debug!("Capture: dropped frame {}", next_id);
        }

        next_id += 1;
        last_capture = Some(now);
    }

    if !source.release_with(config.join_timeout(), |source| source.release()) {
        tracing::warn!("Capture: source still busy on exit, leaving it to drop");
    }
    Ok(())
}
