// Latest-wins output stage shared by the counting worker and any number of consumers

use crate::config::DropPolicy;
use crate::pipeline::queue::{QueueDepth, StageQueue};
use crate::pipeline::types::{AnnotatedFrame, PipelineState};
use crate::video::{OutputSink, ResourceHandle};
use crate::zones::StatsSnapshot;
use anyhow::{anyhow, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SINK_REOPEN_DELAY: Duration = Duration::from_secs(1);

struct Published {
    seq: u64,
    frame: AnnotatedFrame,
}

/// Per-consumer read position; each consumer sees a given frame at most once.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCursor {
    last_seq: u64,
}

/// Result of a poll: the freshest unseen frame (if any) and the stats to show with it.
pub struct LatestOutput {
    pub frame: Option<AnnotatedFrame>,
    pub stats: StatsSnapshot,
}

/// Counting-thread side of the sink: paces frames and hands them to the sink
/// worker without ever waiting on it.
///
/// The channel holds a single frame. While the sink is busy opening or writing,
/// new frames are dropped.
pub struct SinkFeed {
    tx: Sender<Mat>,
    interval: Duration,
    last_sent: Option<Instant>,
}

impl SinkFeed {
    pub fn channel(interval: Duration) -> (Self, Receiver<Mat>) {
        let (tx, rx) = channel::bounded(1);
        let feed = Self {
            tx,
            interval,
            last_sent: None,
        };
        (feed, rx)
    }

    /// Returns true when the frame was queued for the sink.
    pub fn offer(&mut self, frame: &Mat) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }

        let copy = match frame.try_clone() {
            Ok(copy) => copy,
            Err(e) => {
                tracing::warn!("Output sink: failed to copy frame: {}", e);
                return false;
            }
        };
        match self.tx.try_send(copy) {
            Ok(()) => {
                self.last_sent = Some(now);
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Output sink busy, dropping frame");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Best-effort writes to the output sink, run on the sink worker.
///
/// The sink is opened on the first frame, with that frame's size. A failed
/// open is retried no sooner than `SINK_REOPEN_DELAY` later; frames arriving
/// in between are discarded.
pub struct SinkWriter {
    sink: ResourceHandle<dyn OutputSink>,
    fps: f64,
    next_open_attempt: Option<Instant>,
}

impl SinkWriter {
    pub fn new(sink: ResourceHandle<dyn OutputSink>, fps: f64) -> Self {
        Self {
            sink,
            fps,
            next_open_attempt: None,
        }
    }

    /// Returns true when the frame reached the sink.
    pub fn write(&mut self, frame: &Mat) -> bool {
        let now = Instant::now();
        if matches!(self.next_open_attempt, Some(at) if now < at) {
            return false;
        }

        let mut guard = self.sink.lock();
        let Some(sink) = guard.as_mut() else {
            return false;
        };

        if !sink.is_open() {
            let opened = frame
                .size()
                .map_err(anyhow::Error::from)
                .and_then(|size| sink.open(size, self.fps));
            if let Err(e) = opened {
                tracing::warn!("Output sink unavailable: {:#}", e);
                self.next_open_attempt = Some(Instant::now() + SINK_REOPEN_DELAY);
                return false;
            }
            self.next_open_attempt = None;
        }

        match sink.write(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Output sink write failed: {:#}", e);
                false
            }
        }
    }
}

/// Sink worker: drains the feed channel and writes each frame.
///
/// Releases the sink on exit.
pub fn sink_worker(
    rx: Receiver<Mat>,
    mut writer: SinkWriter,
    state: Arc<PipelineState>,
    poll_timeout: Duration,
) -> Result<()> {
    while state.is_active() {
        match rx.recv_timeout(poll_timeout) {
            Ok(frame) => {
                writer.write(&frame);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !writer.sink.release_with(poll_timeout, |sink| sink.release()) {
        tracing::warn!("Output sink still busy on exit, leaving it to drop");
    }
    Ok(())
}

/// Bounded queue of annotated frames (oldest evicted first) plus the last
/// frame any consumer has drained from it.
pub struct OutputStage {
    queue: StageQueue<Published>,
    latest: Mutex<Option<Published>>,
    next_seq: AtomicU64,
    sink: Option<Mutex<SinkFeed>>,
}

impl OutputStage {
    pub fn new(capacity: usize, sink: Option<SinkFeed>) -> Self {
        Self {
            queue: StageQueue::new("output", capacity, DropPolicy::DropOldest),
            latest: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            sink: sink.map(Mutex::new),
        }
    }

    /// Offer a finished frame to the sink (paced, never waits) and make it the newest output.
    pub fn publish(&self, frame: AnnotatedFrame) {
        if let Some(sink) = &self.sink {
            sink.lock().offer(&frame.image);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.queue.push(Published { seq, frame });
    }

    /// Freshest frame this cursor has not seen yet, or `None` plus `fallback()` stats.
    pub fn poll<F>(&self, cursor: &mut FrameCursor, fallback: F) -> Result<LatestOutput>
    where
        F: FnOnce() -> StatsSnapshot,
    {
        let mut latest = self.latest.lock();
        if let Some(newest) = self.queue.drain().pop() {
            *latest = Some(newest);
        }

        match latest.as_ref() {
            Some(published) if published.seq > cursor.last_seq => {
                let frame = AnnotatedFrame {
                    frame_id: published.frame.frame_id,
                    image: published.frame.image.try_clone()?,
                    stats: published.frame.stats.clone(),
                };
                cursor.last_seq = published.seq;
                Ok(LatestOutput {
                    stats: frame.stats.clone(),
                    frame: Some(frame),
                })
            }
            _ => Ok(LatestOutput {
                frame: None,
                stats: fallback(),
            }),
        }
    }

    pub fn depth(&self) -> QueueDepth {
        self.queue.depth()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// JPEG-encode a frame for transports that want compressed bytes.
pub fn encode_jpeg(frame: &Mat, quality: i32) -> Result<Vec<u8>> {
    if frame.empty() {
        return Err(anyhow!("Cannot encode an empty frame"));
    }
    let mut buf = Vector::<u8>::new();
    let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    if !imgcodecs::imencode(".jpg", frame, &mut buf, &params)? {
        return Err(anyhow!("JPEG encoding failed"));
    }
    Ok(buf.to_vec())
}
