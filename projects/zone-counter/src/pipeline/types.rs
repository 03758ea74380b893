use crate::pipeline::detection::TrackedBox;
use crate::pipeline::queue::QueueDepth;
use crate::zones::StatsSnapshot;
use opencv::core::Mat;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A frame read from the video source, already resized to the working resolution
pub struct FrameEnvelope {
    pub id: u64,
    pub mat: Mat,
    pub captured_at: Instant,
}

/// A frame after the detector has run on it
pub struct DetectionResult {
    pub frame: FrameEnvelope,
    pub tracks: Vec<TrackedBox>,
    pub latency: Duration,
}

/// Frame with overlays burned in, paired with the counters it shows
pub struct AnnotatedFrame {
    pub frame_id: u64,
    pub image: Mat,
    pub stats: StatsSnapshot,
}

/// Run state shared between the workers, the monitor and the host
#[derive(Debug)]
pub struct PipelineState {
    /// Cleared once on stop; every loop checks it
    pub is_active: AtomicBool,
    pub frames_captured: AtomicUsize,
    pub frames_detected: AtomicUsize,
    pub frames_published: AtomicUsize,
    started_at: RwLock<Instant>,
    latencies_ms: Mutex<VecDeque<f64>>,
    latency_window: usize,
}

impl PipelineState {
    pub fn new(latency_window: usize) -> Self {
        Self {
            is_active: AtomicBool::new(false),
            frames_captured: AtomicUsize::new(0),
            frames_detected: AtomicUsize::new(0),
            frames_published: AtomicUsize::new(0),
            started_at: RwLock::new(Instant::now()),
            latencies_ms: Mutex::new(VecDeque::with_capacity(latency_window)),
            latency_window: latency_window.max(1),
        }
    }

    pub fn mark_started(&self) {
        *self.started_at.write() = Instant::now();
        self.is_active.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Relaxed)
    }

    /// Record one detector call, keeping only the most recent window of samples.
    pub fn record_latency(&self, latency: Duration) {
        let mut samples = self.latencies_ms.lock();
        samples.push_back(latency.as_secs_f64() * 1000.0);
        while samples.len() > self.latency_window {
            samples.pop_front();
        }
    }

    pub fn latency_samples(&self) -> usize {
        self.latencies_ms.lock().len()
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        let samples = self.latencies_ms.lock();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    pub fn performance_report(&self, queues: [QueueDepth; 3]) -> PerformanceReport {
        let mean_latency_ms = self.mean_latency_ms();
        let instant_fps = match mean_latency_ms {
            Some(ms) if ms > 0.0 => 1000.0 / ms,
            _ => 0.0,
        };
        let elapsed = self.started_at.read().elapsed().as_secs_f64();
        let frames_detected = self.frames_detected.load(Ordering::Relaxed);
        let average_fps = if elapsed > 0.0 {
            frames_detected as f64 / elapsed
        } else {
            0.0
        };
        let [capture_queue, result_queue, output_queue] = queues;

        PerformanceReport {
            mean_latency_ms,
            instant_fps,
            average_fps,
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_detected,
            frames_published: self.frames_published.load(Ordering::Relaxed),
            capture_queue,
            result_queue,
            output_queue,
        }
    }
}

/// Observability snapshot produced by the monitor and on demand
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub mean_latency_ms: Option<f64>,
    /// Reciprocal of the mean detector latency
    pub instant_fps: f64,
    /// Detected frames per second since start
    pub average_fps: f64,
    pub frames_captured: usize,
    pub frames_detected: usize,
    pub frames_published: usize,
    pub capture_queue: QueueDepth,
    pub result_queue: QueueDepth,
    pub output_queue: QueueDepth,
}

/// FPS shown on the overlay: reciprocal of a single frame's latency
pub fn fps_from_latency(latency: Duration) -> f64 {
    let secs = latency.as_secs_f64();
    if secs > 0.0 {
        1.0 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(len: usize) -> QueueDepth {
        QueueDepth {
            len,
            capacity: 5,
            dropped: 0,
        }
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let state = PipelineState::new(100);
        for i in 0..250 {
            state.record_latency(Duration::from_millis(i));
        }
        assert_eq!(state.latency_samples(), 100);
        // Samples 150..250 remain
        let mean = state.mean_latency_ms().unwrap();
        assert!((mean - 199.5).abs() < 1e-6);
    }

    #[test]
    fn test_report_without_samples() {
        let state = PipelineState::new(10);
        let report = state.performance_report([depth(0), depth(1), depth(2)]);
        assert_eq!(report.mean_latency_ms, None);
        assert_eq!(report.instant_fps, 0.0);
        assert_eq!(report.result_queue.len, 1);
        assert_eq!(report.output_queue.len, 2);
    }

    #[test]
    fn test_report_fps() {
        let state = PipelineState::new(10);
        state.mark_started();
        state.record_latency(Duration::from_millis(40));
        state.record_latency(Duration::from_millis(60));
        state.frames_detected.store(2, Ordering::Relaxed);

        let report = state.performance_report([depth(0), depth(0), depth(0)]);
        let mean = report.mean_latency_ms.unwrap();
        assert!((mean - 50.0).abs() < 1e-6);
        assert!((report.instant_fps - 20.0).abs() < 1e-6);
        assert!(report.average_fps > 0.0);
        assert!(state.is_active());
    }

    #[test]
    fn test_fps_from_latency() {
        assert!((fps_from_latency(Duration::from_millis(50)) - 20.0).abs() < 1e-9);
        assert_eq!(fps_from_latency(Duration::ZERO), 0.0);
    }
}
