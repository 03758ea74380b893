// Pipeline orchestrator: owns the stage queues and workers, and is the single
// entry point hosts use for zone edits, stats and the latest annotated frame.

use crate::config::PipelineConfig;
use crate::error::ZoneError;
use crate::pipeline::annotate::{annotate_worker, OverlayQueues};
use crate::pipeline::capture::capture_worker;
use crate::pipeline::detection::Detector;
use crate::pipeline::dispatch::dispatch_worker;
use crate::pipeline::monitor::{monitor_worker, QueueProbe};
use crate::pipeline::output::{
    sink_worker, FrameCursor, LatestOutput, OutputStage, SinkFeed, SinkWriter,
};
use crate::pipeline::queue::StageQueue;
use crate::pipeline::types::{PerformanceReport, PipelineState};
use crate::video::{OutputSink, ResourceHandle, VideoSource};
use crate::zones::{StatsSnapshot, ZoneId, ZoneRegistry, ZoneSpec, ZoneUpdate, ZoneView};
use anyhow::{bail, Context, Result};
use crossbeam::channel::Receiver;
use opencv::core::Mat;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL: Duration = Duration::from_millis(5);

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
}

enum Lifecycle {
    Idle {
        detector: Box<dyn Detector>,
        sink_rx: Option<Receiver<Mat>>,
    },
    Running(Vec<Worker>),
    Stopped,
}

fn spawn_worker<F>(name: &'static str, work: F) -> Result<Worker>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("{}-worker", name))
        .spawn(move || {
            tracing::info!("Spawning new {} worker", name);
            if let Err(e) = work() {
                tracing::error!("{} worker failed: {:#}", name, e);
            } else {
                tracing::info!("{} worker finished gracefully", name);
            }
        })
        .with_context(|| format!("Failed to spawn {} worker", name))?;
    Ok(Worker { name, handle })
}

/// Wait up to `timeout` for a worker; a worker still running after that is detached.
fn join_with_timeout(worker: Worker, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !worker.handle.is_finished() && Instant::now() < deadline {
        thread::sleep(JOIN_POLL);
    }

    if worker.handle.is_finished() {
        if worker.handle.join().is_err() {
            tracing::error!("{} worker panicked", worker.name);
        }
    } else {
        tracing::warn!(
            "{} worker did not stop within {:?}, detaching it",
            worker.name,
            timeout
        );
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    registry: Arc<ZoneRegistry>,
    state: Arc<PipelineState>,
    probe: QueueProbe,
    source: ResourceHandle<dyn VideoSource>,
    sink: Option<ResourceHandle<dyn OutputSink>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn VideoSource>,
        detector: Box<dyn Detector>,
        sink: Option<Box<dyn OutputSink>>,
    ) -> Self {
        let capture = Arc::new(StageQueue::new(
            "capture",
            config.queue_capacity,
            config.drop_policy,
        ));
        let results = Arc::new(StageQueue::new(
            "results",
            config.queue_capacity,
            config.drop_policy,
        ));

        let sink = sink.map(ResourceHandle::new);
        let (feed, sink_rx) = match &sink {
            Some(_) => {
                let (feed, rx) = SinkFeed::channel(config.frame_interval());
                (Some(feed), Some(rx))
            }
            None => (None, None),
        };
        let output = Arc::new(OutputStage::new(config.queue_capacity, feed));

        Self {
            registry: Arc::new(ZoneRegistry::new(config.history_len)),
            state: Arc::new(PipelineState::new(config.latency_window)),
            probe: QueueProbe {
                capture,
                results,
                output,
            },
            source: ResourceHandle::new(source),
            sink,
            lifecycle: Mutex::new(Lifecycle::Idle { detector, sink_rx }),
            config,
        }
    }

    /// Launch capture, dispatch, counting and monitor workers, plus the sink worker
    /// when an output sink is configured.
    ///
    /// Starting a running pipeline is a no-op; a stopped pipeline cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        let (detector, sink_rx) = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle { detector, sink_rx } => (detector, sink_rx),
            Lifecycle::Running(workers) => {
                *lifecycle = Lifecycle::Running(workers);
                return Ok(());
            }
            Lifecycle::Stopped => bail!("Pipeline has been stopped and cannot be restarted"),
        };

        tracing::info!(
            "Starting pipeline: {}x{} @ {} fps, queue capacity {}, {:?}",
            self.config.frame_width,
            self.config.frame_height,
            self.config.target_fps,
            self.config.queue_capacity,
            self.config.drop_policy
        );
        self.state.mark_started();

        let workers = match self.spawn_workers(detector, sink_rx) {
            Ok(workers) => workers,
            Err(e) => {
                self.state.is_active.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        *lifecycle = Lifecycle::Running(workers);
        Ok(())
    }

    fn spawn_workers(
        &self,
        detector: Box<dyn Detector>,
        sink_rx: Option<Receiver<Mat>>,
    ) -> Result<Vec<Worker>> {
        let poll_timeout = self.config.poll_timeout();
        let mut workers = Vec::with_capacity(5);

        let (source, queue, state, config) = (
            self.source.clone(),
            self.probe.capture.clone(),
            self.state.clone(),
            self.config.clone(),
        );
        workers.push(spawn_worker("capture", move || {
            capture_worker(source, queue, state, config)
        })?);

        let (input, output, state) = (
            self.probe.capture.clone(),
            self.probe.results.clone(),
            self.state.clone(),
        );
        workers.push(spawn_worker("dispatch", move || {
            dispatch_worker(detector, input, output, state, poll_timeout)
        })?);

        let (input, registry, output, state) = (
            self.probe.results.clone(),
            self.registry.clone(),
            self.probe.output.clone(),
            self.state.clone(),
        );
        let queues = OverlayQueues {
            capture: self.probe.capture.clone(),
            results: self.probe.results.clone(),
        };
        workers.push(spawn_worker("annotate", move || {
            annotate_worker(input, registry, output, queues, state, poll_timeout)
        })?);

        let (probe, state, interval) = (
            self.probe.clone(),
            self.state.clone(),
            self.config.monitor_interval(),
        );
        workers.push(spawn_worker("monitor", move || {
            monitor_worker(probe, state, interval, poll_timeout)
        })?);

        if let (Some(rx), Some(sink)) = (sink_rx, &self.sink) {
            let (writer, state) = (
                SinkWriter::new(sink.clone(), self.config.target_fps),
                self.state.clone(),
            );
            workers.push(spawn_worker("sink", move || {
                sink_worker(rx, writer, state, poll_timeout)
            })?);
        }

        Ok(workers)
    }

    /// Clear the stop flag, join every worker with a bounded wait, then release
    /// the source and sink whether or not the joins succeeded. Idempotent.
    pub fn stop(&self) {
        let workers = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(workers) => workers,
                Lifecycle::Idle { .. } => Vec::new(),
                Lifecycle::Stopped => return,
            }
        };

        tracing::info!("Stopping pipeline");
        self.state.is_active.store(false, Ordering::SeqCst);

        let timeout = self.config.join_timeout();
        for worker in workers {
            join_with_timeout(worker, timeout);
        }

        if !self.source.release_with(timeout, |source| source.release()) {
            tracing::warn!("Video source still busy after {:?}, leaving it to drop", timeout);
        }
        if let Some(sink) = &self.sink {
            if !sink.release_with(timeout, |sink| sink.release()) {
                tracing::warn!("Output sink still busy after {:?}, leaving it to drop", timeout);
            }
        }

        log_final_stats(&self.registry.stats());
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    pub fn add_zone(&self, spec: ZoneSpec) -> Result<ZoneId, ZoneError> {
        self.registry.add_zone(spec)
    }

    pub fn update_zone(&self, id: ZoneId, update: ZoneUpdate) -> Result<(), ZoneError> {
        self.registry.update_zone(id, update)
    }

    pub fn delete_zone(&self, id: ZoneId) -> Result<(), ZoneError> {
        self.registry.delete_zone(id)
    }

    pub fn replace_all_zones(&self, specs: Vec<ZoneSpec>) -> Result<Vec<ZoneId>, ZoneError> {
        self.registry.replace_all_zones(specs)
    }

    pub fn zones(&self) -> Vec<ZoneView> {
        self.registry.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.registry.stats()
    }

    /// Newest annotated frame this cursor has not yet seen, with its stats.
    ///
    /// When there is nothing new, `frame` is `None` and the stats are read
    /// straight from the registry.
    pub fn latest_frame_and_stats(&self, cursor: &mut FrameCursor) -> Result<LatestOutput> {
        self.probe.output.poll(cursor, || self.registry.stats())
    }

    pub fn performance(&self) -> PerformanceReport {
        self.state.performance_report(self.probe.depths())
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn log_final_stats(stats: &StatsSnapshot) {
    for (id, zone) in &stats.zones {
        tracing::info!(
            "Zone {} ({}): {} in, {} out, {} inside",
            id,
            zone.name,
            zone.entries,
            zone.exits,
            zone.current
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detection::TrackedBox;
    use opencv::core::{Mat, Scalar, CV_8UC3};
    use std::sync::atomic::AtomicBool;

    struct StubSource {
        released: Arc<AtomicBool>,
        fail: bool,
    }

    impl VideoSource for StubSource {
        fn read_frame(&mut self) -> Result<Mat> {
            if self.fail {
                bail!("no signal");
            }
            Ok(Mat::new_rows_cols_with_default(
                24,
                32,
                CV_8UC3,
                Scalar::all(0.0),
            )?)
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            target_fps: 100.0,
            frame_width: 32,
            frame_height: 24,
            read_retry_ms: 5,
            poll_timeout_ms: 10,
            join_timeout_ms: 200,
            ..PipelineConfig::default()
        }
    }

    fn pipeline(fail: bool, detector: Box<dyn Detector>) -> (Pipeline, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let source = StubSource {
            released: released.clone(),
            fail,
        };
        (
            Pipeline::new(fast_config(), Box::new(source), detector, None),
            released,
        )
    }

    fn no_tracks() -> Box<dyn Detector> {
        Box::new(|_: &Mat| -> Result<Vec<TrackedBox>> { Ok(Vec::new()) })
    }

    #[test]
    fn test_stop_without_start_releases_source() {
        let (pipeline, released) = pipeline(false, no_tracks());
        pipeline.stop();
        assert!(released.load(Ordering::SeqCst));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_stop_twice_is_prompt() {
        let (pipeline, released) = pipeline(true, no_tracks());
        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        thread::sleep(Duration::from_millis(30));

        let begin = Instant::now();
        pipeline.stop();
        pipeline.stop();
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert!(released.load(Ordering::SeqCst));
        assert!(!pipeline.state().is_active());
    }

    #[test]
    fn test_start_after_stop_is_rejected() {
        let (pipeline, _) = pipeline(false, no_tracks());
        pipeline.start().unwrap();
        pipeline.start().unwrap();
        pipeline.stop();
        assert!(pipeline.start().is_err());
    }

    #[test]
    fn test_hung_detector_does_not_block_release() {
        let detector: Box<dyn Detector> = Box::new(|_: &Mat| -> Result<Vec<TrackedBox>> {
            thread::sleep(Duration::from_secs(3));
            Ok(Vec::new())
        });
        let (pipeline, released) = pipeline(false, detector);
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let begin = Instant::now();
        pipeline.stop();
        // Four bounded joins at most, well under the detector's sleep
        assert!(begin.elapsed() < Duration::from_millis(2500));
        assert!(released.load(Ordering::SeqCst));
    }

    struct SlowSource {
        reading: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
    }

    impl VideoSource for SlowSource {
        fn read_frame(&mut self) -> Result<Mat> {
            self.reading.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(600));
            Ok(Mat::new_rows_cols_with_default(
                24,
                32,
                CV_8UC3,
                Scalar::all(0.0),
            )?)
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_source_released_after_read_outlives_stop() {
        let reading = Arc::new(AtomicBool::new(false));
        let released = Arc::new(AtomicBool::new(false));
        let source = SlowSource {
            reading: reading.clone(),
            released: released.clone(),
        };
        let config = PipelineConfig {
            join_timeout_ms: 100,
            ..fast_config()
        };
        let pipeline = Pipeline::new(config, Box::new(source), no_tracks(), None);
        pipeline.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !reading.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "capture never started a read");
            thread::sleep(Duration::from_millis(2));
        }

        // stop gives up on the capture worker and the source lock while the read sleeps
        pipeline.stop();
        assert!(!pipeline.is_running());

        let deadline = Instant::now() + Duration::from_secs(2);
        while !released.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "source was never released");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_zone_edits_while_idle() {
        let (pipeline, _) = pipeline(false, no_tracks());
        let id = pipeline
            .add_zone(ZoneSpec::new(vec![[0, 0], [10, 0], [10, 10]]))
            .unwrap();
        assert_eq!(pipeline.zones().len(), 1);
        assert!(pipeline.stats().get(id).is_some());
        assert_eq!(
            pipeline.delete_zone(id + 1),
            Err(ZoneError::NotFound(id + 1))
        );

        let mut cursor = FrameCursor::default();
        let latest = pipeline.latest_frame_and_stats(&mut cursor).unwrap();
        assert!(latest.frame.is_none());
        assert_eq!(latest.stats.zones.len(), 1);
    }
}
