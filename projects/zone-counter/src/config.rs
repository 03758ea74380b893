use crate::zones::ZoneSpec;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// What a stage does when its output queue is full. Pushing never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Discard the item being pushed; frames already queued keep their place
    #[default]
    DropNewest,
    /// Evict the oldest queued item to make room for the new one
    DropOldest,
}

/// Tunables for the capture → detect → count → output pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub target_fps: f64,
    /// Capacity of each inter-stage queue
    pub queue_capacity: usize,
    /// Working resolution every captured frame is resized to
    pub frame_width: i32,
    pub frame_height: i32,
    pub drop_policy: DropPolicy,
    pub read_retry_ms: u64,
    /// How long a stage blocks on an empty input queue before re-checking the stop flag
    pub poll_timeout_ms: u64,
    /// Per-stage wait during shutdown
    pub join_timeout_ms: u64,
    pub monitor_interval_ms: u64,
    /// Number of detector latency samples kept for the monitor
    pub latency_window: usize,
    /// Observations kept per (track, zone)
    pub history_len: usize,
    pub output_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            queue_capacity: 5,
            frame_width: 1280,
            frame_height: 720,
            drop_policy: DropPolicy::DropNewest,
            read_retry_ms: 100,
            poll_timeout_ms: 100,
            join_timeout_ms: 1000,
            monitor_interval_ms: 5000,
            latency_window: 100,
            history_len: crate::zones::occupancy::DEFAULT_HISTORY_LEN,
            output_url: None,
        }
    }
}

impl PipelineConfig {
    /// Minimum spacing between captured (and sink-written) frames.
    /// Zero fps means unpaced; a rate too low to represent saturates.
    pub fn frame_interval(&self) -> Duration {
        if self.target_fps > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.target_fps).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_fps.is_finite() || self.target_fps < 0.0 {
            bail!("target_fps must be a finite, non-negative number, got {}", self.target_fps);
        }
        if self.frame_width <= 0 || self.frame_height <= 0 {
            bail!(
                "frame size must be positive, got {}x{}",
                self.frame_width,
                self.frame_height
            );
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

/// Read a `PipelineConfig` from a JSON file; absent keys take their defaults.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: PipelineConfig = serde_json::from_str(&content)
        .with_context(|| format!("Invalid config file {:?}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {:?}", path))?;
    Ok(config)
}

/// Read the initial zone list: a JSON array of zone definitions.
pub fn load_zone_specs(path: &Path) -> Result<Vec<ZoneSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read zones file {:?}", path))?;
    let specs: Vec<ZoneSpec> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid zones file {:?}", path))?;
    tracing::info!("Loaded {} zones from {:?}", specs.len(), path);
    Ok(specs)
}
