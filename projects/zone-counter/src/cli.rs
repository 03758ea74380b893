use crate::config::{load_config, DropPolicy, PipelineConfig};
use anyhow::Result;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = 12206)]
    pub port: u16,

    /// Camera index ("0") or video URL / file path
    #[arg(long, env = "ZONE_COUNTER_SOURCE", default_value = "0")]
    pub source: String,

    /// JSON pipeline configuration; flags below override it
    #[arg(long, env = "ZONE_COUNTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON array of zones to start with
    #[arg(long, env = "ZONE_COUNTER_ZONES")]
    pub zones_file: Option<PathBuf>,

    /// Recorded tracker output, one JSON array of boxes per line
    #[arg(long, env = "ZONE_COUNTER_DETECTIONS")]
    pub detections: Option<PathBuf>,

    /// Where to stream annotated video (file path or URL)
    #[arg(long, env = "ZONE_COUNTER_OUTPUT_URL")]
    pub output_url: Option<String>,

    #[arg(long, env = "ZONE_COUNTER_TARGET_FPS")]
    pub target_fps: Option<f64>,

    #[arg(long, env = "ZONE_COUNTER_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    #[arg(long, env = "ZONE_COUNTER_WIDTH")]
    pub width: Option<i32>,

    #[arg(long, env = "ZONE_COUNTER_HEIGHT")]
    pub height: Option<i32>,

    #[arg(long, value_enum, env = "ZONE_COUNTER_DROP_POLICY")]
    pub drop_policy: Option<DropPolicy>,

    /// Milliseconds between performance log lines
    #[arg(long, env = "ZONE_COUNTER_MONITOR_INTERVAL_MS")]
    pub monitor_interval_ms: Option<u64>,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Config file (or defaults) with any command-line overrides applied.
    pub fn to_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(fps) = self.target_fps {
            config.target_fps = fps;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(width) = self.width {
            config.frame_width = width;
        }
        if let Some(height) = self.height {
            config.frame_height = height;
        }
        if let Some(policy) = self.drop_policy {
            config.drop_policy = policy;
        }
        if let Some(interval) = self.monitor_interval_ms {
            config.monitor_interval_ms = interval;
        }
        if self.output_url.is_some() {
            config.output_url = self.output_url.clone();
        }
        config.validate()?;
        Ok(config)
    }
}
