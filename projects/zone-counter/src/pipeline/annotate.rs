use crate::pipeline::detection::TrackedBox;
use crate::pipeline::output::OutputStage;
use crate::pipeline::queue::StageQueue;
use crate::pipeline::types::{
    fps_from_latency, AnnotatedFrame, DetectionResult, FrameEnvelope, PipelineState,
};
use crate::zones::geometry::label_anchor;
use crate::zones::{StatsSnapshot, ZoneRegistry, ZoneView};
use anyhow::Result;
use opencv::core::{Mat, Point, Rect, Scalar, Vector};
use opencv::imgproc::{polylines, put_text, rectangle, FONT_HERSHEY_SIMPLEX, LINE_8};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Numbers printed in the top-left corner of each frame
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayMetrics {
    pub fps: f64,
    pub process_ms: f64,
    /// capture / results / output
    pub queue_sizes: [usize; 3],
}

fn blue() -> Scalar {
    Scalar::new(255.0, 0.0, 0.0, 0.0)
}

fn green() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}

fn red() -> Scalar {
    Scalar::new(0.0, 0.0, 255.0, 0.0)
}

fn draw_text(img: &mut Mat, text: &str, org: Point, color: Scalar, thickness: i32) -> Result<()> {
    put_text(
        img,
        text,
        org,
        FONT_HERSHEY_SIMPLEX,
        0.5,
        color,
        thickness,
        LINE_8,
        false,
    )?;
    Ok(())
}

/// Burn zone outlines, per-zone counters, tracked boxes and pipeline metrics into `img`.
pub fn draw_overlays(
    img: &mut Mat,
    zones: &[ZoneView],
    tracks: &[TrackedBox],
    metrics: &OverlayMetrics,
) -> Result<()> {
    // 1. Zones (Blue)
    for zone in zones {
        let mut pts_vec = Vector::<Point>::new();
        for p in &zone.points {
            pts_vec.push(Point::new(p[0], p[1]));
        }
        let mut contours = Vector::<Vector<Point>>::new();
        contours.push(pts_vec);
        polylines(img, &contours, true, blue(), 2, LINE_8, 0)?;

        let [cx, cy] = label_anchor(&zone.points);
        let lines = [
            zone.name.clone(),
            format!("In: {} Out: {}", zone.counts.entries, zone.counts.exits),
            format!("Current: {}", zone.counts.current),
        ];
        for (i, line) in lines.iter().enumerate() {
            let org = Point::new(cx, cy + i as i32 * 15 - 20);
            draw_text(img, line, org, blue(), 2)?;
        }
    }

    // 2. Tracks (Green)
    for track in tracks {
        let (x1, y1, x2, y2) = track.corners();
        let rect = Rect::new(x1, y1, x2 - x1, y2 - y1);
        rectangle(img, rect, green(), 1, LINE_8, 0)?;
        draw_text(
            img,
            &format!("ID: {}", track.track_id),
            Point::new(x1, y1 - 5),
            green(),
            1,
        )?;
    }

    // 3. Metrics (Red)
    let [capture, results, output] = metrics.queue_sizes;
    let lines = [
        format!("FPS: {:.1}", metrics.fps),
        format!("Process time: {:.1}ms", metrics.process_ms),
        format!("Queue sizes: {}/{}/{}", capture, results, output),
    ];
    for (i, line) in lines.iter().enumerate() {
        draw_text(img, line, Point::new(10, 20 + i as i32 * 20), red(), 1)?;
    }

    Ok(())
}

/// Queues whose depth is printed on each frame
pub struct OverlayQueues {
    pub capture: Arc<StageQueue<FrameEnvelope>>,
    pub results: Arc<StageQueue<DetectionResult>>,
}

/// One counting cycle: update the registry, then draw and publish outside its lock.
///
/// A drawing failure still publishes the frame (with whatever was drawn) and
/// its fresh counters.
pub fn annotate_result(
    result: DetectionResult,
    registry: &ZoneRegistry,
    output: &OutputStage,
    queues: &OverlayQueues,
) -> AnnotatedFrame {
    let DetectionResult {
        frame,
        tracks,
        latency,
    } = result;

    let zones = registry.count_cycle(&tracks);
    let stats = StatsSnapshot::from_views(&zones);

    let metrics = OverlayMetrics {
        fps: fps_from_latency(latency),
        process_ms: latency.as_secs_f64() * 1000.0,
        queue_sizes: [queues.capture.len(), queues.results.len(), output.queue_len()],
    };

    let mut image = frame.mat;
    if let Err(e) = draw_overlays(&mut image, &zones, &tracks, &metrics) {
        tracing::warn!("Annotate: failed to draw frame {}: {:#}", frame.id, e);
    }

    AnnotatedFrame {
        frame_id: frame.id,
        image,
        stats,
    }
}

/// Counting/annotation worker: the only writer of zone counters while running.
pub fn annotate_worker(
    input: Arc<StageQueue<DetectionResult>>,
    registry: Arc<ZoneRegistry>,
    output: Arc<OutputStage>,
    queues: OverlayQueues,
    state: Arc<PipelineState>,
    poll_timeout: Duration,
) -> Result<()> {
    while state.is_active() {
        let Some(result) = input.pop_timeout(poll_timeout) else {
            continue;
        };

        let annotated = annotate_result(result, &registry, &output, &queues);
        output.publish(annotated);
        state.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    Ok(())
}
