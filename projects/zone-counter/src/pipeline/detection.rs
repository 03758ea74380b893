use crate::zones::TrackId;
use anyhow::{Context, Result};
use opencv::core::Mat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One tracked object in a frame, in working-resolution pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedBox {
    pub track_id: TrackId,
    /// Box center (x, y)
    pub center: [f32; 2],
    /// Box size (w, h)
    pub extent: [f32; 2],
}

impl TrackedBox {
    /// Integer point used for zone containment (truncated center).
    pub fn anchor(&self) -> [i32; 2] {
        [self.center[0] as i32, self.center[1] as i32]
    }

    /// Corner coordinates (x1, y1, x2, y2)
    pub fn corners(&self) -> (i32, i32, i32, i32) {
        let [x, y] = self.center;
        let [w, h] = self.extent;
        (
            (x - w / 2.0) as i32,
            (y - h / 2.0) as i32,
            (x + w / 2.0) as i32,
            (y + h / 2.0) as i32,
        )
    }
}

/// External detection + tracking engine.
///
/// An `Err` means the call failed; an empty `Vec` means nothing was detected.
/// Track ids must be stable for as long as the engine keeps an object continuously visible.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<TrackedBox>>;
}

/// Blanket implementation so closures can stand in for a detector.
impl<F> Detector for F
where
    F: FnMut(&Mat) -> Result<Vec<TrackedBox>> + Send,
{
    fn detect(&mut self, frame: &Mat) -> Result<Vec<TrackedBox>> {
        self(frame)
    }
}

/// Replays pre-recorded tracking output, one JSON array of `TrackedBox` per line,
/// looping back to the first line at the end.
pub struct ReplayDetector {
    frames: Vec<Vec<TrackedBox>>,
    cursor: usize,
}

impl ReplayDetector {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detections file {:?}", path))?;
        Self::from_json_lines(&content)
    }

    pub fn from_json_lines(content: &str) -> Result<Self> {
        let frames = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str::<Vec<TrackedBox>>(line)
                    .with_context(|| format!("Invalid detections on line {}", idx + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("ReplayDetector: loaded {} frames of detections", frames.len());
        Ok(Self { frames, cursor: 0 })
    }

    /// A detector that never reports anything.
    pub fn empty() -> Self {
        Self {
            frames: Vec::new(),
            cursor: 0,
        }
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, _frame: &Mat) -> Result<Vec<TrackedBox>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let boxes = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(boxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tracked_box_geometry() {
        let b = TrackedBox {
            track_id: 1,
            center: [50.7, 40.2],
            extent: [20.0, 10.0],
        };
        assert_eq!(b.anchor(), [50, 40]);
        assert_eq!(b.corners(), (40, 35, 60, 45));
    }

    #[test]
    fn test_replay_loops() {
        let lines = r#"[{"track_id": 1, "center": [10, 10], "extent": [4, 4]}]

[]
"#;
        let mut detector = ReplayDetector::from_json_lines(lines).unwrap();
        let frame = Mat::default();
        assert_eq!(detector.detect(&frame).unwrap().len(), 1);
        assert!(detector.detect(&frame).unwrap().is_empty());
        assert_eq!(detector.detect(&frame).unwrap()[0].track_id, 1);
    }

    #[test]
    fn test_replay_rejects_bad_lines() {
        let err = ReplayDetector::from_json_lines("[]\nnot json\n").err().unwrap();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_replay_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"[{{"track_id": 9, "center": [1, 2], "extent": [3, 4]}}]"#).unwrap();
        let mut detector = ReplayDetector::from_file(file.path()).unwrap();
        assert_eq!(detector.detect(&Mat::default()).unwrap()[0].track_id, 9);
    }

    #[test]
    fn test_empty_detector() {
        let mut detector = ReplayDetector::empty();
        assert!(detector.detect(&Mat::default()).unwrap().is_empty());
    }
}
