mod nms;
pub mod camera;
pub mod mjpeg;
pub mod overlay;
pub mod yolo;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const PERSON: &str = "person";

/// A captured camera frame.
///
/// Pixels sit behind an immutable `Arc`, so a clone handed to a consumer can
/// never change underneath it. Annotation works on a deep copy (`to_rgb`).
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: Arc<RgbImage>,
    captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels: Arc::new(pixels), captured_at: Instant::now() }
    }

    pub fn width(&self) -> u32 { self.pixels.width() }
    pub fn height(&self) -> u32 { self.pixels.height() }
    pub fn pixels(&self) -> &RgbImage { &self.pixels }
    pub fn captured_at(&self) -> Instant { self.captured_at }
    pub fn age(&self) -> Duration { self.captured_at.elapsed() }

    pub fn to_rgb(&self) -> RgbImage {
        (*self.pixels).clone()
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class: String,
    pub confidence: f32,
}

impl BoundingBox {
    /// Corners may come in either order; they are sorted so x1<=x2 and y1<=y2.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class: impl Into<String>, confidence: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
            class: class.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn width(&self) -> f32 { self.x2 - self.x1 }
    pub fn height(&self) -> f32 { self.y2 - self.y1 }
    pub fn area(&self) -> f32 { self.width() * self.height() }
    pub fn center_x(&self) -> f32 { (self.x1 + self.x2) / 2.0 }

    pub fn is_person(&self) -> bool {
        self.class == PERSON
    }
}

/// One detector pass, published as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub boxes: Vec<BoundingBox>,
    /// Largest-area "person" box; on equal areas the first one wins.
    pub person: Option<BoundingBox>,
}

impl DetectionResult {
    pub fn from_boxes(boxes: Vec<BoundingBox>) -> Self {
        let mut best: Option<&BoundingBox> = None;
        for b in boxes.iter().filter(|b| b.is_person()) {
            best = match best {
                Some(cur) if b.area() <= cur.area() => Some(cur),
                _ => Some(b),
            };
        }
        let person = best.cloned();
        Self { boxes, person }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub enable: bool,
    pub backend: String, // "tflite"
    #[serde(default)]
    pub use_coral: bool,
    pub model_path: String,
    #[serde(default)]
    pub model_path_edgetpu: String,

    pub img_w: u32,
    pub img_h: u32,
    pub class_names: Vec<String>,

    pub conf_threshold: f32,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
    #[serde(default = "default_layout")]
    pub output_layout: String, // "ultralytics"
    #[serde(default = "default_threads")]
    pub num_threads: i32,
}

fn default_layout() -> String { "ultralytics".into() }
fn default_threads() -> i32 { 2 }

/// Object detector backend.
pub trait Detector: Send {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>>;
}

/// Used when vision is disabled: the autopilot never sees anyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn infer(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(x1: f32, y1: f32, x2: f32, y2: f32, class: &str) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2, class, 0.9)
    }

    #[test]
    fn picks_largest_person() {
        let r = DetectionResult::from_boxes(vec![
            bb(0.0, 0.0, 10.0, 10.0, "person"),
            bb(0.0, 0.0, 500.0, 500.0, "car"),
            bb(10.0, 10.0, 40.0, 60.0, "person"),
            bb(0.0, 0.0, 5.0, 5.0, "person"),
        ]);
        assert_eq!(r.boxes.len(), 4);
        assert_eq!(r.person, Some(bb(10.0, 10.0, 40.0, 60.0, "person")));
    }

    #[test]
    fn ties_keep_first_person() {
        let first = bb(0.0, 0.0, 20.0, 10.0, "person");
        let second = bb(100.0, 100.0, 110.0, 120.0, "person");
        assert_eq!(first.area(), second.area());
        let r = DetectionResult::from_boxes(vec![first.clone(), second]);
        assert_eq!(r.person, Some(first));
    }

    #[test]
    fn no_person_without_person_class() {
        let r = DetectionResult::from_boxes(vec![bb(0.0, 0.0, 10.0, 10.0, "dog")]);
        assert!(r.person.is_none());
        assert!(DetectionResult::from_boxes(vec![]).person.is_none());
    }

    #[test]
    fn box_corners_are_ordered() {
        let b = BoundingBox::new(50.0, 80.0, 10.0, 20.0, "person", 1.7);
        assert!(b.x1 <= b.x2 && b.y1 <= b.y2);
        assert_eq!((b.width(), b.height()), (40.0, 60.0));
        assert_eq!(b.confidence, 1.0);
    }
}
