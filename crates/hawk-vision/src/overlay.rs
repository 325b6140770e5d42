//! Annotation of frames for the re-published video feed.

use hawk_proto::telemetry::AutopilotMode;
use image::{Rgb, RgbImage};

use crate::{BoundingBox, DetectionResult, Frame};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
const GREY: Rgb<u8> = Rgb([128, 128, 128]);
const BLUE: Rgb<u8> = Rgb([0, 128, 255]);

const MODE_BAR_PX: u32 = 6;
const GUIDANCE_RADIUS: i64 = 8;

/// Copy of `frame` with detections, the guidance point and a mode bar drawn on.
///
/// The tracked person gets a thick green outline, other people red, anything
/// else a thin yellow one. `guidance` is in pixels.
pub fn annotate(
    frame: &Frame,
    detections: Option<&DetectionResult>,
    guidance: Option<(f32, f32)>,
    mode: AutopilotMode,
) -> RgbImage {
    let mut img = frame.to_rgb();

    if let Some(det) = detections {
        for b in &det.boxes {
            let (color, thick) = if b.is_person() {
                if det.person.as_ref() == Some(b) { (GREEN, 4) } else { (RED, 4) }
            } else {
                (YELLOW, 2)
            };
            draw_box(&mut img, b, color, thick);
        }
    }

    if let Some((x, y)) = guidance {
        fill_circle(&mut img, x as i64, y as i64, GUIDANCE_RADIUS, RED);
    }

    let bar = match mode {
        AutopilotMode::Off => GREY,
        AutopilotMode::Search => YELLOW,
        AutopilotMode::Chase => RED,
        AutopilotMode::Track => BLUE,
    };
    for y in 0..MODE_BAR_PX.min(img.height()) {
        for x in 0..img.width() {
            img.put_pixel(x, y, bar);
        }
    }
    img
}

fn draw_box(img: &mut RgbImage, b: &BoundingBox, color: Rgb<u8>, thick: u32) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    if w == 0 || h == 0 {
        return;
    }
    let x1 = (b.x1 as i64).clamp(0, w - 1);
    let y1 = (b.y1 as i64).clamp(0, h - 1);
    let x2 = (b.x2 as i64).clamp(0, w - 1);
    let y2 = (b.y2 as i64).clamp(0, h - 1);
    let t = thick as i64;

    for y in y1..=y2 {
        for x in x1..=x2 {
            let edge = x - x1 < t || x2 - x < t || y - y1 < t || y2 - y < t;
            if edge {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn fill_circle(img: &mut RgbImage, cx: i64, cy: i64, r: i64, color: Rgb<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    for y in (cy - r).max(0)..=(cy + r).min(h - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(w - 1) {
            if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
