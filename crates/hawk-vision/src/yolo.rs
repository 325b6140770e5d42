//! Decoding of YOLO-style output tensors into pixel boxes.

use crate::{nms, BoundingBox};

/// Raw prediction, normalized 0..1 in center format.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub conf: f32,
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl Candidate {
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (self.cx - self.w / 2.0, self.cy - self.h / 2.0, self.cx + self.w / 2.0, self.cy + self.h / 2.0)
    }

    /// Scale to a `frame_w` x `frame_h` image; corners are clipped to the frame.
    pub fn to_box(&self, frame_w: u32, frame_h: u32, class_names: &[String]) -> BoundingBox {
        let (x1, y1, x2, y2) = self.corners();
        let (fw, fh) = (frame_w as f32, frame_h as f32);
        let class = class_names
            .get(self.class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", self.class_id));
        BoundingBox::new(
            (x1 * fw).clamp(0.0, fw),
            (y1 * fh).clamp(0.0, fh),
            (x2 * fw).clamp(0.0, fw),
            (y2 * fh).clamp(0.0, fh),
            class,
            self.conf,
        )
    }
}

/// Ultralytics export layout: one row per prediction, `[cx, cy, w, h, obj, cls0..]`.
pub fn decode_ultralytics(raw: &[f32], num_preds: usize, num_classes: usize, conf_th: f32) -> Vec<Candidate> {
    let stride = 5 + num_classes;
    let mut out = Vec::new();

    for row in raw.chunks_exact(stride).take(num_preds) {
        let obj = row[4];
        let mut best_c = 0usize;
        let mut best_p = 0.0f32;
        for (c, &p) in row[5..].iter().enumerate() {
            if p > best_p { best_p = p; best_c = c; }
        }
        let conf = obj * best_p;
        if conf >= conf_th {
            out.push(Candidate { class_id: best_c, conf, cx: row[0], cy: row[1], w: row[2], h: row[3] });
        }
    }
    out
}

/// Greedy class-agnostic NMS, highest confidence first.
pub fn nms_filter(mut dets: Vec<Candidate>, iou_th: f32, max_det: usize) -> Vec<Candidate> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::new();

    'outer: for d in dets {
        if kept.len() >= max_det { break; }
        for k in &kept {
            if nms::iou(&d, k) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(class_id: usize, conf: f32, cx: f32) -> Candidate {
        Candidate { class_id, conf, cx, cy: 0.5, w: 0.2, h: 0.4 }
    }

    #[test]
    fn decode_applies_objectness_and_threshold() {
        // two predictions, two classes
        let raw = [
            0.5, 0.5, 0.2, 0.4, 0.9, 0.1, 0.8, //
            0.1, 0.1, 0.1, 0.1, 0.2, 0.9, 0.1,
        ];
        let out = decode_ultralytics(&raw, 2, 2, 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 1);
        assert!((out[0].conf - 0.72).abs() < 1e-6);
    }

    #[test]
    fn decode_ignores_truncated_rows() {
        let raw = [0.5, 0.5, 0.2, 0.4, 0.9, 0.9, 0.5, 0.5];
        let out = decode_ultralytics(&raw, 5, 1, 0.1);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn nms_drops_overlaps_and_caps() {
        let dets = vec![cand(0, 0.6, 0.5), cand(0, 0.9, 0.51), cand(0, 0.7, 0.1), cand(0, 0.5, 0.9)];
        let kept = nms_filter(dets.clone(), 0.5, 10);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].conf, 0.9);

        let capped = nms_filter(dets, 0.5, 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn nms_suppresses_across_classes() {
        let kept = nms_filter(vec![cand(1, 0.6, 0.5), cand(0, 0.9, 0.5)], 0.5, 10);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_id, 0);
    }

    #[test]
    fn candidate_scales_to_frame_pixels() {
        let names = vec!["person".to_string()];
        let b = cand(0, 0.8, 0.5).to_box(960, 720, &names);
        assert_eq!(b.class, "person");
        assert!((b.x1 - 384.0).abs() < 1e-3 && (b.x2 - 576.0).abs() < 1e-3);
        assert!((b.y1 - 216.0).abs() < 1e-3 && (b.y2 - 504.0).abs() < 1e-3);

        let unknown = cand(7, 0.8, 0.5).to_box(10, 10, &names);
        assert_eq!(unknown.class, "class7");
    }
}
