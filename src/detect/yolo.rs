//! Decoding of YOLO-style detection heads.
//!
//! The head is a `[1, 4 + classes, anchors]` tensor: rows 0..4 hold the box
//! centre and size in model input pixels, the remaining rows hold per-class
//! scores. Decoding keeps the best class per anchor, applies the confidence
//! threshold and per-class non-maximum suppression, then maps boxes back to
//! frame pixels.

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;

#[derive(Clone, Debug)]
pub struct DecodeParams<'a> {
    pub input_width: u32,
    pub input_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub labels: &'a [String],
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    class: usize,
    score: f32,
    // x1, y1, x2, y2 in frame pixels
    corners: [f32; 4],
}

pub fn decode(raw: &[f32], attrs: usize, anchors: usize, params: &DecodeParams) -> Result<Vec<Detection>> {
    if attrs <= 4 {
        return Err(anyhow!("detection head has {attrs} rows, expected at least 5"));
    }
    let expected = attrs
        .checked_mul(anchors)
        .ok_or_else(|| anyhow!("detection head dimensions overflow"))?;
    if raw.len() != expected {
        return Err(anyhow!(
            "detection head length mismatch: expected {}x{}={}, got {}",
            attrs,
            anchors,
            expected,
            raw.len()
        ));
    }

    let sx = params.frame_width as f32 / params.input_width.max(1) as f32;
    let sy = params.frame_height as f32 / params.input_height.max(1) as f32;
    let at = |row: usize, anchor: usize| raw[row * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best: Option<(usize, f32)> = None;
        for class in 0..attrs - 4 {
            let score = at(4 + class, anchor);
            if score.is_finite() && best.map_or(true, |(_, s)| score > s) {
                best = Some((class, score));
            }
        }
        let Some((class, score)) = best else { continue };
        if score < params.confidence_threshold {
            continue;
        }
        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        candidates.push(Candidate {
            class,
            score,
            corners: [
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            ],
        });
    }

    let kept = non_max_suppression(candidates, params.iou_threshold);
    let max_x = params.frame_width.saturating_sub(1) as f32;
    let max_y = params.frame_height.saturating_sub(1) as f32;
    Ok(kept
        .into_iter()
        .map(|c| {
            let [x1, y1, x2, y2] = c.corners;
            let label = params
                .labels
                .get(c.class)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", c.class));
            Detection::new(
                label,
                c.score,
                [
                    x1.clamp(0.0, max_x).round() as i32,
                    y1.clamp(0.0, max_y).round() as i32,
                    x2.clamp(0.0, max_x).round() as i32,
                    y2.clamp(0.0, max_y).round() as i32,
                ],
            )
        })
        .collect())
}

/// Greedy per-class NMS. Output is ordered by descending score.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class == cand.class && iou(&k.corners, &cand.corners) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
