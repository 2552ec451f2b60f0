//! Frame annotation.
//!
//! Draws detection boxes and their labels onto a copy of a captured frame and
//! encodes the result as JPEG. Labels use a small built-in bitmap font so the
//! annotator has no font files to ship.

use anyhow::{anyhow, Result};
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};

use crate::detect::Detection;
use crate::frame::RawFrame;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const STROKE: i32 = 2;
/// Label baseline sits this far above the box's top edge.
const LABEL_OFFSET: i32 = 10;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;

/// `"<label> <confidence as percent, two decimals>%"`, e.g. `"car 87.50%"`.
pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}%", detection.label, detection.confidence * 100.0)
}

/// Render `detections` over `frame` and return the JPEG bytes.
///
/// Boxes are clipped to the frame. The source frame is not modified.
pub fn annotate(frame: &RawFrame, detections: &[Detection], jpeg_quality: u8) -> Result<Vec<u8>> {
    if frame.is_empty() {
        return Err(anyhow!("cannot annotate an empty frame"));
    }
    let mut image = RgbImage::from_raw(frame.width, frame.height, frame.to_rgb())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;

    for detection in detections {
        let [x1, y1, x2, y2] = detection.bbox;
        draw_rectangle(&mut image, x1, y1, x2, y2, BOX_COLOR);
    }
    for detection in detections {
        let [x1, y1, _, _] = detection.bbox;
        draw_label(&mut image, x1, y1 - LABEL_OFFSET, &label_text(detection));
    }

    encode_jpeg(&image, jpeg_quality)
}

pub fn encode_jpeg(image: &RgbImage, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, jpeg_quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    for inset in 0..STROKE {
        let (l, t, r, b) = (left + inset, top + inset, right - inset, bottom - inset);
        if l > r || t > b {
            break;
        }
        for x in l..=r {
            put(image, x, t, color);
            put(image, x, b, color);
        }
        for y in t..=b {
            put(image, l, y, color);
            put(image, r, y, color);
        }
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    for y in top..=bottom {
        for x in left..=right {
            put(image, x, y, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, x: i32, baseline: i32, text: &str) {
    let top = baseline - GLYPH_HEIGHT;
    let chars = text.chars().count() as i32;
    fill_rect(
        image,
        x - 1,
        top - 1,
        x + chars * GLYPH_ADVANCE,
        baseline,
        LABEL_BACKGROUND,
    );

    let mut cursor = x;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        put(image, cursor + col, top + row as i32, BOX_COLOR);
                    }
                }
            }
        }
        cursor += GLYPH_ADVANCE;
    }
}

/// Set one pixel, ignoring coordinates outside the image.
fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 || x >= image.width() as i32 || y >= image.height() as i32 {
        return;
    }
    image.put_pixel(x as u32, y as u32, color);
}

/// 5x7 bitmap rows, most significant bit on the left. Unknown characters
/// render as blanks.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x0E, 0x01, 0x01, 0x11, 0x0E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1E, 0x01, 0x01, 0x0E, 0x01, 0x01, 0x1E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '%' => [0x19, 0x19, 0x02, 0x04, 0x08, 0x13, 0x13],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn gray_frame(width: u32, height: u32) -> RawFrame {
        RawFrame::new(
            vec![128u8; (width * height * 3) as usize],
            width,
            height,
            PixelFormat::Rgb24,
        )
        .unwrap()
    }

    fn decode(jpeg: &[u8]) -> RgbImage {
        image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8()
    }

    #[test]
    fn label_text_uses_two_decimal_percent() {
        let det = Detection::new("car", 0.875, [0, 0, 1, 1]);
        assert_eq!(label_text(&det), "car 87.50%");
        let det = Detection::new("pothole", 1.0, [0, 0, 1, 1]);
        assert_eq!(label_text(&det), "pothole 100.00%");
    }

    #[test]
    fn no_detections_keeps_dimensions() {
        let jpeg = annotate(&gray_frame(64, 48), &[], 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = decode(&jpeg);
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn box_edges_are_green() {
        let frame = gray_frame(80, 60);
        let det = Detection::new("car", 0.9, [20, 30, 60, 50]);
        let decoded = decode(&annotate(&frame, &[det], 100).unwrap());

        let px = decoded.get_pixel(40, 50);
        assert!(px[1] > px[0] + 40 && px[1] > px[2] + 40, "bottom edge {:?}", px);
        let inside = decoded.get_pixel(40, 40);
        assert!(inside[1].abs_diff(inside[0]) < 20, "interior untouched {:?}", inside);
    }

    #[test]
    fn boxes_past_the_edge_are_clipped() {
        let frame = gray_frame(32, 32);
        let det = Detection::new("truck", 0.5, [-10, -10, 100, 100]);
        assert!(annotate(&frame, &[det], 80).is_ok());
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = RawFrame::new(Vec::new(), 0, 0, PixelFormat::Rgb24).unwrap();
        assert!(annotate(&frame, &[], 80).is_err());
    }
}
