//! Overlay rendering
//!
//! Draws bounding boxes and text labels onto a frame from a batch of
//! detections. A detection whose class id does not resolve against the
//! catalog is skipped with a diagnostic; it never aborts the frame or
//! affects the other detections in the batch.

mod font;

use image::Rgb;

use crate::camera::Frame;
use crate::catalog::ClassCatalog;
use crate::detect::{BoundingBox, Detection};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

/// Label and confidence positions relative to the box's top-left corner.
const LABEL_OFFSET: (i32, i32) = (10, 30);
const CONFIDENCE_OFFSET: (i32, i32) = (200, 30);

/// Integer upscale applied to the 5x7 glyphs.
const TEXT_SCALE: u32 = 3;

/// Annotate `frame` with every detection that carries a valid class id.
pub fn render(frame: &mut Frame, detections: &[Detection], catalog: &ClassCatalog) {
    for detection in detections {
        let Some(label) = catalog.label(detection.class_id) else {
            log::warn!("Invalid class id: {}", detection.class_id);
            continue;
        };

        draw_rect(frame, &detection.bbox, BOX_COLOR, BOX_THICKNESS);

        let (bx, by) = (detection.bbox.x, detection.bbox.y);
        draw_text(
            frame,
            &label.to_uppercase(),
            bx + LABEL_OFFSET.0,
            by + LABEL_OFFSET.1,
            BOX_COLOR,
        );
        draw_text(
            frame,
            &format_confidence(detection.confidence),
            bx + CONFIDENCE_OFFSET.0,
            by + CONFIDENCE_OFFSET.1,
            BOX_COLOR,
        );
    }
}

/// Render a confidence score the way the detections read on screen: as a
/// percentage rounded to two decimals with trailing zeros dropped, always
/// keeping one decimal digit ("73.0", "73.45", "100.0").
pub fn format_confidence(confidence: f32) -> String {
    let percent = (confidence as f64 * 100.0 * 100.0).round() / 100.0;
    let mut text = format!("{:.2}", percent);
    if text.ends_with('0') {
        text.pop();
        if text.ends_with('0') && !text.ends_with(".0") {
            text.pop();
        }
    }
    text
}

/// Hollow rectangle, border drawn inward from the box edge. Pixels outside
/// the frame are clipped.
fn draw_rect(frame: &mut Frame, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let t = thickness as i32;
    let (x0, y0) = (bbox.x, bbox.y);
    let (x1, y1) = (bbox.x + bbox.width, bbox.y + bbox.height);

    for y in y0..y1 {
        for x in x0..x1 {
            let on_border = x < x0 + t || x >= x1 - t || y < y0 + t || y >= y1 - t;
            if on_border {
                put_pixel(frame, x, y, color);
            }
        }
    }
}

/// Draw `text` with its top-left corner at (x, y). Characters without a
/// glyph advance the cursor but draw nothing.
fn draw_text(frame: &mut Frame, text: &str, x: i32, y: i32, color: Rgb<u8>) {
    let advance = ((font::GLYPH_WIDTH + font::GLYPH_SPACING) * TEXT_SCALE) as i32;
    let mut cursor_x = x;

    for c in text.chars() {
        if let Some(glyph) = font::glyph(c) {
            draw_glyph(frame, glyph, cursor_x, y, color);
        }
        cursor_x += advance;
    }
}

fn draw_glyph(frame: &mut Frame, glyph: &[u8; 7], x: i32, y: i32, color: Rgb<u8>) {
    for (row, bits) in glyph.iter().enumerate() {
        for col in 0..font::GLYPH_WIDTH {
            if bits & (1 << (font::GLYPH_WIDTH - 1 - col)) == 0 {
                continue;
            }
            // Scale each font pixel up to a TEXT_SCALE x TEXT_SCALE block
            for dy in 0..TEXT_SCALE {
                for dx in 0..TEXT_SCALE {
                    put_pixel(
                        frame,
                        x + (col * TEXT_SCALE + dx) as i32,
                        y + (row as u32 * TEXT_SCALE + dy) as i32,
                        color,
                    );
                }
            }
        }
    }
}

fn put_pixel(frame: &mut Frame, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x < frame.width() && y < frame.height() {
        frame.put_pixel(x, y, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn black_frame() -> Frame {
        Frame::new(700, 500)
    }

    fn detection(class_id: u32, confidence: f32) -> Detection {
        Detection {
            class_id,
            confidence,
            bbox: BoundingBox {
                x: 10,
                y: 10,
                width: 50,
                height: 50,
            },
        }
    }

    fn catalog() -> ClassCatalog {
        ClassCatalog::from_names(vec!["person".into(), "car".into()])
    }

    #[test]
    fn draws_box_at_detection_bounds() {
        let mut frame = black_frame();
        render(&mut frame, &[detection(2, 0.73)], &catalog());

        // Border corners and the second border row are painted
        assert_eq!(*frame.get_pixel(10, 10), BOX_COLOR);
        assert_eq!(*frame.get_pixel(11, 11), BOX_COLOR);
        assert_eq!(*frame.get_pixel(59, 59), BOX_COLOR);
        // Box interior away from the label area stays untouched
        assert_eq!(*frame.get_pixel(12, 55), Rgb([0, 0, 0]));
        // Just outside the box stays untouched
        assert_eq!(*frame.get_pixel(9, 9), Rgb([0, 0, 0]));
        assert_eq!(*frame.get_pixel(60, 60), Rgb([0, 0, 0]));
    }

    #[test]
    fn draws_label_and_confidence_text() {
        let mut frame = black_frame();
        render(&mut frame, &[detection(2, 0.73)], &catalog());

        // Glyph blocks are 21px tall at TEXT_SCALE = 3
        let lit = |x0: u32, y0: u32| {
            (y0..y0 + 21).any(|y| (x0..x0 + 21).any(|x| *frame.get_pixel(x, y) == BOX_COLOR))
        };

        // "CAR" starts at (20, 40), "73.0" at (210, 40)
        assert!(lit(20, 40), "label glyphs not drawn");
        assert!(lit(210, 40), "confidence glyphs not drawn");
    }

    #[test]
    fn skips_invalid_class_id_without_drawing() {
        let mut frame = black_frame();
        let before = frame.clone();

        render(&mut frame, &[detection(99, 0.9)], &catalog());

        assert_eq!(frame.as_raw(), before.as_raw());
    }

    #[test]
    fn invalid_record_does_not_affect_valid_ones() {
        let mut frame = black_frame();
        let bad = Detection {
            class_id: 99,
            confidence: 0.9,
            bbox: BoundingBox {
                x: 100,
                y: 100,
                width: 40,
                height: 40,
            },
        };

        render(&mut frame, &[bad, detection(1, 0.8)], &catalog());

        // Valid detection's box drawn
        assert_eq!(*frame.get_pixel(10, 10), BOX_COLOR);
        // Invalid detection's box not drawn
        assert_eq!(*frame.get_pixel(100, 100), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_are_clipped_to_frame_bounds() {
        let mut frame = black_frame();
        let partly_outside = Detection {
            class_id: 1,
            confidence: 0.9,
            bbox: BoundingBox {
                x: 680,
                y: 480,
                width: 100,
                height: 100,
            },
        };

        render(&mut frame, &[partly_outside], &catalog());

        assert_eq!(*frame.get_pixel(680, 480), BOX_COLOR);
        assert_eq!(*frame.get_pixel(699, 499), Rgb([0, 0, 0])); // interior, clipped edge never reached
    }

    #[test]
    fn confidence_formatting_matches_display_convention() {
        assert_eq!(format_confidence(0.73), "73.0");
        assert_eq!(format_confidence(0.7345), "73.45");
        assert_eq!(format_confidence(0.735), "73.5");
        assert_eq!(format_confidence(1.0), "100.0");
        assert_eq!(format_confidence(0.0), "0.0");
    }
}
