use crate::pipeline::MatchResult;
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::sync::OnceLock;

/// Height of the label band along the bottom edge of each box.
pub const LABEL_BAND_HEIGHT: u32 = 30;

const BORDER_WIDTH: i32 = 2;
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_SCALE: f32 = 18.0;
const LABEL_INSET: i32 = 6;

static FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

fn label_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(FONT_DATA) {
        Ok(font) => Some(font),
        Err(e) => {
            log::warn!("Label font unusable, drawing boxes only: {}", e);
            None
        }
    })
    .as_ref()
}

/// Text shown on a result's label band, e.g. `Alice (0.87)`.
pub fn label_text(result: &MatchResult) -> String {
    format!("{} ({:.2})", result.label, result.score)
}

/// Draw each result's box and a filled label band in its color, with the
/// label and score written on the band.
pub fn draw_results(frame: &mut RgbImage, results: &[MatchResult]) {
    for result in results {
        let [x1, y1, x2, y2] = result.bbox.corners();
        let (x1, y1) = (x1.round() as i32, y1.round() as i32);
        let width = (x2 - x1 as f32).round().max(1.0) as u32;
        let height = (y2 - y1 as f32).round().max(1.0) as u32;

        for inset in 0..BORDER_WIDTH {
            let inner_w = width.saturating_sub(2 * inset as u32);
            let inner_h = height.saturating_sub(2 * inset as u32);
            if inner_w == 0 || inner_h == 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(inner_w, inner_h);
            draw_hollow_rect_mut(frame, rect, result.color);
        }

        // band sits inside the box, along its bottom edge
        let band_height = LABEL_BAND_HEIGHT.min(height);
        let band_top = y1 + (height - band_height) as i32;
        let band = Rect::at(x1, band_top).of_size(width, band_height);
        draw_filled_rect_mut(frame, band, result.color);

        if let Some(font) = label_font() {
            draw_text_mut(
                frame,
                LABEL_COLOR,
                x1 + LABEL_INSET,
                band_top + LABEL_INSET,
                PxScale::from(LABEL_SCALE),
                font,
                &label_text(result),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::pipeline::{KNOWN_COLOR, UNKNOWN_COLOR};

    fn result(x1: f32, y1: f32, x2: f32, y2: f32, color: Rgb<u8>) -> MatchResult {
        MatchResult {
            bbox: BoundingBox::from_corners(x1, y1, x2, y2),
            label: "Alice".to_string(),
            score: 0.9,
            color,
        }
    }

    #[test]
    fn test_label_text_format() {
        let r = result(0.0, 0.0, 10.0, 10.0, KNOWN_COLOR);
        assert_eq!(label_text(&r), "Alice (0.90)");
    }

    #[test]
    fn test_bundled_font_loads() {
        assert!(label_font().is_some());
    }

    #[test]
    fn test_draws_border_and_band() {
        let mut frame = RgbImage::new(200, 200);
        draw_results(&mut frame, &[result(20.0, 20.0, 120.0, 140.0, KNOWN_COLOR)]);

        // border, two pixels thick
        assert_eq!(*frame.get_pixel(20, 60), KNOWN_COLOR);
        assert_eq!(*frame.get_pixel(21, 60), KNOWN_COLOR);
        assert_eq!(*frame.get_pixel(22, 60), Rgb([0, 0, 0]));
        // band rows 110..140; the bottom rows stay clear of the text
        assert_eq!(*frame.get_pixel(22, 138), KNOWN_COLOR);
        assert_eq!(*frame.get_pixel(117, 138), KNOWN_COLOR);
        // interior above the band untouched
        assert_eq!(*frame.get_pixel(70, 60), Rgb([0, 0, 0]));
        // outside untouched
        assert_eq!(*frame.get_pixel(150, 150), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_written_on_band() {
        let mut frame = RgbImage::new(200, 200);
        draw_results(&mut frame, &[result(20.0, 20.0, 180.0, 140.0, KNOWN_COLOR)]);

        // the band is pure green, so any red comes from the white text
        let mut lit = 0;
        for y in 110..140 {
            for x in 20..180 {
                if frame.get_pixel(x, y)[0] > 128 {
                    lit += 1;
                }
            }
        }
        assert!(lit > 20, "expected label text on the band, found {} pixels", lit);

        // different labels render differently
        let mut other = RgbImage::new(200, 200);
        let mut bob = result(20.0, 20.0, 180.0, 140.0, KNOWN_COLOR);
        bob.label = "Bob".to_string();
        draw_results(&mut other, &[bob]);
        assert_ne!(frame, other);
    }

    #[test]
    fn test_unknown_uses_red_and_clips_at_edges() {
        let mut frame = RgbImage::new(50, 50);
        draw_results(&mut frame, &[result(30.0, 30.0, 90.0, 90.0, UNKNOWN_COLOR)]);

        assert_eq!(*frame.get_pixel(30, 40), UNKNOWN_COLOR);
        assert_eq!(*frame.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_small_box_band_fits_inside() {
        let mut frame = RgbImage::new(40, 40);
        draw_results(&mut frame, &[result(5.0, 5.0, 15.0, 15.0, KNOWN_COLOR)]);

        // whole box is band; text starts past the inset
        assert_eq!(*frame.get_pixel(6, 6), KNOWN_COLOR);
        assert_eq!(*frame.get_pixel(2, 2), Rgb([0, 0, 0]));
    }
}
