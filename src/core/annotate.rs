use crate::common::config::AnnotationConfig;
use crate::common::{RollcallError, Result};
use crate::core::detector::BoundingBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::fs;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

// Bundled so labels are drawn without any font configured
const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Draws a box around each face and its label just above it.
pub struct Annotator {
    font: Font<'static>,
    scale: Scale,
    thickness: u32,
}

impl Annotator {
    pub fn new(config: &AnnotationConfig) -> Result<Self> {
        let font = match &config.font_path {
            Some(path) => {
                let bytes = fs::read(path)?;
                Font::try_from_vec(bytes).ok_or_else(|| {
                    RollcallError::Config(format!("Not a usable TrueType font: {}", path.display()))
                })?
            }
            None => Font::try_from_bytes(DEFAULT_FONT)
                .ok_or_else(|| RollcallError::Config("Bundled label font is unreadable".into()))?,
        };

        Ok(Self {
            font,
            scale: Scale::uniform(config.font_scale),
            thickness: config.box_thickness.max(1),
        })
    }

    pub fn annotate(&self, canvas: &mut RgbImage, bbox: &BoundingBox, label: &str) {
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let left = bbox.left.min(width - 1);
        let top = bbox.top.min(height - 1);
        let right = bbox.right.min(width - 1).max(left);
        let bottom = bbox.bottom.min(height - 1).max(top);

        for inset in 0..self.thickness {
            let w = (right - left + 1).saturating_sub(2 * inset);
            let h = (bottom - top + 1).saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at((left + inset) as i32, (top + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
        }

        let y = top as i32 - self.scale.y as i32 - 4;
        draw_text_mut(canvas, BOX_COLOR, left as i32, y.max(0), self.scale, &self.font, label);
    }
}
