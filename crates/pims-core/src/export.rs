use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::frame::{Frame, PixelData};

const TEXT_SCALE: f32 = 20.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const TEXT_MARGIN: i32 = 4;

/// Writes frames to disk as numbered PNG files.
pub struct FrameExporter {
    font: Option<FontVec>,
}

impl FrameExporter {
    /// `font` is only needed for annotated output; a font that cannot be
    /// loaded disables annotation with a warning.
    pub fn new(font: Option<&Path>) -> Self {
        Self {
            font: font.and_then(load_font),
        }
    }

    pub fn can_annotate(&self) -> bool {
        self.font.is_some()
    }

    /// Save `frame` as `dir/frame_XXXXXXXX.png`, numbered by its frame
    /// number. Returns the written path.
    pub fn save_frame(&self, frame: &Frame, dir: &Path, annotate: bool) -> Result<PathBuf> {
        let frame_no = frame.frame_no().unwrap_or(0);
        let path = dir.join(format!("frame_{frame_no:08}.png"));

        let img = match frame.data() {
            PixelData::F32(values) => {
                Frame::new(float_to_u16(values), frame.shape().to_vec())?.to_dynamic_image()?
            }
            _ => frame.to_dynamic_image()?,
        };

        match (&self.font, annotate) {
            (Some(font), true) => {
                let mut rgb = img.to_rgb8();
                self.draw_label(&mut rgb, font, frame_no);
                rgb.save(&path)?;
            }
            (None, true) => {
                warn!(frame_no, "no font loaded, saving without annotation");
                img.save(&path)?;
            }
            (_, false) => img.save(&path)?,
        }

        debug!(?path, "saved frame");
        Ok(path)
    }

    fn draw_label(&self, img: &mut RgbImage, font: &FontVec, frame_no: usize) {
        let text = format!("F:{frame_no}");
        draw_text_mut(
            img,
            TEXT_COLOR,
            TEXT_MARGIN,
            TEXT_MARGIN,
            PxScale::from(TEXT_SCALE),
            font,
            &text,
        );
    }
}

/// PNG has no float samples. Values that all lie in `[0, 1]` are taken as
/// normalised and stretched to the full u16 range; anything else is rounded
/// and clamped.
fn float_to_u16(values: &[f32]) -> PixelData {
    let max = f32::from(u16::MAX);
    let scale = if values.iter().all(|v| (0.0..=1.0).contains(v)) {
        max
    } else {
        1.0
    };
    PixelData::U16(
        values
            .iter()
            .map(|&v| (v * scale).round().clamp(0.0, max) as u16)
            .collect(),
    )
}

fn load_font(path: &Path) -> Option<FontVec> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read font file");
            return None;
        }
    };
    match FontVec::try_from_vec(data) {
        Ok(font) => {
            info!(path = %path.display(), "loaded annotation font");
            Some(font)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse font file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn grey_frame(frame_no: usize) -> Frame {
        Frame::new(PixelData::U8(vec![50; 6 * 4]), vec![4, 6])
            .unwrap()
            .with_frame_no(frame_no)
    }

    #[test]
    fn writes_numbered_png() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FrameExporter::new(None);

        let path = exporter.save_frame(&grey_frame(12), dir.path(), false).unwrap();
        assert_eq!(path, dir.path().join("frame_00000012.png"));

        let back = image::open(&path).unwrap().to_luma8();
        assert_eq!(back.dimensions(), (6, 4));
        assert_eq!(back.get_pixel(5, 3).0, [50]);
    }

    #[test]
    fn float_frames_are_stored_as_u16() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::new(PixelData::F32(vec![300.0; 2 * 2 * 3]), vec![2, 2, 3])
            .unwrap()
            .with_frame_no(0);

        let path = FrameExporter::new(None).save_frame(&frame, dir.path(), false).unwrap();
        let back = image::open(&path).unwrap().to_rgb16();
        assert_eq!(back.get_pixel(0, 0).0, [300, 300, 300]);
    }

    #[test]
    fn normalised_float_frames_use_full_range() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::new(PixelData::F32(vec![0.0, 0.5, 1.0, 0.25]), vec![2, 2])
            .unwrap()
            .with_frame_no(3);

        let path = FrameExporter::new(None).save_frame(&frame, dir.path(), false).unwrap();
        let back = image::open(&path).unwrap().to_luma16();
        assert_eq!(back.get_pixel(0, 0).0, [0]);
        assert_eq!(back.get_pixel(1, 0).0, [32768]);
        assert_eq!(back.get_pixel(0, 1).0, [65535]);
    }

    #[test]
    fn out_of_range_floats_are_clamped() {
        let PixelData::U16(v) = float_to_u16(&[-3.0, 2.4, 70000.0]) else {
            panic!("expected u16 samples");
        };
        assert_eq!(v, vec![0, 2, 65535]);
    }

    #[test]
    #[traced_test]
    fn unreadable_font_disables_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FrameExporter::new(Some(&dir.path().join("missing.ttf")));
        assert!(!exporter.can_annotate());
        assert!(logs_contain("failed to read font file"));

        let path = exporter.save_frame(&grey_frame(1), dir.path(), true).unwrap();
        assert!(path.exists());
        assert!(logs_contain("saving without annotation"));
    }
}
