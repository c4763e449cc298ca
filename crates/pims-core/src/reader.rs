use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::frame::{Frame, PixelType};

/// Uniform random-access view over one backend's native handle.
///
/// Indices handed to [`FramesSource::get_frame`] are already resolved to
/// `0..len()` by the sequence facade; implementations still reject anything
/// outside that range.
pub trait FramesSource: Send {
    /// Number of frames. Fixed once the source is opened.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of the frames returned by `get_frame`.
    fn frame_shape(&self) -> Vec<usize>;

    fn pixel_type(&self) -> PixelType;

    fn get_frame(&mut self, index: usize) -> Result<Frame>;

    /// Human-readable origin, shown in summaries.
    fn source_name(&self) -> String;

    /// Whether frames are single planes (`[h, w]` or `[h, w, c]`) that a
    /// greyscale conversion can collapse. Bundled stacks are not.
    fn supports_grey(&self) -> bool {
        true
    }

    /// Extra `(label, value)` lines for the textual summary.
    fn summary_lines(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Release backend resources. Called at most once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The backends a path can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderKind {
    ImageSequence,
    TiffStack,
    Video,
    Zvi,
}

impl ReaderKind {
    pub const ALL: [ReaderKind; 4] = [
        ReaderKind::ImageSequence,
        ReaderKind::TiffStack,
        ReaderKind::Video,
        ReaderKind::Zvi,
    ];

    /// Lower-case file extensions this reader claims.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ReaderKind::ImageSequence => &[
                "png", "jpg", "jpeg", "bmp", "gif", "webp", "pbm", "pgm", "ppm", "pnm", "tga",
                "ico", "tif", "tiff",
            ],
            ReaderKind::TiffStack => &["tif", "tiff"],
            ReaderKind::Video => &[
                "mp4", "m4v", "mov", "avi", "mkv", "webm", "mpg", "mpeg", "wmv", "flv",
            ],
            ReaderKind::Zvi => &["zvi"],
        }
    }

    /// Higher wins when several readers claim the same extension.
    pub fn priority(self) -> u8 {
        match self {
            ReaderKind::ImageSequence => 1,
            ReaderKind::Video => 5,
            ReaderKind::TiffStack => 8,
            ReaderKind::Zvi => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReaderKind::ImageSequence => "image-sequence",
            ReaderKind::TiffStack => "tiff-stack",
            ReaderKind::Video => "video",
            ReaderKind::Zvi => "zvi",
        }
    }

    /// The highest-priority reader claiming `ext` (case-insensitive).
    pub fn for_extension(ext: &str) -> Option<ReaderKind> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .filter(|kind| kind.extensions().contains(&ext.as_str()))
            .max_by_key(|kind| kind.priority())
    }
}

impl fmt::Display for ReaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReaderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|k| k.name()).collect();
                format!("unknown reader '{s}' (expected one of {})", names.join(", "))
            })
    }
}
