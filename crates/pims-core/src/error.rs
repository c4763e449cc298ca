use std::path::PathBuf;

/// Errors produced while opening or reading a frame source.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("TIFF decoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("no files were found matching {pattern}")]
    NoFilesFound { pattern: String },

    #[error("no reader available for {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    #[error("index {index} is out of range for a sequence of {len} frames")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    #[error("mask has {got} entries, sequence has {expected} frames")]
    MaskLength { expected: usize, got: usize },

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("axis error: {0}")]
    Axis(String),

    #[error("no plane stored at {0}")]
    MissingPlane(String),

    #[error("ffmpeg: {0}")]
    Ffmpeg(String),

    #[error("OLE container: {0}")]
    Ole(String),
}

pub type Result<T> = std::result::Result<T, Error>;
