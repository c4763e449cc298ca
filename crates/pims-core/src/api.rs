use std::path::Path;

use tracing::info;

use crate::backends::image_sequence::ImageSequence;
use crate::backends::tiff_stack::TiffStack;
use crate::backends::video::{FfmpegConfig, VideoReader};
use crate::backends::zvi::{ZviLayout, ZviReader};
use crate::error::Result;
use crate::frame::PixelType;
use crate::reader::{FramesSource, ReaderKind};
use crate::sequence::FramesSequence;
use crate::sniff::sniff;

/// Knobs for [`open_with`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Skip sniffing and use this reader.
    pub reader: Option<ReaderKind>,
    pub dtype: Option<PixelType>,
    pub as_grey: bool,
    pub ffmpeg: FfmpegConfig,
    pub zvi_layout: ZviLayout,
}

/// Open `path` with the reader its contents (or extension) call for.
///
/// `path` may be an image file, a directory or glob pattern of images, a zip
/// archive of images, a multi-page TIFF, a video or a ZVI file.
pub fn open(path: impl AsRef<Path>) -> Result<FramesSequence> {
    open_with(path, &OpenOptions::default())
}

pub fn open_with(path: impl AsRef<Path>, options: &OpenOptions) -> Result<FramesSequence> {
    let path = path.as_ref();
    let kind = match options.reader {
        Some(kind) => kind,
        None => sniff(path)?,
    };
    info!(?path, reader = %kind, forced = options.reader.is_some(), "opening frame source");

    let source = open_source(kind, path, options)?;
    let mut seq = FramesSequence::new(source);
    if let Some(dtype) = options.dtype {
        seq = seq.with_dtype(dtype);
    }
    if options.as_grey {
        seq = seq.with_grey()?;
    }
    Ok(seq)
}

fn open_source(kind: ReaderKind, path: &Path, options: &OpenOptions) -> Result<Box<dyn FramesSource>> {
    Ok(match kind {
        ReaderKind::ImageSequence => Box::new(ImageSequence::open(path)?),
        ReaderKind::TiffStack => Box::new(TiffStack::open(path)?),
        ReaderKind::Video => Box::new(VideoReader::open(path, &options.ffmpeg)?),
        ReaderKind::Zvi => Box::new(ZviReader::open(path, options.zvi_layout)?),
    })
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::backends::image_sequence::tests::write_png;
    use crate::error::Error;

    #[test]
    #[traced_test]
    fn directory_opens_as_image_sequence() {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["a2.png", "a10.png", "a1.png"].iter().enumerate() {
            write_png(dir.path(), name, i as u8);
        }

        let mut seq = open(dir.path()).unwrap();
        assert_eq!(seq.len(), 3);
        // a1, a2, a10
        assert_eq!(seq.get(0).unwrap().value_at(&[0, 0]), Some(2.0));
        assert_eq!(seq.get(-1).unwrap().value_at(&[0, 0]), Some(1.0));
        assert!(logs_contain("reader=image-sequence"));
    }

    #[test]
    fn options_apply_dtype() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "f.png", 7);

        let options = OpenOptions {
            dtype: Some(PixelType::F32),
            ..OpenOptions::default()
        };
        let mut seq = open_with(dir.path(), &options).unwrap();
        assert_eq!(seq.pixel_type(), PixelType::F32);
        assert_eq!(seq.get(0).unwrap().pixel_type(), PixelType::F32);
    }

    #[test]
    fn forced_reader_skips_sniffing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "f.png", 7);

        let options = OpenOptions {
            reader: Some(ReaderKind::TiffStack),
            ..OpenOptions::default()
        };
        assert!(matches!(open_with(&path, &options), Err(Error::Tiff(_))));
    }

    #[test]
    fn unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(matches!(open(&path), Err(Error::UnsupportedFormat { .. })));
    }
}
