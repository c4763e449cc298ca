//! Sequences of ordinary image files: a directory, a glob pattern, an
//! explicit list of files, or the contents of a zip archive.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use image::ImageFormat;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::frame::{Frame, PixelType};
use crate::reader::FramesSource;
use crate::sniff::is_glob_pattern;
use crate::sort::natural_sort;

const LIST_SOURCE_NAME: &str = "(list of images)";

/// Where the images of a sequence come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSpec {
    /// A directory, a glob pattern such as `frames/*.png`, a single file,
    /// or a zip archive.
    Pattern(String),
    /// Exactly these files, in natural order.
    Files(Vec<PathBuf>),
}

impl From<&str> for PathSpec {
    fn from(s: &str) -> Self {
        PathSpec::Pattern(s.to_owned())
    }
}

impl From<String> for PathSpec {
    fn from(s: String) -> Self {
        PathSpec::Pattern(s)
    }
}

impl From<&Path> for PathSpec {
    fn from(p: &Path) -> Self {
        PathSpec::Pattern(p.to_string_lossy().into_owned())
    }
}

impl From<PathBuf> for PathSpec {
    fn from(p: PathBuf) -> Self {
        PathSpec::from(p.as_path())
    }
}

impl From<Vec<PathBuf>> for PathSpec {
    fn from(files: Vec<PathBuf>) -> Self {
        PathSpec::Files(files)
    }
}

/// Turns the raw bytes of one file into a frame.
///
/// Any `Fn(&[u8], &Path) -> Result<Frame>` closure implements this, which is
/// how a sequence is customised for files the `image` crate can't read.
pub trait ImageDecode: Send + Sync {
    fn decode(&self, bytes: &[u8], name: &Path) -> Result<Frame>;
}

impl<F> ImageDecode for F
where
    F: Fn(&[u8], &Path) -> Result<Frame> + Send + Sync,
{
    fn decode(&self, bytes: &[u8], name: &Path) -> Result<Frame> {
        self(bytes, name)
    }
}

/// Decodes with the `image` crate: content sniffing first, then the file
/// extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl ImageDecode for DefaultDecoder {
    fn decode(&self, bytes: &[u8], name: &Path) -> Result<Frame> {
        let img = match image::load_from_memory(bytes) {
            Ok(img) => img,
            Err(guess_err) => match ImageFormat::from_path(name) {
                Ok(format) => image::load_from_memory_with_format(bytes, format)?,
                Err(_) => return Err(guess_err.into()),
            },
        };
        Ok(Frame::from_dynamic_image(img))
    }
}

enum Storage {
    Files,
    Zip(ZipArchive<BufReader<File>>),
}

/// One frame per image file.
pub struct ImageSequence {
    storage: Storage,
    paths: Vec<PathBuf>,
    source: Option<PathBuf>,
    decoder: Box<dyn ImageDecode>,
    frame_shape: Vec<usize>,
    pixel_type: PixelType,
}

impl ImageSequence {
    pub fn open(spec: impl Into<PathSpec>) -> Result<Self> {
        Self::with_decoder(spec, DefaultDecoder)
    }

    /// Open with a custom per-file decoder.
    pub fn with_decoder(spec: impl Into<PathSpec>, decoder: impl ImageDecode + 'static) -> Result<Self> {
        let (storage, paths, source) = collect_files(spec.into())?;
        let mut seq = Self {
            storage,
            paths,
            source,
            decoder: Box::new(decoder),
            frame_shape: Vec::new(),
            pixel_type: PixelType::U8,
        };

        let first = seq.read(0)?;
        seq.frame_shape = first.shape().to_vec();
        seq.pixel_type = first.pixel_type();

        info!(
            source = %seq.source_name(),
            count = seq.paths.len(),
            frame_shape = ?seq.frame_shape,
            pixel_type = %seq.pixel_type,
            zip = seq.is_zip(),
            "image sequence opened"
        );
        Ok(seq)
    }

    /// File paths (or archive entry names) in frame order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_zip(&self) -> bool {
        matches!(self.storage, Storage::Zip(_))
    }

    fn read(&mut self, i: usize) -> Result<Frame> {
        let path = &self.paths[i];
        let bytes = match &mut self.storage {
            Storage::Files => fs::read(path)?,
            Storage::Zip(archive) => {
                let mut entry = archive.by_name(&path.to_string_lossy())?;
                let mut buf = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut buf)?;
                buf
            }
        };
        debug!(?path, bytes = bytes.len(), "decoding image");
        self.decoder.decode(&bytes, path)
    }
}

impl FramesSource for ImageSequence {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn frame_shape(&self) -> Vec<usize> {
        self.frame_shape.clone()
    }

    fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    fn get_frame(&mut self, index: usize) -> Result<Frame> {
        if index >= self.paths.len() {
            return Err(Error::IndexOutOfRange {
                index: index as isize,
                len: self.paths.len(),
            });
        }
        let frame = self.read(index)?;
        Ok(frame.astype(self.pixel_type).with_frame_no(index))
    }

    fn source_name(&self) -> String {
        self.source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| LIST_SOURCE_NAME.to_owned())
    }
}

fn collect_files(spec: PathSpec) -> Result<(Storage, Vec<PathBuf>, Option<PathBuf>)> {
    let pattern = match spec {
        PathSpec::Files(mut files) => {
            if files.is_empty() {
                return Err(Error::NoFilesFound {
                    pattern: LIST_SOURCE_NAME.to_owned(),
                });
            }
            natural_sort(&mut files);
            return Ok((Storage::Files, files, None));
        }
        PathSpec::Pattern(pattern) => pattern,
    };

    let path = Path::new(&pattern);
    let source = Some(absolutize(path)?);

    if !is_glob_pattern(&pattern) && path.is_file() && is_zip_file(path)? {
        let archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        let mut names: Vec<PathBuf> = archive
            .file_names()
            .filter(|name| !name.ends_with('/') && name.contains('.'))
            .map(PathBuf::from)
            .collect();
        if names.is_empty() {
            return Err(Error::NoFilesFound { pattern });
        }
        natural_sort(&mut names);
        return Ok((Storage::Zip(archive), names, source));
    }

    let mut files = if path.is_dir() {
        warn!(
            dir = %path.display(),
            "loading every file in this directory; use a pattern like dir/*.png to skip extraneous files"
        );
        let mut files = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry_path = entry?.path();
            if entry_path.is_file() {
                files.push(entry_path);
            }
        }
        files
    } else if is_glob_pattern(&pattern) {
        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(p) if p.is_file() => files.push(p),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping unreadable glob match"),
            }
        }
        files
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        Vec::new()
    };

    if files.is_empty() {
        return Err(Error::NoFilesFound { pattern });
    }
    natural_sort(&mut files);
    Ok((Storage::Files, files, source))
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn is_zip_file(path: &Path) -> Result<bool> {
    let mut head = Vec::with_capacity(4);
    File::open(path)?.take(4).read_to_end(&mut head)?;
    Ok(head == b"PK\x03\x04" || head == b"PK\x05\x06")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Cursor, Write};

    use image::{GrayImage, Luma};

    use super::*;
    use crate::frame::PixelData;

    pub(crate) fn png_bytes(value: u8, width: u32, height: u32) -> Vec<u8> {
        let img = GrayImage::from_pixel(width, height, Luma([value]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    pub(crate) fn write_png(dir: &Path, name: &str, value: u8) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, png_bytes(value, 4, 3)).unwrap();
        path
    }

    fn first_value(frame: &Frame) -> u8 {
        frame.value_at(&[0, 0]).unwrap() as u8
    }

    #[test]
    fn glob_pattern_is_naturally_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for i in [10u8, 2, 1] {
            write_png(dir.path(), &format!("img{i}.png"), i);
        }
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let pattern = format!("{}/img*.png", dir.path().display());
        let mut seq = ImageSequence::open(pattern.as_str()).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.frame_shape(), vec![3, 4]);
        assert_eq!(seq.pixel_type(), PixelType::U8);
        let order: Vec<u8> = (0..3).map(|i| first_value(&seq.get_frame(i).unwrap())).collect();
        assert_eq!(order, vec![1, 2, 10]);
    }

    #[test]
    fn directory_loads_every_file() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 1);
        write_png(dir.path(), "b.png", 2);
        fs::create_dir(dir.path().join("nested")).unwrap();

        let seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len(), 2);
        assert!(seq.source_name().ends_with(&*dir.path().to_string_lossy()));
    }

    #[test]
    fn explicit_file_list() {
        let dir = tempfile::tempdir().unwrap();
        let b = write_png(dir.path(), "f11.png", 11);
        let a = write_png(dir.path(), "f9.png", 9);

        let mut seq = ImageSequence::open(vec![b, a]).unwrap();
        assert_eq!(seq.source_name(), LIST_SOURCE_NAME);
        assert_eq!(first_value(&seq.get_frame(0).unwrap()), 9);
        assert_eq!(seq.get_frame(1).unwrap().frame_no(), Some(1));
    }

    #[test]
    fn zip_archive_entries() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("frames.zip");
        let mut zip = zip::ZipWriter::new(File::create(&zip_path).unwrap());
        let options = zip::write::FileOptions::default();
        zip.add_directory("frames/", options).unwrap();
        for i in [3u8, 20, 7] {
            zip.start_file(format!("frames/f{i}.png"), options).unwrap();
            zip.write_all(&png_bytes(i, 2, 2)).unwrap();
        }
        zip.start_file("README", options).unwrap();
        zip.write_all(b"no extension, skipped").unwrap();
        zip.finish().unwrap();

        let mut seq = ImageSequence::open(zip_path.as_path()).unwrap();
        assert!(seq.is_zip());
        assert_eq!(seq.len(), 3);
        let order: Vec<u8> = (0..3).map(|i| first_value(&seq.get_frame(i).unwrap())).collect();
        assert_eq!(order, vec![3, 7, 20]);
    }

    #[test]
    fn no_matches_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.png", dir.path().display());
        assert!(matches!(
            ImageSequence::open(pattern.as_str()),
            Err(Error::NoFilesFound { .. })
        ));
        assert!(matches!(
            ImageSequence::open(Vec::<PathBuf>::new()),
            Err(Error::NoFilesFound { .. })
        ));
    }

    #[test]
    fn out_of_range_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "only.png", 5);
        let mut seq = ImageSequence::open(path).unwrap();
        assert!(matches!(
            seq.get_frame(1),
            Err(Error::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn custom_decoder_reads_raw_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3u8 {
            fs::write(dir.path().join(format!("{i}.raw")), [i; 6]).unwrap();
        }
        let decoder = |bytes: &[u8], _: &Path| Frame::new(PixelData::U8(bytes.to_vec()), vec![2, 3]);
        let pattern = format!("{}/*.raw", dir.path().display());
        let mut seq = ImageSequence::with_decoder(pattern.as_str(), decoder).unwrap();
        assert_eq!(seq.frame_shape(), vec![2, 3]);
        assert_eq!(seq.get_frame(2).unwrap().value_at(&[1, 2]), Some(2.0));
    }

    #[test]
    fn later_frames_are_cast_to_first_pixel_type() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a1.png", 1);
        let img = image::ImageBuffer::<Luma<u16>, _>::from_pixel(4, 3, Luma([300u16]));
        img.save(dir.path().join("a2.png")).unwrap();

        let pattern = format!("{}/a*.png", dir.path().display());
        let mut seq = ImageSequence::open(pattern.as_str()).unwrap();
        let second = seq.get_frame(1).unwrap();
        assert_eq!(second.pixel_type(), PixelType::U8);
        assert_eq!(first_value(&second), 44);
    }
}
