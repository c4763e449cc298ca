//! Zeiss AxioVision ZVI files: an OLE compound document holding one raw
//! 16-bit image per `Image/Item(N)/Contents` stream.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use cfb::CompoundFile;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{Frame, PixelData, PixelType};
use crate::reader::FramesSource;

/// Geometry of the raw item streams, which the container does not record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZviLayout {
    pub width: usize,
    pub height: usize,
    /// Item data arrives rotated by this many samples; it is rolled back
    /// towards lower indices after decoding.
    pub shift: usize,
}

impl Default for ZviLayout {
    fn default() -> Self {
        Self {
            width: 656,
            height: 492,
            shift: 162,
        }
    }
}

pub struct ZviReader {
    path: PathBuf,
    ole: CompoundFile<File>,
    toc: Vec<u32>,
    layout: ZviLayout,
}

impl ZviReader {
    pub fn open(path: &Path, layout: ZviLayout) -> Result<Self> {
        let ole = cfb::open(path)
            .map_err(|e| Error::Ole(format!("cannot open {}: {e}", path.display())))?;

        let mut toc: Vec<u32> = ole
            .walk()
            .filter(|entry| entry.is_stream())
            .filter_map(|entry| item_number(entry.path()))
            .collect();
        toc.sort_unstable();
        if toc.is_empty() {
            warn!(path = %path.display(), "no Image/Item(N)/Contents streams found");
        }

        info!(
            path = %path.display(),
            items = toc.len(),
            width = layout.width,
            height = layout.height,
            "ZVI file opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            ole,
            toc,
            layout,
        })
    }

    /// Item numbers in frame order.
    pub fn items(&self) -> &[u32] {
        &self.toc
    }
}

/// `N` for a stream at `/Image/Item(N)/Contents`.
fn item_number(path: &Path) -> Option<u32> {
    let names: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();
    match names.as_slice() {
        ["Image", item, "Contents"] => item.strip_prefix("Item(")?.strip_suffix(')')?.parse().ok(),
        _ => None,
    }
}

impl FramesSource for ZviReader {
    fn len(&self) -> usize {
        self.toc.len()
    }

    fn frame_shape(&self) -> Vec<usize> {
        vec![self.layout.height, self.layout.width]
    }

    fn pixel_type(&self) -> PixelType {
        PixelType::U16
    }

    fn get_frame(&mut self, index: usize) -> Result<Frame> {
        let item = *self.toc.get(index).ok_or(Error::IndexOutOfRange {
            index: index as isize,
            len: self.toc.len(),
        })?;
        let stream_path = format!("/Image/Item({item})/Contents");

        let mut bytes = Vec::new();
        self.ole
            .open_stream(&stream_path)
            .and_then(|mut stream| stream.read_to_end(&mut bytes))
            .map_err(|e| Error::Ole(format!("cannot read {stream_path}: {e}")))?;

        let samples = self.layout.width * self.layout.height;
        if bytes.len() < samples * 2 {
            return Err(Error::Ole(format!(
                "{stream_path} holds {} bytes, expected at least {}",
                bytes.len(),
                samples * 2
            )));
        }
        debug!(item, bytes = bytes.len(), "decoding ZVI item");

        let data: Vec<u16> = bytes[..samples * 2]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let frame = Frame::new(PixelData::U16(data), self.frame_shape())?;
        Ok(frame.roll(-(self.layout.shift as isize)).with_frame_no(index))
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SMALL: ZviLayout = ZviLayout {
        width: 4,
        height: 3,
        shift: 5,
    };

    fn write_zvi(path: &Path, items: &[(u32, u16)]) {
        let mut ole = cfb::create(path).unwrap();
        ole.create_storage("/Image").unwrap();
        for &(n, base) in items {
            ole.create_storage(format!("/Image/Item({n})")).unwrap();
            let mut stream = ole.create_stream(format!("/Image/Item({n})/Contents")).unwrap();
            let bytes: Vec<u8> = (0..12u16).flat_map(|i| (base + i).to_le_bytes()).collect();
            stream.write_all(&bytes).unwrap();
        }
        ole.create_stream("/Tags").unwrap();
        ole.flush().unwrap();
    }

    #[test]
    fn items_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.zvi");
        write_zvi(&path, &[(10, 1000), (2, 200), (1, 100)]);

        let reader = ZviReader::open(&path, SMALL).unwrap();
        assert_eq!(reader.items(), &[1, 2, 10]);
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.frame_shape(), vec![3, 4]);
    }

    #[test]
    fn frames_are_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.zvi");
        write_zvi(&path, &[(1, 100), (2, 200)]);

        let mut reader = ZviReader::open(&path, SMALL).unwrap();
        let frame = reader.get_frame(1).unwrap();
        assert_eq!(frame.frame_no(), Some(1));
        let PixelData::U16(data) = frame.data() else {
            panic!("expected u16 samples");
        };
        for (i, &v) in data.iter().enumerate() {
            assert_eq!(v, 200 + ((i + 5) % 12) as u16);
        }
    }

    #[test]
    fn short_stream_is_an_ole_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.zvi");
        write_zvi(&path, &[(1, 0)]);

        let layout = ZviLayout {
            width: 8,
            ..SMALL
        };
        let mut reader = ZviReader::open(&path, layout).unwrap();
        assert!(matches!(reader.get_frame(0), Err(Error::Ole(_))));
    }

    #[test]
    fn item_paths() {
        assert_eq!(item_number(Path::new("/Image/Item(7)/Contents")), Some(7));
        assert_eq!(item_number(Path::new("/Image/Item(7)/Tags")), None);
        assert_eq!(item_number(Path::new("/Image/Contents")), None);
    }
}
