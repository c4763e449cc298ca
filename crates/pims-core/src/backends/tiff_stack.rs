//! Multi-page TIFF files, one frame per page.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::frame::{Frame, PixelData, PixelType};
use crate::reader::FramesSource;

pub struct TiffStack {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    pages: usize,
    frame_shape: Vec<usize>,
    pixel_type: PixelType,
}

impl TiffStack {
    pub fn open(path: &Path) -> Result<Self> {
        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;

        let mut pages = 1;
        while decoder.more_images() {
            decoder.next_image()?;
            pages += 1;
        }

        decoder.seek_to_image(0)?;
        let first = read_page(&mut decoder)?;

        let stack = Self {
            path: path.to_path_buf(),
            decoder,
            pages,
            frame_shape: first.shape().to_vec(),
            pixel_type: first.pixel_type(),
        };
        info!(
            path = %stack.path.display(),
            pages,
            frame_shape = ?stack.frame_shape,
            pixel_type = %stack.pixel_type,
            "TIFF stack opened"
        );
        Ok(stack)
    }
}

impl FramesSource for TiffStack {
    fn len(&self) -> usize {
        self.pages
    }

    fn frame_shape(&self) -> Vec<usize> {
        self.frame_shape.clone()
    }

    fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    fn get_frame(&mut self, index: usize) -> Result<Frame> {
        if index >= self.pages {
            return Err(Error::IndexOutOfRange {
                index: index as isize,
                len: self.pages,
            });
        }
        self.decoder.seek_to_image(index)?;
        debug!(page = index, "decoding TIFF page");
        Ok(read_page(&mut self.decoder)?.with_frame_no(index))
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }
}

fn read_page(decoder: &mut Decoder<BufReader<File>>) -> Result<Frame> {
    let (width, height) = decoder.dimensions()?;
    let channels = match decoder.colortype()? {
        ColorType::Gray(_) => 1,
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => {
            return Err(Error::UnsupportedPixelType(format!(
                "TIFF colour type {other:?}"
            )))
        }
    };

    let data = match decoder.read_image()? {
        DecodingResult::U8(v) => PixelData::U8(v),
        DecodingResult::U16(v) => PixelData::U16(v),
        DecodingResult::F32(v) => PixelData::F32(v),
        DecodingResult::F64(v) => PixelData::F32(v.into_iter().map(|x| x as f32).collect()),
        _ => {
            return Err(Error::UnsupportedPixelType(
                "TIFF samples must be 8/16-bit unsigned or floating point".to_owned(),
            ))
        }
    };

    let mut shape = vec![height as usize, width as usize];
    if channels > 1 {
        shape.push(channels);
    }
    Frame::new(data, shape)
}

#[cfg(test)]
mod tests {
    use std::io::BufWriter;

    use tiff::encoder::{colortype, TiffEncoder};

    use super::*;

    fn write_stack(path: &Path, pages: &[u16]) {
        let file = BufWriter::new(File::create(path).unwrap());
        let mut encoder = TiffEncoder::new(file).unwrap();
        for &value in pages {
            let data: Vec<u16> = (0..12).map(|i| value + i).collect();
            encoder.write_image::<colortype::Gray16>(4, 3, &data).unwrap();
        }
    }

    #[test]
    fn counts_pages_and_reads_each() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        write_stack(&path, &[100, 200, 300]);

        let mut stack = TiffStack::open(&path).unwrap();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.frame_shape(), vec![3, 4]);
        assert_eq!(stack.pixel_type(), PixelType::U16);

        let page = stack.get_frame(2).unwrap();
        assert_eq!(page.frame_no(), Some(2));
        assert_eq!(page.value_at(&[0, 0]), Some(300.0));
        assert_eq!(page.value_at(&[2, 3]), Some(311.0));

        // going back to an earlier page after a later one
        assert_eq!(stack.get_frame(0).unwrap().value_at(&[0, 1]), Some(101.0));
    }

    #[test]
    fn single_page_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.tiff");
        let file = BufWriter::new(File::create(&path).unwrap());
        let mut encoder = TiffEncoder::new(file).unwrap();
        let data: Vec<u8> = (0..2 * 2 * 3).map(|i| i as u8).collect();
        encoder.write_image::<colortype::RGB8>(2, 2, &data).unwrap();
        drop(encoder);

        let mut stack = TiffStack::open(&path).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.frame_shape(), vec![2, 2, 3]);
        assert_eq!(stack.get_frame(0).unwrap().value_at(&[1, 1, 2]), Some(11.0));
    }

    #[test]
    fn page_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        write_stack(&path, &[1]);

        let mut stack = TiffStack::open(&path).unwrap();
        assert!(matches!(
            stack.get_frame(1),
            Err(Error::IndexOutOfRange { index: 1, len: 1 })
        ));
    }
}
