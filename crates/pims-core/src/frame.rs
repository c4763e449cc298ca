use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};

use crate::error::{Error, Result};

/// Luma weights applied when collapsing RGB(A) frames to greyscale.
const GREY_WEIGHTS: [f64; 3] = [0.2125, 0.7154, 0.0721];

/// Sample type of a frame's pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    U8,
    U16,
    F32,
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelType::U8 => write!(f, "uint8"),
            PixelType::U16 => write!(f, "uint16"),
            PixelType::F32 => write!(f, "float32"),
        }
    }
}

impl FromStr for PixelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "uint8" => Ok(PixelType::U8),
            "u16" | "uint16" => Ok(PixelType::U16),
            "f32" | "float32" => Ok(PixelType::F32),
            other => Err(format!("unknown pixel type '{other}' (expected u8, u16 or f32)")),
        }
    }
}

/// Flat, row-major pixel storage.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            PixelData::U8(_) => PixelType::U8,
            PixelData::U16(_) => PixelType::U16,
            PixelData::F32(_) => PixelType::F32,
        }
    }

    fn get_f64(&self, i: usize) -> Option<f64> {
        match self {
            PixelData::U8(v) => v.get(i).map(|&x| f64::from(x)),
            PixelData::U16(v) => v.get(i).map(|&x| f64::from(x)),
            PixelData::F32(v) => v.get(i).map(|&x| f64::from(x)),
        }
    }
}

/// A metadata value attached to a frame by its reader.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Int(v) => write!(f, "{v}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Int(v as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

/// One image (or bundled stack of images) retrieved from a sequence.
///
/// `shape` is row-major: `[height, width]` for greyscale, `[height, width,
/// channels]` for colour, with extra leading axes for bundled stacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: PixelData,
    shape: Vec<usize>,
    frame_no: Option<usize>,
    metadata: BTreeMap<String, MetadataValue>,
}

impl Frame {
    /// Build a frame, checking that the buffer length matches the shape.
    pub fn new(data: PixelData, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::ShapeMismatch {
                expected: shape,
                got: vec![data.len()],
            });
        }
        Ok(Self::from_parts(data, shape))
    }

    fn from_parts(data: PixelData, shape: Vec<usize>) -> Self {
        Self {
            data,
            shape,
            frame_no: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Convert a decoded image, keeping its native sample depth.
    pub fn from_dynamic_image(img: DynamicImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        match img {
            DynamicImage::ImageLuma8(buf) => Self::from_parts(PixelData::U8(buf.into_raw()), vec![h, w]),
            DynamicImage::ImageLumaA8(buf) => {
                Self::from_parts(PixelData::U8(buf.into_raw()), vec![h, w, 2])
            }
            DynamicImage::ImageRgb8(buf) => {
                Self::from_parts(PixelData::U8(buf.into_raw()), vec![h, w, 3])
            }
            DynamicImage::ImageRgba8(buf) => {
                Self::from_parts(PixelData::U8(buf.into_raw()), vec![h, w, 4])
            }
            DynamicImage::ImageLuma16(buf) => {
                Self::from_parts(PixelData::U16(buf.into_raw()), vec![h, w])
            }
            DynamicImage::ImageLumaA16(buf) => {
                Self::from_parts(PixelData::U16(buf.into_raw()), vec![h, w, 2])
            }
            DynamicImage::ImageRgb16(buf) => {
                Self::from_parts(PixelData::U16(buf.into_raw()), vec![h, w, 3])
            }
            DynamicImage::ImageRgba16(buf) => {
                Self::from_parts(PixelData::U16(buf.into_raw()), vec![h, w, 4])
            }
            DynamicImage::ImageRgb32F(buf) => {
                Self::from_parts(PixelData::F32(buf.into_raw()), vec![h, w, 3])
            }
            DynamicImage::ImageRgba32F(buf) => {
                Self::from_parts(PixelData::F32(buf.into_raw()), vec![h, w, 4])
            }
            other => Self::from_parts(PixelData::U8(other.to_rgba8().into_raw()), vec![h, w, 4]),
        }
    }

    /// Convert back to an `image` buffer for encoding.
    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        let (h, w, c) = match *self.shape.as_slice() {
            [h, w] => (h, w, 1),
            [h, w, c] => (h, w, c),
            _ => {
                return Err(Error::UnsupportedPixelType(format!(
                    "cannot convert a frame of shape {:?} to an image",
                    self.shape
                )))
            }
        };
        let (Ok(w), Ok(h)) = (u32::try_from(w), u32::try_from(h)) else {
            return Err(Error::ShapeMismatch {
                expected: vec![u32::MAX as usize, u32::MAX as usize],
                got: self.shape.clone(),
            });
        };

        let img = match (&self.data, c) {
            (PixelData::U8(v), 1) => {
                ImageBuffer::<Luma<u8>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageLuma8)
            }
            (PixelData::U8(v), 2) => ImageBuffer::<LumaA<u8>, _>::from_raw(w, h, v.clone())
                .map(DynamicImage::ImageLumaA8),
            (PixelData::U8(v), 3) => {
                ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgb8)
            }
            (PixelData::U8(v), 4) => {
                ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgba8)
            }
            (PixelData::U16(v), 1) => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, v.clone())
                .map(DynamicImage::ImageLuma16),
            (PixelData::U16(v), 2) => ImageBuffer::<LumaA<u16>, _>::from_raw(w, h, v.clone())
                .map(DynamicImage::ImageLumaA16),
            (PixelData::U16(v), 3) => {
                ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgb16)
            }
            (PixelData::U16(v), 4) => ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, v.clone())
                .map(DynamicImage::ImageRgba16),
            (PixelData::F32(v), 3) => ImageBuffer::<Rgb<f32>, _>::from_raw(w, h, v.clone())
                .map(DynamicImage::ImageRgb32F),
            (PixelData::F32(v), 4) => ImageBuffer::<Rgba<f32>, _>::from_raw(w, h, v.clone())
                .map(DynamicImage::ImageRgba32F),
            (data, c) => {
                return Err(Error::UnsupportedPixelType(format!(
                    "{} frames with {c} channel(s) cannot be converted to an image",
                    data.pixel_type()
                )))
            }
        };

        img.ok_or_else(|| Error::ShapeMismatch {
            expected: self.shape.clone(),
            got: vec![self.data.len()],
        })
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn into_data(self) -> PixelData {
        self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn pixel_type(&self) -> PixelType {
        self.data.pixel_type()
    }

    pub fn frame_no(&self) -> Option<usize> {
        self.frame_no
    }

    pub fn set_frame_no(&mut self, frame_no: usize) {
        self.frame_no = Some(frame_no);
    }

    pub fn with_frame_no(mut self, frame_no: usize) -> Self {
        self.frame_no = Some(frame_no);
        self
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetadataValue> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, MetadataValue> {
        &mut self.metadata
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Numeric cast of every sample, with the semantics of Rust's `as`.
    pub fn astype(self, target: PixelType) -> Self {
        let Frame {
            data,
            shape,
            frame_no,
            metadata,
        } = self;
        let data = match (data, target) {
            (PixelData::U8(v), PixelType::U16) => PixelData::U16(v.into_iter().map(u16::from).collect()),
            (PixelData::U8(v), PixelType::F32) => PixelData::F32(v.into_iter().map(f32::from).collect()),
            (PixelData::U16(v), PixelType::U8) => PixelData::U8(v.into_iter().map(|x| x as u8).collect()),
            (PixelData::U16(v), PixelType::F32) => PixelData::F32(v.into_iter().map(f32::from).collect()),
            (PixelData::F32(v), PixelType::U8) => PixelData::U8(v.into_iter().map(|x| x as u8).collect()),
            (PixelData::F32(v), PixelType::U16) => PixelData::U16(v.into_iter().map(|x| x as u16).collect()),
            (data, _) => data,
        };
        Frame {
            data,
            shape,
            frame_no,
            metadata,
        }
    }

    /// Collapse the trailing channel axis of a colour frame.
    ///
    /// RGB and RGBA use the luma weights, grey+alpha keeps the grey channel.
    /// Frames without a channel axis of 2 to 4 are returned unchanged.
    pub fn to_grey(self) -> Self {
        let [h, w, c] = *self.shape.as_slice() else {
            return self;
        };
        if !(2..=4).contains(&c) {
            return self;
        }
        let Frame {
            data,
            frame_no,
            metadata,
            ..
        } = self;
        let data = match data {
            PixelData::U8(v) => PixelData::U8(grey_channels(&v, c, f64::from, |y| y.round() as u8)),
            PixelData::U16(v) => {
                PixelData::U16(grey_channels(&v, c, f64::from, |y| y.round() as u16))
            }
            PixelData::F32(v) => PixelData::F32(grey_channels(&v, c, f64::from, |y| y as f32)),
        };
        Frame {
            data,
            shape: vec![h, w],
            frame_no,
            metadata,
        }
    }

    /// Bundle equally shaped frames along a new leading axis.
    pub fn stack(frames: Vec<Frame>) -> Result<Frame> {
        let mut iter = frames.into_iter();
        let Some(first) = iter.next() else {
            return Err(Error::ShapeMismatch {
                expected: vec![1],
                got: vec![0],
            });
        };
        let shape = first.shape;
        let mut data = first.data;
        let mut count = 1;

        for frame in iter {
            if frame.shape != shape {
                return Err(Error::ShapeMismatch {
                    expected: shape,
                    got: frame.shape,
                });
            }
            let acc_type = data.pixel_type();
            match (&mut data, frame.data) {
                (PixelData::U8(acc), PixelData::U8(v)) => acc.extend(v),
                (PixelData::U16(acc), PixelData::U16(v)) => acc.extend(v),
                (PixelData::F32(acc), PixelData::F32(v)) => acc.extend(v),
                (_, other) => {
                    return Err(Error::UnsupportedPixelType(format!(
                        "cannot stack {} planes onto {acc_type}",
                        other.pixel_type()
                    )))
                }
            }
            count += 1;
        }

        let mut full_shape = Vec::with_capacity(shape.len() + 1);
        full_shape.push(count);
        full_shape.extend(shape);
        Ok(Frame::from_parts(data, full_shape))
    }

    /// Reinterpret the buffer with a new shape of the same element count.
    pub fn reshape(mut self, shape: Vec<usize>) -> Result<Self> {
        if shape.iter().product::<usize>() != self.data.len() {
            return Err(Error::ShapeMismatch {
                expected: shape,
                got: self.shape,
            });
        }
        self.shape = shape;
        Ok(self)
    }

    /// Cyclic shift of the flattened buffer. Positive shifts move samples
    /// towards higher indices.
    pub fn roll(self, shift: isize) -> Self {
        let len = self.data.len();
        if len == 0 {
            return self;
        }
        let k = shift.rem_euclid(len as isize) as usize;
        let Frame {
            data,
            shape,
            frame_no,
            metadata,
        } = self;
        let data = match data {
            PixelData::U8(mut v) => {
                v.rotate_right(k);
                PixelData::U8(v)
            }
            PixelData::U16(mut v) => {
                v.rotate_right(k);
                PixelData::U16(v)
            }
            PixelData::F32(mut v) => {
                v.rotate_right(k);
                PixelData::F32(v)
            }
        };
        Frame {
            data,
            shape,
            frame_no,
            metadata,
        }
    }

    /// Read one sample, or `None` when the index is outside the shape.
    pub fn value_at(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0;
        for (&i, &dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return None;
            }
            flat = flat * dim + i;
        }
        self.data.get_f64(flat)
    }
}

fn grey_channels<T: Copy>(
    src: &[T],
    channels: usize,
    to_f: impl Fn(T) -> f64,
    from_f: impl Fn(f64) -> T,
) -> Vec<T> {
    src.chunks_exact(channels)
        .map(|px| {
            if channels == 2 {
                px[0]
            } else {
                from_f(
                    GREY_WEIGHTS[0] * to_f(px[0])
                        + GREY_WEIGHTS[1] * to_f(px[1])
                        + GREY_WEIGHTS[2] * to_f(px[2]),
                )
            }
        })
        .collect()
}
