//! Random-access frame sequences over image files, multi-page TIFFs, videos
//! and ZVI files, all behind one indexable, sliceable interface.

pub mod api;
pub mod backends;
pub mod error;
pub mod export;
pub mod frame;
pub mod nd;
pub mod reader;
pub mod sequence;
pub mod sniff;
pub mod sort;

pub use api::{open, open_with, OpenOptions};
pub use error::{Error, Result};
pub use frame::{Frame, MetadataValue, PixelData, PixelType};
pub use reader::{FramesSource, ReaderKind};
pub use sequence::{FramesSequence, FramesView, SliceSpec};
