pub mod image_sequence;
pub mod image_sequence_nd;
pub mod tiff_stack;
pub mod video;
pub mod zvi;
