use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pims_core::ReaderKind;

#[derive(Parser)]
#[command(name = "pims", about = "Inspect and export image sequences, stacks and videos")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print which reader handles a path and a summary of its frames.
    Info {
        /// Image file, directory, glob pattern, zip, TIFF, video or ZVI file.
        input: PathBuf,

        /// Use this reader instead of sniffing (image-sequence, tiff-stack, video, zvi).
        #[arg(long)]
        reader: Option<ReaderKind>,
    },

    /// Export frames as numbered PNG files.
    Export {
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to write frame_XXXXXXXX.png files into.
        #[arg(short, long)]
        output: PathBuf,

        /// First frame to export (negative counts from the end).
        #[arg(long, allow_hyphen_values = true)]
        start: Option<isize>,

        /// Stop before this frame (negative counts from the end).
        #[arg(long, allow_hyphen_values = true)]
        stop: Option<isize>,

        /// Export every Nth frame; negative steps run backwards.
        #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
        step: isize,

        /// Convert colour frames to greyscale.
        #[arg(long)]
        grey: bool,

        /// Draw the frame number onto each exported image (needs --font).
        #[arg(long)]
        annotate: bool,

        /// TTF/OTF font used for annotation.
        #[arg(long)]
        font: Option<PathBuf>,

        #[arg(long)]
        reader: Option<ReaderKind>,
    },
}
