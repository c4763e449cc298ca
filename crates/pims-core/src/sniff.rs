use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::reader::ReaderKind;

/// Bytes read from the head of a file for signature matching.
const SIGNATURE_LEN: usize = 16;

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Propose a reader for `path`.
///
/// Glob patterns and directories are image sequences. Files are matched by
/// content signature first and by extension second.
pub fn sniff(path: &Path) -> Result<ReaderKind> {
    let text = path.to_string_lossy();
    if is_glob_pattern(&text) {
        debug!(?path, "path is a glob pattern");
        return Ok(ReaderKind::ImageSequence);
    }
    if path.is_dir() {
        debug!(?path, "path is a directory");
        return Ok(ReaderKind::ImageSequence);
    }

    let head = read_head(path)?;
    if let Some(kind) = sniff_signature(&head) {
        debug!(?path, reader = %kind, "matched content signature");
        return Ok(kind);
    }

    let kind = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ReaderKind::for_extension)
        .ok_or_else(|| Error::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
    debug!(?path, reader = %kind, "matched file extension");
    Ok(kind)
}

pub fn is_glob_pattern(text: &str) -> bool {
    text.contains(|c: char| matches!(c, '*' | '?' | '['))
}

fn read_head(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut head = Vec::with_capacity(SIGNATURE_LEN);
    file.take(SIGNATURE_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Match well-known magic numbers.
pub fn sniff_signature(head: &[u8]) -> Option<ReaderKind> {
    let starts = |magic: &[u8]| head.starts_with(magic);

    if starts(b"PK\x03\x04") {
        return Some(ReaderKind::ImageSequence);
    }
    if starts(b"II*\0") || starts(b"MM\0*") || starts(b"II+\0") || starts(b"MM\0+") {
        return Some(ReaderKind::TiffStack);
    }
    if starts(&OLE_MAGIC) {
        return Some(ReaderKind::Zvi);
    }
    if head.len() >= 12 && starts(b"RIFF") {
        return match &head[8..12] {
            b"AVI " => Some(ReaderKind::Video),
            b"WEBP" => Some(ReaderKind::ImageSequence),
            _ => None,
        };
    }
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return Some(ReaderKind::Video);
    }
    if starts(&[0x1A, 0x45, 0xDF, 0xA3])
        || starts(&[0x00, 0x00, 0x01, 0xBA])
        || starts(&[0x00, 0x00, 0x01, 0xB3])
        || starts(b"FLV")
    {
        return Some(ReaderKind::Video);
    }
    if starts(b"\x89PNG\r\n\x1a\n") || starts(&[0xFF, 0xD8, 0xFF]) || starts(b"GIF8") || starts(b"BM") {
        return Some(ReaderKind::ImageSequence);
    }
    None
}
