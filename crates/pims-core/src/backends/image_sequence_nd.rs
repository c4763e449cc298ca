//! Image files whose names carry axis indices, e.g. `cell_t003z12c1.png`.

use std::collections::HashMap;

use regex::Regex;
use tracing::{info, warn};

use crate::backends::image_sequence::{ImageSequence, PathSpec};
use crate::error::{Error, Result};
use crate::frame::{Frame, PixelType};
use crate::nd::{Coords, FramesND, PlaneSource};
use crate::reader::FramesSource;

/// Axis identifiers searched for when none are given.
pub const DEFAULT_IDENTIFIERS: &str = "tzc";

/// Finds `<identifier><digits>` runs in file names.
struct IndexPattern {
    regex: Regex,
    identifiers: Vec<char>,
}

impl IndexPattern {
    fn new(identifiers: &str) -> Result<Self> {
        let identifiers: Vec<char> = identifiers.chars().collect();
        for (i, id) in identifiers.iter().enumerate() {
            if matches!(id, 'x' | 'y') {
                return Err(Error::Axis(format!(
                    "'{id}' is a plane axis and cannot be a file name identifier"
                )));
            }
            if identifiers[..i].contains(id) {
                return Err(Error::Axis(format!("identifier '{id}' listed twice")));
            }
        }
        let alternatives: Vec<String> = identifiers
            .iter()
            .map(|id| regex::escape(&id.to_string()))
            .collect();
        let regex = Regex::new(&format!(r"({})(\d+)", alternatives.join("|")))?;
        Ok(Self { regex, identifiers })
    }

    fn indices(&self, name: &str) -> Vec<usize> {
        let found: Vec<(char, usize)> = self
            .regex
            .captures_iter(name)
            .filter_map(|caps| {
                let id = caps[1].chars().next()?;
                let value = caps[2].parse().ok()?;
                Some((id, value))
            })
            .collect();
        let keep = found.len().saturating_sub(self.identifiers.len());
        let found = &found[keep..];

        self.identifiers
            .iter()
            .map(|id| {
                found
                    .iter()
                    .find(|(found_id, _)| found_id == id)
                    .map_or(0, |&(_, value)| value)
            })
            .collect()
    }
}

/// Axis indices encoded in `filename`, one per identifier, in identifier
/// order. Missing identifiers read as 0; when there are more matches than
/// identifiers only the trailing ones count.
pub fn filename_to_indices(filename: &str, identifiers: &str) -> Result<Vec<usize>> {
    Ok(IndexPattern::new(identifiers)?.indices(filename))
}

/// Plane storage backed by an [`ImageSequence`] and a table of contents
/// built from the file names.
pub struct ImageSequenceND {
    images: ImageSequence,
    axes: Vec<(char, usize)>,
    lookup: HashMap<Vec<usize>, usize>,
}

impl ImageSequenceND {
    /// Open and wrap in a [`FramesND`] that iterates over `t` (when present)
    /// and bundles `z` stacks (when present).
    pub fn open(spec: impl Into<PathSpec>, identifiers: &str) -> Result<FramesND<Self>> {
        let images = ImageSequence::open(spec)?;
        let mut nd = FramesND::new(Self::from_images(images, identifiers)?)?;
        if nd.size_of('t').is_some() {
            nd.set_iter_axes("t")?;
        }
        if nd.size_of('z').is_some() {
            nd.set_bundle_axes("zyx")?;
        }
        Ok(nd)
    }

    /// Build the table of contents over an already opened sequence.
    pub fn from_images(images: ImageSequence, identifiers: &str) -> Result<Self> {
        let pattern = IndexPattern::new(identifiers)?;
        let mut toc: Vec<Vec<usize>> = images
            .paths()
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                pattern.indices(&name)
            })
            .collect();

        let mut axes = Vec::new();
        let mut kept_columns = Vec::new();
        for (col, &id) in pattern.identifiers.iter().enumerate() {
            let column = toc.iter().map(|row| row[col]);
            let (min, max) = column.fold((usize::MAX, 0), |(lo, hi), v| (lo.min(v), hi.max(v)));
            if max == 0 {
                continue;
            }
            for row in &mut toc {
                row[col] -= min;
            }
            axes.push((id, max - min + 1));
            kept_columns.push(col);
        }

        let mut lookup = HashMap::with_capacity(toc.len());
        for (i, row) in toc.iter().enumerate() {
            let key: Vec<usize> = kept_columns.iter().map(|&c| row[c]).collect();
            if lookup.contains_key(&key) {
                warn!(path = ?images.paths()[i], ?key, "duplicate axis coordinates, keeping the first file");
                continue;
            }
            lookup.insert(key, i);
        }

        info!(source = %images.source_name(), ?axes, files = toc.len(), "multi-axis image sequence indexed");
        Ok(Self {
            images,
            axes,
            lookup,
        })
    }
}

impl PlaneSource for ImageSequenceND {
    fn axes(&self) -> Vec<(char, usize)> {
        self.axes.clone()
    }

    fn plane_shape(&self) -> Vec<usize> {
        self.images.frame_shape()
    }

    fn pixel_type(&self) -> PixelType {
        self.images.pixel_type()
    }

    fn get_plane(&mut self, coords: &Coords) -> Result<Frame> {
        let key: Vec<usize> = self
            .axes
            .iter()
            .map(|(axis, _)| coords.get(axis).copied().unwrap_or(0))
            .collect();
        let index = *self
            .lookup
            .get(&key)
            .ok_or_else(|| Error::MissingPlane(format!("{coords:?}")))?;
        self.images.get_frame(index)
    }

    fn source_name(&self) -> String {
        self.images.source_name()
    }
}
