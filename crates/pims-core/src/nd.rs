//! Multi-axis sources (time, depth, channel, ...) presented as a sequence.
//!
//! A [`PlaneSource`] stores 2D planes addressed by axis coordinates.
//! [`FramesND`] iterates over some of those axes and bundles others into
//! each returned frame; every remaining axis is pinned to a default
//! coordinate.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::{Frame, PixelType};
use crate::reader::FramesSource;

/// Coordinates along named axes.
pub type Coords = BTreeMap<char, usize>;

/// Storage of 2D planes addressed by non-spatial axis coordinates.
pub trait PlaneSource: Send {
    /// Non-spatial axes and their sizes. Must not include `y` or `x`.
    fn axes(&self) -> Vec<(char, usize)>;

    /// Shape of one plane: `[y, x]` or `[y, x, channels]`.
    fn plane_shape(&self) -> Vec<usize>;

    fn pixel_type(&self) -> PixelType;

    fn get_plane(&mut self, coords: &Coords) -> Result<Frame>;

    fn source_name(&self) -> String;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct FramesND<S> {
    source: S,
    sizes: Vec<(char, usize)>,
    iter_axes: Vec<char>,
    bundle_axes: Vec<char>,
    default_coords: Coords,
}

impl<S: PlaneSource> FramesND<S> {
    /// Wrap `source`. Initially nothing is iterated and each frame is a
    /// single `yx` plane.
    pub fn new(source: S) -> Result<Self> {
        let plane_shape = source.plane_shape();
        if plane_shape.len() < 2 {
            return Err(Error::Axis(format!(
                "planes must be at least 2D, got shape {plane_shape:?}"
            )));
        }

        let mut sizes = source.axes();
        for (i, (axis, _)) in sizes.iter().enumerate() {
            if matches!(axis, 'x' | 'y') {
                return Err(Error::Axis(format!("'{axis}' is reserved for plane axes")));
            }
            if sizes[..i].iter().any(|(other, _)| other == axis) {
                return Err(Error::Axis(format!("duplicate axis '{axis}'")));
            }
        }
        sizes.push(('y', plane_shape[0]));
        sizes.push(('x', plane_shape[1]));

        let default_coords = sizes.iter().map(|&(axis, _)| (axis, 0)).collect();
        Ok(Self {
            source,
            sizes,
            iter_axes: Vec::new(),
            bundle_axes: vec!['y', 'x'],
            default_coords,
        })
    }

    pub fn sizes(&self) -> &[(char, usize)] {
        &self.sizes
    }

    pub fn size_of(&self, axis: char) -> Option<usize> {
        self.sizes.iter().find(|(a, _)| *a == axis).map(|&(_, size)| size)
    }

    pub fn ndim(&self) -> usize {
        self.sizes.len()
    }

    pub fn axes(&self) -> Vec<char> {
        self.sizes.iter().map(|&(axis, _)| axis).collect()
    }

    pub fn iter_axes(&self) -> &[char] {
        &self.iter_axes
    }

    pub fn bundle_axes(&self) -> &[char] {
        &self.bundle_axes
    }

    pub fn default_coords(&self) -> &Coords {
        &self.default_coords
    }

    pub fn inner(&self) -> &S {
        &self.source
    }

    /// Axes to iterate over; the last one varies fastest. Axes moved here
    /// are removed from the bundle axes.
    pub fn set_iter_axes(&mut self, axes: &str) -> Result<()> {
        let axes = self.parse_axes(axes)?;
        if let Some(axis) = axes.iter().find(|a| matches!(a, 'x' | 'y')) {
            return Err(Error::Axis(format!("cannot iterate over plane axis '{axis}'")));
        }
        self.bundle_axes.retain(|a| !axes.contains(a));
        self.iter_axes = axes;
        Ok(())
    }

    /// Axes bundled into each frame, in output order. Must end with `yx`.
    /// Axes moved here are removed from the iter axes.
    pub fn set_bundle_axes(&mut self, axes: &str) -> Result<()> {
        let axes = self.parse_axes(axes)?;
        if !axes.ends_with(&['y', 'x']) {
            return Err(Error::Axis("bundle axes must end with 'yx'".into()));
        }
        self.iter_axes.retain(|a| !axes.contains(a));
        self.bundle_axes = axes;
        Ok(())
    }

    /// Coordinate used for `axis` when it is neither iterated nor bundled.
    pub fn set_default_coord(&mut self, axis: char, value: usize) -> Result<()> {
        let size = self
            .size_of(axis)
            .ok_or_else(|| Error::Axis(format!("unknown axis '{axis}'")))?;
        if value >= size {
            return Err(Error::Axis(format!(
                "default coordinate {value} is outside axis '{axis}' of size {size}"
            )));
        }
        self.default_coords.insert(axis, value);
        Ok(())
    }

    fn parse_axes(&self, axes: &str) -> Result<Vec<char>> {
        let parsed: Vec<char> = axes.chars().collect();
        for (i, axis) in parsed.iter().enumerate() {
            if self.size_of(*axis).is_none() {
                return Err(Error::Axis(format!("unknown axis '{axis}'")));
            }
            if parsed[..i].contains(axis) {
                return Err(Error::Axis(format!("axis '{axis}' listed twice")));
            }
        }
        Ok(parsed)
    }

    fn stacked_axes(&self) -> Vec<char> {
        self.bundle_axes
            .iter()
            .copied()
            .filter(|a| !matches!(a, 'x' | 'y'))
            .collect()
    }

    /// Write the C-order coordinates of `flat` over `axes` into `coords`.
    fn unravel(&self, mut flat: usize, axes: &[char], coords: &mut Coords) {
        for &axis in axes.iter().rev() {
            let size = self.size_of(axis).unwrap_or(1).max(1);
            coords.insert(axis, flat % size);
            flat /= size;
        }
    }

    fn axes_len(&self, axes: &[char]) -> usize {
        axes.iter().map(|&a| self.size_of(a).unwrap_or(1)).product()
    }
}

impl<S: PlaneSource> FramesSource for FramesND<S> {
    fn len(&self) -> usize {
        self.axes_len(&self.iter_axes)
    }

    fn frame_shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self
            .stacked_axes()
            .iter()
            .map(|&a| self.size_of(a).unwrap_or(1))
            .collect();
        shape.extend(self.source.plane_shape());
        shape
    }

    fn pixel_type(&self) -> PixelType {
        self.source.pixel_type()
    }

    fn get_frame(&mut self, index: usize) -> Result<Frame> {
        let len = self.len();
        if index >= len {
            return Err(Error::IndexOutOfRange {
                index: index as isize,
                len,
            });
        }

        let mut coords = self.default_coords.clone();
        let iter_axes = self.iter_axes.clone();
        self.unravel(index, &iter_axes, &mut coords);

        let stacked = self.stacked_axes();
        let count = self.axes_len(&stacked);
        let mut planes = Vec::with_capacity(count);
        for k in 0..count {
            let mut plane_coords = coords.clone();
            self.unravel(k, &stacked, &mut plane_coords);
            debug!(?plane_coords, "reading plane");
            planes.push(self.source.get_plane(&plane_coords)?);
        }

        let mut frame = if stacked.is_empty() {
            planes.pop().ok_or_else(|| Error::MissingPlane(format!("{coords:?}")))?
        } else {
            let shape = self.frame_shape();
            Frame::stack(planes)?.reshape(shape)?
        };
        for &axis in &iter_axes {
            frame.insert_metadata(axis.to_string(), coords[&axis]);
        }
        frame.set_frame_no(index);
        Ok(frame)
    }

    fn source_name(&self) -> String {
        self.source.source_name()
    }

    fn supports_grey(&self) -> bool {
        false
    }

    fn summary_lines(&self) -> Vec<(String, String)> {
        let mut lines = vec![("Dimensions".to_owned(), self.ndim().to_string())];
        for &(axis, size) in &self.sizes {
            lines.push((format!("Dimension '{axis}' size"), size.to_string()));
        }
        let join = |axes: &[char]| axes.iter().collect::<String>();
        lines.push(("Iterating over".to_owned(), join(&self.iter_axes)));
        lines.push(("Bundling".to_owned(), join(&self.bundle_axes)));
        lines
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}
