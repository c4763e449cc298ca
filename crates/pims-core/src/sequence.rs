use std::fmt;
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{Frame, PixelType};
use crate::reader::FramesSource;

/// User hook applied to every frame after type and greyscale conversion.
pub type ProcessFn = Box<dyn Fn(Frame) -> Frame + Send>;

/// A slice with Python semantics: optional bounds, negative values count
/// from the end, and the step may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceSpec {
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: isize,
}

impl SliceSpec {
    pub fn new(start: Option<isize>, stop: Option<isize>, step: isize) -> Self {
        Self { start, stop, step }
    }

    /// Every frame in reverse order.
    pub fn reversed() -> Self {
        Self::new(None, None, -1)
    }

    /// Resolve against a sequence length, returning `(start, step, count)`.
    fn indices(&self, len: usize) -> Result<(isize, isize, usize)> {
        if self.step == 0 {
            return Err(Error::InvalidSlice("slice step cannot be zero".into()));
        }
        let len = len as isize;
        let step = self.step;
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };

        let clamp = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(b) if b < 0 => (b + len).max(lower),
            Some(b) => b.min(upper),
        };
        let start = clamp(self.start, if step > 0 { lower } else { upper });
        let stop = clamp(self.stop, if step > 0 { upper } else { lower });

        let count = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && stop < start {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        Ok((start, step, count as usize))
    }
}

impl From<RangeFull> for SliceSpec {
    fn from(_: RangeFull) -> Self {
        Self::new(None, None, 1)
    }
}

impl From<Range<usize>> for SliceSpec {
    fn from(r: Range<usize>) -> Self {
        Self::new(Some(r.start as isize), Some(r.end as isize), 1)
    }
}

impl From<RangeFrom<usize>> for SliceSpec {
    fn from(r: RangeFrom<usize>) -> Self {
        Self::new(Some(r.start as isize), None, 1)
    }
}

impl From<RangeTo<usize>> for SliceSpec {
    fn from(r: RangeTo<usize>) -> Self {
        Self::new(None, Some(r.end as isize), 1)
    }
}

/// Resolve a possibly negative index against `len`.
pub fn resolve_index(index: isize, len: usize) -> Result<usize> {
    let resolved = if index < 0 { index + len as isize } else { index };
    if resolved < 0 || resolved as usize >= len {
        return Err(Error::IndexOutOfRange { index, len });
    }
    Ok(resolved as usize)
}

/// Positions in the underlying source addressed by a view.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Indices {
    Range { start: usize, step: isize, len: usize },
    List(Vec<usize>),
}

impl Indices {
    fn all(len: usize) -> Self {
        Indices::Range {
            start: 0,
            step: 1,
            len,
        }
    }

    fn len(&self) -> usize {
        match self {
            Indices::Range { len, .. } => *len,
            Indices::List(v) => v.len(),
        }
    }

    /// Source position of the `i`-th element; `i` must be `< len()`.
    fn at(&self, i: usize) -> usize {
        match self {
            Indices::Range { start, step, .. } => (*start as isize + step * i as isize) as usize,
            Indices::List(v) => v[i],
        }
    }

    fn slice(&self, spec: SliceSpec) -> Result<Indices> {
        let (start, step, count) = spec.indices(self.len())?;
        if count == 0 {
            return Ok(Indices::List(Vec::new()));
        }
        Ok(match self {
            Indices::Range {
                step: outer_step, ..
            } => Indices::Range {
                start: self.at(start as usize),
                step: outer_step * step,
                len: count,
            },
            Indices::List(_) => Indices::List(
                (0..count)
                    .map(|k| self.at((start + step * k as isize) as usize))
                    .collect(),
            ),
        })
    }

    fn select(&self, picks: &[isize]) -> Result<Indices> {
        let len = self.len();
        let positions = picks
            .iter()
            .map(|&i| resolve_index(i, len).map(|i| self.at(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Indices::List(positions))
    }

    fn mask(&self, mask: &[bool]) -> Result<Indices> {
        if mask.len() != self.len() {
            return Err(Error::MaskLength {
                expected: self.len(),
                got: mask.len(),
            });
        }
        Ok(Indices::List(
            mask.iter()
                .enumerate()
                .filter(|&(_, &keep)| keep)
                .map(|(i, _)| self.at(i))
                .collect(),
        ))
    }
}

/// The user-facing sequence: one reader adapter plus the per-frame
/// conversion pipeline.
pub struct FramesSequence {
    source: Box<dyn FramesSource>,
    dtype: Option<PixelType>,
    as_grey: bool,
    process: Option<ProcessFn>,
    closed: bool,
}

impl FramesSequence {
    pub fn new(source: Box<dyn FramesSource>) -> Self {
        info!(
            source = %source.source_name(),
            len = source.len(),
            frame_shape = ?source.frame_shape(),
            pixel_type = %source.pixel_type(),
            "frame sequence opened"
        );
        Self {
            source,
            dtype: None,
            as_grey: false,
            process: None,
            closed: false,
        }
    }

    /// Convert every frame to `dtype`.
    pub fn with_dtype(mut self, dtype: PixelType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Collapse colour frames to greyscale. Cannot be combined with a
    /// process hook, nor used on multi-axis sources.
    pub fn with_grey(mut self) -> Result<Self> {
        if self.process.is_some() {
            return Err(Error::ConflictingOptions(
                "greyscale conversion cannot be combined with a process function".into(),
            ));
        }
        if !self.source.supports_grey() {
            return Err(Error::ConflictingOptions(format!(
                "greyscale conversion is not supported for {} (frame shape {:?})",
                self.source.source_name(),
                self.source.frame_shape()
            )));
        }
        self.as_grey = true;
        Ok(self)
    }

    /// Apply `f` to every frame. Cannot be combined with greyscale conversion.
    pub fn with_process(mut self, f: impl Fn(Frame) -> Frame + Send + 'static) -> Result<Self> {
        if self.as_grey {
            return Err(Error::ConflictingOptions(
                "a process function cannot be combined with greyscale conversion".into(),
            ));
        }
        self.process = Some(Box::new(f));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame_shape(&self) -> Vec<usize> {
        let mut shape = self.source.frame_shape();
        if self.as_grey && shape.len() == 3 && (2..=4).contains(&shape[2]) {
            shape.truncate(2);
        }
        shape
    }

    pub fn pixel_type(&self) -> PixelType {
        self.dtype.unwrap_or_else(|| self.source.pixel_type())
    }

    pub fn source(&self) -> &dyn FramesSource {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> &mut dyn FramesSource {
        self.source.as_mut()
    }

    /// Fetch one frame; negative indices count from the end.
    pub fn get(&mut self, index: isize) -> Result<Frame> {
        let i = resolve_index(index, self.len())?;
        self.fetch(i)
    }

    pub fn slice(&mut self, spec: impl Into<SliceSpec>) -> Result<FramesView<'_>> {
        let indices = Indices::all(self.len()).slice(spec.into())?;
        Ok(FramesView { seq: self, indices })
    }

    /// Fancy indexing: frames at the given positions, in the given order.
    pub fn select(&mut self, picks: &[isize]) -> Result<FramesView<'_>> {
        let indices = Indices::all(self.len()).select(picks)?;
        Ok(FramesView { seq: self, indices })
    }

    /// Frames whose mask entry is `true`.
    pub fn mask(&mut self, mask: &[bool]) -> Result<FramesView<'_>> {
        let indices = Indices::all(self.len()).mask(mask)?;
        Ok(FramesView { seq: self, indices })
    }

    pub fn iter(&mut self) -> FramesIter<'_> {
        let indices = Indices::all(self.len());
        FramesIter {
            seq: self,
            indices,
            pos: 0,
        }
    }

    /// Release the backend.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        info!(source = %self.source.source_name(), "closing frame sequence");
        self.source.close()
    }

    fn fetch(&mut self, i: usize) -> Result<Frame> {
        let mut frame = self.source.get_frame(i)?;
        if let Some(dtype) = self.dtype {
            frame = frame.astype(dtype);
        }
        if self.as_grey {
            frame = frame.to_grey();
        }
        if let Some(process) = &self.process {
            frame = process(frame);
        }
        frame.set_frame_no(i);
        debug!(frame_no = i, shape = ?frame.shape(), "frame retrieved");
        Ok(frame)
    }
}

impl Drop for FramesSequence {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.source.close() {
            warn!(error = %e, "failed to release frame source");
        }
    }
}

impl fmt::Display for FramesSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<Frames>")?;
        writeln!(f, "Source: {}", self.source.source_name())?;
        writeln!(f, "Length: {} frames", self.len())?;
        writeln!(f, "Frame Shape: {}", format_shape(&self.frame_shape()))?;
        write!(f, "Pixel Datatype: {}", self.pixel_type())?;
        for (label, value) in self.source.summary_lines() {
            write!(f, "\n{label}: {value}")?;
        }
        Ok(())
    }
}

fn format_shape(shape: &[usize]) -> String {
    match *shape {
        [h, w] => format!("{w} x {h}"),
        [h, w, c] if c <= 4 => format!("{w} x {h} x {c}"),
        _ => format!("{shape:?}"),
    }
}

/// A lazy selection of frames from a [`FramesSequence`]. Views compose:
/// slicing a view addresses the underlying sequence directly.
pub struct FramesView<'a> {
    seq: &'a mut FramesSequence,
    indices: Indices,
}

impl<'a> FramesView<'a> {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position in the underlying sequence of this view's `index`-th frame.
    pub fn source_index(&self, index: isize) -> Result<usize> {
        let i = resolve_index(index, self.len())?;
        Ok(self.indices.at(i))
    }

    pub fn get(&mut self, index: isize) -> Result<Frame> {
        let i = self.source_index(index)?;
        self.seq.fetch(i)
    }

    pub fn slice(self, spec: impl Into<SliceSpec>) -> Result<FramesView<'a>> {
        let indices = self.indices.slice(spec.into())?;
        Ok(FramesView {
            seq: self.seq,
            indices,
        })
    }

    pub fn select(self, picks: &[isize]) -> Result<FramesView<'a>> {
        let indices = self.indices.select(picks)?;
        Ok(FramesView {
            seq: self.seq,
            indices,
        })
    }

    pub fn mask(self, mask: &[bool]) -> Result<FramesView<'a>> {
        let indices = self.indices.mask(mask)?;
        Ok(FramesView {
            seq: self.seq,
            indices,
        })
    }

    pub fn iter(&mut self) -> FramesIter<'_> {
        FramesIter {
            seq: &mut *self.seq,
            indices: self.indices.clone(),
            pos: 0,
        }
    }
}

impl<'a> IntoIterator for FramesView<'a> {
    type Item = Result<Frame>;
    type IntoIter = FramesIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        FramesIter {
            seq: self.seq,
            indices: self.indices,
            pos: 0,
        }
    }
}

/// Lazily reads frames in view order.
pub struct FramesIter<'a> {
    seq: &'a mut FramesSequence,
    indices: Indices,
    pos: usize,
}

impl Iterator for FramesIter<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.indices.len() {
            return None;
        }
        let i = self.indices.at(self.pos);
        self.pos += 1;
        Some(self.seq.fetch(i))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.indices.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FramesIter<'_> {}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::*;
    use crate::frame::PixelData;

    /// In-memory source whose frame `i` is a 2x2x3 RGB frame filled with `i`.
    pub(crate) struct RampSource {
        pub len: usize,
        pub closed: Arc<AtomicBool>,
    }

    impl RampSource {
        pub(crate) fn new(len: usize) -> Self {
            Self {
                len,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl FramesSource for RampSource {
        fn len(&self) -> usize {
            self.len
        }

        fn frame_shape(&self) -> Vec<usize> {
            vec![2, 2, 3]
        }

        fn pixel_type(&self) -> PixelType {
            PixelType::U8
        }

        fn get_frame(&mut self, index: usize) -> Result<Frame> {
            if index >= self.len {
                return Err(Error::IndexOutOfRange {
                    index: index as isize,
                    len: self.len,
                });
            }
            Frame::new(PixelData::U8(vec![index as u8; 12]), vec![2, 2, 3])
        }

        fn source_name(&self) -> String {
            "(ramp)".into()
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ramp(len: usize) -> FramesSequence {
        FramesSequence::new(Box::new(RampSource::new(len)))
    }

    fn values(frames: impl IntoIterator<Item = Result<Frame>>) -> Vec<u8> {
        frames
            .into_iter()
            .map(|f| f.unwrap().value_at(&[0, 0, 0]).unwrap() as u8)
            .collect()
    }

    fn python_slice(len: usize, start: Option<isize>, stop: Option<isize>, step: isize) -> Vec<usize> {
        let (s, st, n) = SliceSpec::new(start, stop, step).indices(len).unwrap();
        (0..n).map(|k| (s + st * k as isize) as usize).collect()
    }

    #[test]
    fn slice_indices_follow_python() {
        assert_eq!(python_slice(10, None, None, 1), (0..10).collect::<Vec<_>>());
        assert_eq!(python_slice(10, Some(2), Some(8), 3), vec![2, 5]);
        assert_eq!(python_slice(10, Some(-3), None, 1), vec![7, 8, 9]);
        assert_eq!(python_slice(10, None, None, -1), (0..10).rev().collect::<Vec<_>>());
        assert_eq!(python_slice(10, Some(8), Some(2), -2), vec![8, 6, 4]);
        assert_eq!(python_slice(10, Some(20), Some(30), 1), Vec::<usize>::new());
        assert_eq!(python_slice(10, Some(-20), Some(2), 1), vec![0, 1]);
        assert_eq!(python_slice(0, None, None, -1), Vec::<usize>::new());
    }

    #[test]
    fn zero_step_is_rejected() {
        let mut seq = ramp(5);
        assert!(matches!(
            seq.slice(SliceSpec::new(None, None, 0)),
            Err(Error::InvalidSlice(_))
        ));
    }

    #[test]
    fn negative_index_counts_from_end() {
        let mut seq = ramp(5);
        let last = seq.get(-1).unwrap();
        assert_eq!(last.value_at(&[0, 0, 0]), Some(4.0));
        assert_eq!(last.frame_no(), Some(4));
        assert_eq!(seq.get(-1).unwrap(), seq.get(4).unwrap());
    }

    #[test]
    fn out_of_range_index_fails() {
        let mut seq = ramp(5);
        assert!(matches!(
            seq.get(5),
            Err(Error::IndexOutOfRange { index: 5, len: 5 })
        ));
        assert!(seq.get(-6).is_err());
    }

    #[test]
    fn iteration_yields_every_frame_in_order() {
        let mut seq = ramp(4);
        assert_eq!(seq.iter().len(), 4);
        assert_eq!(values(seq.iter()), vec![0, 1, 2, 3]);
    }

    #[test]
    fn nested_slices_compose() {
        let mut seq = ramp(20);
        let view = seq.slice(2..18).unwrap().slice(SliceSpec::new(None, None, 3)).unwrap();
        assert_eq!(view.len(), 6);
        let view = view.slice(SliceSpec::reversed()).unwrap();
        assert_eq!(view.source_index(0).unwrap(), 17);
        assert_eq!(values(view), vec![17, 14, 11, 8, 5, 2]);
    }

    #[test]
    fn select_and_mask() {
        let mut seq = ramp(6);
        assert_eq!(values(seq.select(&[5, 0, -2]).unwrap()), vec![5, 0, 4]);
        assert!(seq.select(&[6]).is_err());

        let mask = [true, false, true, false, false, true];
        assert_eq!(values(seq.mask(&mask).unwrap()), vec![0, 2, 5]);
        assert!(matches!(
            seq.mask(&[true]),
            Err(Error::MaskLength { expected: 6, got: 1 })
        ));
    }

    #[test]
    fn views_of_lists_compose() {
        let mut seq = ramp(10);
        let view = seq
            .select(&[9, 7, 5, 3, 1])
            .unwrap()
            .slice(1..4)
            .unwrap()
            .mask(&[true, false, true])
            .unwrap();
        assert_eq!(values(view), vec![7, 3]);
    }

    #[test]
    fn view_get_supports_negative_indices() {
        let mut seq = ramp(10);
        let mut view = seq.slice(3..6).unwrap();
        assert_eq!(view.get(-1).unwrap().frame_no(), Some(5));
        assert!(view.get(3).is_err());
    }

    #[test]
    fn empty_slice_yields_nothing() {
        let mut seq = ramp(3);
        let view = seq.slice(5..9).unwrap();
        assert!(view.is_empty());
        assert_eq!(view.into_iter().count(), 0);
    }

    #[test]
    fn grey_conversion_drops_channel_axis() {
        let mut seq = ramp(2).with_grey().unwrap();
        assert_eq!(seq.frame_shape(), vec![2, 2]);
        let frame = seq.get(1).unwrap();
        assert_eq!(frame.shape(), &[2, 2]);
        assert_eq!(frame.value_at(&[1, 1]), Some(1.0));
    }

    #[test]
    fn dtype_override_converts_frames() {
        let mut seq = ramp(3).with_dtype(PixelType::F32);
        assert_eq!(seq.pixel_type(), PixelType::F32);
        assert_eq!(seq.get(2).unwrap().pixel_type(), PixelType::F32);
    }

    #[test]
    fn process_hook_runs_after_conversion() {
        let mut seq = ramp(3)
            .with_dtype(PixelType::U16)
            .with_process(|f| f.astype(PixelType::U8).roll(1))
            .unwrap();
        let frame = seq.get(2).unwrap();
        assert_eq!(frame.pixel_type(), PixelType::U8);
        assert_eq!(frame.frame_no(), Some(2));
    }

    #[test]
    fn grey_and_process_conflict() {
        assert!(matches!(
            ramp(1).with_grey().unwrap().with_process(|f| f),
            Err(Error::ConflictingOptions(_))
        ));
        assert!(matches!(
            ramp(1).with_process(|f| f).unwrap().with_grey(),
            Err(Error::ConflictingOptions(_))
        ));
    }

    #[test]
    fn summary_lists_source_and_shape() {
        let seq = ramp(7);
        let text = seq.to_string();
        assert_eq!(
            text,
            "<Frames>\nSource: (ramp)\nLength: 7 frames\nFrame Shape: 2 x 2 x 3\nPixel Datatype: uint8"
        );
    }

    #[test]
    #[traced_test]
    fn close_releases_source_once() {
        let source = RampSource::new(2);
        let closed = Arc::clone(&source.closed);
        let seq = FramesSequence::new(Box::new(source));
        seq.close().unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert!(logs_contain("closing frame sequence"));
    }

    #[test]
    fn drop_releases_source() {
        let source = RampSource::new(2);
        let closed = Arc::clone(&source.closed);
        drop(FramesSequence::new(Box::new(source)));
        assert!(closed.load(Ordering::SeqCst));
    }
}
