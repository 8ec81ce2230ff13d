use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use crate::error::TrailError;
use crate::span::Span;

/// An owned, contiguous chunk of a trail's data.
///
/// Stakes never overlap another stake of the same trail; the trail enforces
/// the partition invariant, the stake only knows its own span.
pub trait Stake: Clone {
    fn span(&self) -> Span;

    /// The same stake moved by `delta` frames.
    fn shifted(&self, delta: i64) -> Self;

    /// Split into two stakes at `pos`, which must lie strictly inside the
    /// span. Splitting must not copy bulk data.
    fn split_at(&self, pos: i64) -> (Self, Self);
}

/// Declared on-disk sample encoding of a file-backed stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
    I24,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
        }
    }
}

/// Random-access read handle into a region of a PCM file.
///
/// The handle is opaque to the trail: it maps frame indices to a byte range
/// starting at `data_offset` and decodes to f32. The file stays open (and the
/// region stays readable) for as long as any stake or in-flight recompute job
/// holds a clone of the source.
#[derive(Clone)]
pub struct FileSource {
    file: Arc<Mutex<File>>,
    data_offset: u64,
    format: SampleFormat,
    channels: usize,
}

impl FileSource {
    pub fn new(file: File, data_offset: u64, format: SampleFormat, channels: usize) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
            data_offset,
            format,
            channels,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Read `frames` interleaved frames starting at `frame_offset` (relative
    /// to the source's frame zero), decoded to f32.
    pub fn read_frames(&self, frame_offset: i64, frames: usize) -> std::io::Result<Vec<f32>> {
        let bytes_per_frame = self.format.bytes_per_sample() * self.channels;
        let mut raw = vec![0u8; frames * bytes_per_frame];
        {
            let mut file = self
                .file
                .lock()
                .map_err(|_| std::io::Error::other("file handle poisoned"))?;
            let pos = self.data_offset + frame_offset as u64 * bytes_per_frame as u64;
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut raw)?;
        }

        let samples = frames * self.channels;
        let mut out = Vec::with_capacity(samples);
        match self.format {
            SampleFormat::F32 => {
                for chunk in raw.chunks_exact(4) {
                    out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            }
            SampleFormat::I16 => {
                for chunk in raw.chunks_exact(2) {
                    let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                    out.push(v as f32 / 32768.0);
                }
            }
            SampleFormat::I24 => {
                for chunk in raw.chunks_exact(3) {
                    // Sign-extend the 24-bit little-endian value.
                    let v = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
                    out.push(v as f32 / 8_388_608.0);
                }
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("data_offset", &self.data_offset)
            .field("format", &self.format)
            .field("channels", &self.channels)
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Backing {
    /// Interleaved samples, shared between stakes that were split from the
    /// same original chunk.
    Memory(Arc<[f32]>),
    File(FileSource),
}

/// A contiguous chunk of multichannel audio covering one sub-span of an
/// [`AudioTrail`](crate::AudioTrail).
///
/// A stake views a frame sub-range of its refcounted backing, so splitting is
/// O(1) and removed stakes keep their storage alive for any background reader
/// still holding a clone.
#[derive(Debug, Clone)]
pub struct AudioStake {
    span: Span,
    backing: Backing,
    /// Frame index into the backing corresponding to `span.start`.
    backing_offset: i64,
    channels: usize,
}

impl AudioStake {
    /// A stake over `[start, start + frames)` owning interleaved sample data.
    pub fn from_samples(
        start: i64,
        interleaved: Vec<f32>,
        channels: usize,
    ) -> Result<Self, TrailError> {
        if channels == 0 {
            return Err(TrailError::InvalidArgument("channel count must be > 0"));
        }
        if interleaved.len() % channels != 0 {
            return Err(TrailError::InvalidArgument(
                "sample count not divisible by channel count",
            ));
        }
        let frames = (interleaved.len() / channels) as i64;
        Ok(Self {
            span: Span::from_start_len(start, frames),
            backing: Backing::Memory(Arc::from(interleaved)),
            backing_offset: 0,
            channels,
        })
    }

    /// An all-zero stake covering `span`.
    pub fn silent(span: Span, channels: usize) -> Self {
        let samples = span.length() as usize * channels;
        Self {
            span,
            backing: Backing::Memory(Arc::from(vec![0.0f32; samples])),
            backing_offset: 0,
            channels,
        }
    }

    /// A stake reading frames `[source_frame_offset, source_frame_offset +
    /// span.length())` from a file region.
    pub fn from_file(span: Span, source: FileSource, source_frame_offset: i64) -> Self {
        let channels = source.channels();
        Self {
            span,
            backing: Backing::File(source),
            backing_offset: source_frame_offset,
            channels,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Interleaved frames for `want`, which must be contained in this
    /// stake's span. Memory-backed stakes return a borrowed slice.
    pub fn interleaved(&self, want: Span) -> Result<Cow<'_, [f32]>, TrailError> {
        debug_assert!(self.span.contains_span(&want));
        let rel = self.backing_offset + (want.start - self.span.start);
        let frames = want.length() as usize;
        match &self.backing {
            Backing::Memory(data) => {
                let from = rel as usize * self.channels;
                let to = from + frames * self.channels;
                Ok(Cow::Borrowed(&data[from..to]))
            }
            Backing::File(source) => Ok(Cow::Owned(source.read_frames(rel, frames)?)),
        }
    }
}

impl Stake for AudioStake {
    fn span(&self) -> Span {
        self.span
    }

    fn shifted(&self, delta: i64) -> Self {
        let mut moved = self.clone();
        moved.span = moved.span.shift(delta);
        moved
    }

    fn split_at(&self, pos: i64) -> (Self, Self) {
        debug_assert!(pos > self.span.start && pos < self.span.stop);
        let left = Self {
            span: Span::new(self.span.start, pos),
            backing: self.backing.clone(),
            backing_offset: self.backing_offset,
            channels: self.channels,
        };
        let right = Self {
            span: Span::new(pos, self.span.stop),
            backing: self.backing.clone(),
            backing_offset: self.backing_offset + (pos - self.span.start),
            channels: self.channels,
        };
        (left, right)
    }
}
