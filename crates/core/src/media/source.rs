//! Frame suppliers bound to a clip at SETUP time.
//!
//! The pacer never looks inside a frame beyond its length, so a source
//! only has to hand out self-contained payload units in order.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Width of the ASCII length prefix in [`LengthPrefixedSource`] files.
pub const LENGTH_PREFIX_DIGITS: usize = 5;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Sequential supplier of frame payloads.
///
/// `next_frame` returns `Ok(None)` at end-of-stream; the caller decides
/// whether to [`reset`](Self::reset) and loop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Rewind to the first frame.
    fn reset(&mut self) -> io::Result<()>;

    /// Release the underlying handle. Later reads report end-of-stream.
    fn close(&mut self);
}

/// Which [`FrameSource`] implementation SETUP binds to a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Records of `<5 ASCII digits length><payload>`.
    #[default]
    LengthPrefixed,
    /// Concatenated JPEG images split on SOI/EOI markers.
    JpegMarkers,
}

impl SourceKind {
    /// Open `path` with this source implementation.
    pub fn open(self, path: &Path) -> io::Result<Box<dyn FrameSource>> {
        Ok(match self {
            SourceKind::LengthPrefixed => Box::new(LengthPrefixedSource::open(path)?),
            SourceKind::JpegMarkers => Box::new(JpegMarkerSource::open(path)?),
        })
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::LengthPrefixed => f.write_str("length-prefixed"),
            SourceKind::JpegMarkers => f.write_str("jpeg-markers"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "length-prefixed" => Ok(SourceKind::LengthPrefixed),
            "jpeg-markers" => Ok(SourceKind::JpegMarkers),
            other => Err(format!(
                "unknown source kind '{other}', expected length-prefixed or jpeg-markers"
            )),
        }
    }
}

/// Reads the classic MJPEG clip format: each frame is preceded by its
/// length as five ASCII decimal digits.
///
/// A truncated final record or a non-numeric prefix ends the stream.
pub struct LengthPrefixedSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
}

impl LengthPrefixedSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(BufReader::new(file)),
        })
    }
}

impl FrameSource for LengthPrefixedSource {
    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut prefix = [0u8; LENGTH_PREFIX_DIGITS];
        if !read_full(reader, &mut prefix)? {
            return Ok(None);
        }

        let Some(len) = std::str::from_utf8(&prefix)
            .ok()
            .and_then(|digits| digits.trim().parse::<usize>().ok())
        else {
            tracing::warn!(
                path = %self.path.display(),
                "invalid frame length prefix, treating as end of stream"
            );
            return Ok(None);
        };

        let mut frame = vec![0u8; len];
        if !read_full(reader, &mut frame)? {
            return Ok(None);
        }

        Ok(Some(frame))
    }

    fn reset(&mut self) -> io::Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Splits a file of concatenated JPEG images into frames.
///
/// Each frame runs from an SOI marker (`FF D8`) up to and including the
/// next EOI marker (`FF D9`). Bytes before an SOI are skipped; an SOI
/// without a matching EOI ends the stream.
pub struct JpegMarkerSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
}

impl JpegMarkerSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(BufReader::new(file)),
        })
    }
}

impl FrameSource for JpegMarkerSource {
    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        if !skip_to_marker(reader, JPEG_SOI)? {
            return Ok(None);
        }

        let mut frame = JPEG_SOI.to_vec();
        let mut prev = 0u8;
        let mut byte = [0u8; 1];
        loop {
            if reader.read(&mut byte)? == 0 {
                tracing::debug!(
                    path = %self.path.display(),
                    "JPEG frame without EOI marker"
                );
                return Ok(None);
            }
            frame.push(byte[0]);
            if [prev, byte[0]] == JPEG_EOI {
                break;
            }
            prev = byte[0];
        }

        Ok(Some(frame))
    }

    fn reset(&mut self) -> io::Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Fill `buf` completely. Returns `false` on a clean or truncated EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Consume bytes up to and including `marker`. Returns `false` at EOF.
fn skip_to_marker(reader: &mut impl Read, marker: [u8; 2]) -> io::Result<bool> {
    let mut prev = 0u8;
    let mut byte = [0u8; 1];
    let mut first = true;
    loop {
        if reader.read(&mut byte)? == 0 {
            return Ok(false);
        }
        if !first && [prev, byte[0]] == marker {
            return Ok(true);
        }
        prev = byte[0];
        first = false;
    }
}
