//! Stream endpoints and the channel tables that bind them.

use std::collections::BTreeMap;
use std::io::{Cursor, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error;

/// Broad classification of a stream endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamKind {
    /// An interactive terminal.
    Terminal,
    /// An OS pipe, or an inherited handle that is not a terminal.
    Pipe,
    /// A file on disk.
    File,
    /// An in-memory buffer.
    Buffered,
}

/// A shared in-memory sink collecting everything written to it.
#[derive(Clone, Debug, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    /// Returns a new, empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Removes and returns the bytes written so far.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    /// Returns the bytes written so far, decoded lossily as UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }
}

/// Shared in-memory bytes read from the front. Clones share the read position.
#[derive(Clone, Debug)]
pub struct InputDocument(Arc<Mutex<Cursor<Vec<u8>>>>);

impl InputDocument {
    /// Returns a document that yields the given bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(Mutex::new(Cursor::new(data.into()))))
    }
}

/// A stream endpoint bound to a channel.
#[derive(Debug)]
pub enum Stream {
    /// The host process's standard input.
    Stdin(std::io::Stdin),
    /// The host process's standard output.
    Stdout(std::io::Stdout),
    /// The host process's standard error.
    Stderr(std::io::Stderr),
    /// A file opened by a redirection.
    File {
        /// The open file.
        file: std::fs::File,
        /// The path the file was opened with.
        path: PathBuf,
        /// Whether the file was opened for reading.
        readable: bool,
        /// Whether the file was opened for writing.
        writable: bool,
    },
    /// The read end of an OS pipe.
    PipeReader(os_pipe::PipeReader),
    /// The write end of an OS pipe.
    PipeWriter(os_pipe::PipeWriter),
    /// An in-memory capture sink.
    Buffer(OutputBuffer),
    /// In-memory bytes, such as a here-document body.
    Document(InputDocument),
}

impl Stream {
    /// Returns a stream reading the given bytes.
    pub fn document(data: impl Into<Vec<u8>>) -> Self {
        Self::Document(InputDocument::new(data))
    }

    /// Classifies the endpoint.
    pub fn kind(&self) -> StreamKind {
        let terminal = match self {
            Self::Stdin(f) => f.is_terminal(),
            Self::Stdout(f) => f.is_terminal(),
            Self::Stderr(f) => f.is_terminal(),
            Self::File { file, .. } => file.is_terminal(),
            _ => false,
        };

        if terminal {
            return StreamKind::Terminal;
        }

        match self {
            Self::Stdin(_) | Self::Stdout(_) | Self::Stderr(_) => StreamKind::Pipe,
            Self::PipeReader(_) | Self::PipeWriter(_) => StreamKind::Pipe,
            Self::File { .. } => StreamKind::File,
            Self::Buffer(_) | Self::Document(_) => StreamKind::Buffered,
        }
    }

    /// Returns whether bytes can be read from the endpoint.
    pub const fn is_readable(&self) -> bool {
        match self {
            Self::Stdin(_) | Self::PipeReader(_) | Self::Document(_) => true,
            Self::File { readable, .. } => *readable,
            Self::Stdout(_) | Self::Stderr(_) | Self::PipeWriter(_) | Self::Buffer(_) => false,
        }
    }

    /// Returns whether bytes can be written to the endpoint.
    pub const fn is_writable(&self) -> bool {
        match self {
            Self::Stdout(_) | Self::Stderr(_) | Self::PipeWriter(_) | Self::Buffer(_) => true,
            Self::File { writable, .. } => *writable,
            Self::Stdin(_) | Self::PipeReader(_) | Self::Document(_) => false,
        }
    }

    /// Returns the path of a file endpoint.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Returns whether the endpoint lives in memory rather than behind an OS handle.
    pub const fn is_in_memory(&self) -> bool {
        matches!(self, Self::Buffer(_) | Self::Document(_))
    }

    /// Tries to duplicate the endpoint. Duplicates of in-memory endpoints share
    /// their storage.
    pub fn try_clone(&self) -> Result<Self, error::Error> {
        let result = match self {
            Self::Stdin(_) => Self::Stdin(std::io::stdin()),
            Self::Stdout(_) => Self::Stdout(std::io::stdout()),
            Self::Stderr(_) => Self::Stderr(std::io::stderr()),
            Self::File {
                file,
                path,
                readable,
                writable,
            } => Self::File {
                file: file.try_clone()?,
                path: path.clone(),
                readable: *readable,
                writable: *writable,
            },
            Self::PipeReader(r) => Self::PipeReader(r.try_clone()?),
            Self::PipeWriter(w) => Self::PipeWriter(w.try_clone()?),
            Self::Buffer(b) => Self::Buffer(b.clone()),
            Self::Document(d) => Self::Document(d.clone()),
        };

        Ok(result)
    }

    /// Converts an OS-backed endpoint into a handle for a child process. In-memory
    /// endpoints are handed back unchanged.
    pub(crate) fn into_stdio(self) -> Result<Stdio, Self> {
        match self {
            Self::Stdin(_) => Ok(Stdio::inherit()),
            Self::Stdout(f) => Ok(f.into()),
            Self::Stderr(f) => Ok(f.into()),
            Self::File { file, .. } => Ok(file.into()),
            Self::PipeReader(r) => Ok(r.into()),
            Self::PipeWriter(w) => Ok(w.into()),
            other @ (Self::Buffer(_) | Self::Document(_)) => Err(other),
        }
    }

    /// Converts an OS-backed endpoint into an owned descriptor. In-memory endpoints
    /// yield `None`.
    #[cfg(unix)]
    pub(crate) fn into_owned_fd(self) -> Result<Option<std::os::fd::OwnedFd>, error::Error> {
        use std::os::fd::{AsFd, OwnedFd};

        let fd = match self {
            Self::Stdin(f) => f.as_fd().try_clone_to_owned()?,
            Self::Stdout(f) => f.as_fd().try_clone_to_owned()?,
            Self::Stderr(f) => f.as_fd().try_clone_to_owned()?,
            Self::File { file, .. } => OwnedFd::from(file),
            Self::PipeReader(r) => OwnedFd::from(r),
            Self::PipeWriter(w) => OwnedFd::from(w),
            Self::Buffer(_) | Self::Document(_) => return Ok(None),
        };

        Ok(Some(fd))
    }
}

impl From<OutputBuffer> for Stream {
    fn from(buffer: OutputBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<os_pipe::PipeReader> for Stream {
    fn from(reader: os_pipe::PipeReader) -> Self {
        Self::PipeReader(reader)
    }
}

impl From<os_pipe::PipeWriter> for Stream {
    fn from(writer: os_pipe::PipeWriter) -> Self {
        Self::PipeWriter(writer)
    }
}

fn not_readable(what: &'static str) -> std::io::Error {
    std::io::Error::other(error::Error::WrongDirection(what, "readable"))
}

fn not_writable(what: &'static str) -> std::io::Error {
    std::io::Error::other(error::Error::WrongDirection(what, "writable"))
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Stdin(f) => f.read(buf),
            Self::File { file, readable, .. } => {
                if *readable {
                    file.read(buf)
                } else {
                    Err(not_readable("file"))
                }
            }
            Self::PipeReader(r) => r.read(buf),
            Self::Document(d) => d.0.lock().unwrap_or_else(PoisonError::into_inner).read(buf),
            Self::Stdout(_) => Err(not_readable("stdout")),
            Self::Stderr(_) => Err(not_readable("stderr")),
            Self::PipeWriter(_) => Err(not_readable("pipe writer")),
            Self::Buffer(_) => Err(not_readable("output buffer")),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            // Written through: child processes share the descriptor.
            Self::Stdout(f) => {
                let mut out = f.lock();
                let written = out.write(buf)?;
                out.flush()?;
                Ok(written)
            }
            Self::Stderr(f) => f.write(buf),
            Self::File { file, writable, .. } => {
                if *writable {
                    file.write(buf)
                } else {
                    Err(not_writable("file"))
                }
            }
            Self::PipeWriter(w) => w.write(buf),
            Self::Buffer(b) => {
                b.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            Self::Stdin(_) => Err(not_writable("stdin")),
            Self::PipeReader(_) => Err(not_writable("pipe reader")),
            Self::Document(_) => Err(not_writable("document")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(f) => f.flush(),
            Self::Stderr(f) => f.flush(),
            Self::File { file, .. } => file.flush(),
            Self::PipeWriter(w) => w.flush(),
            _ => Ok(()),
        }
    }
}

/// Creates a new OS pipe, returning its reader and writer ends.
pub fn pipe() -> Result<(Stream, Stream), error::Error> {
    let (reader, writer) = os_pipe::pipe()?;
    Ok((reader.into(), writer.into()))
}

/// Maps channel numbers to the stream endpoints bound to them.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: BTreeMap<u32, Stream>,
}

impl StreamTable {
    /// Channel used for standard input.
    pub const STDIN: u32 = 0;
    /// Channel used for standard output.
    pub const STDOUT: u32 = 1;
    /// Channel used for standard error.
    pub const STDERR: u32 = 2;

    /// Returns a table bound to the host's standard streams.
    ///
    /// # Arguments
    ///
    /// * `error_follows_output` - Bind channel 2 to standard output instead of
    ///   standard error.
    pub fn with_defaults(error_follows_output: bool) -> Self {
        let mut table = Self::default();
        table.load_defaults(error_follows_output);
        table
    }

    /// Binds channels 0, 1 and 2 to the host's standard streams.
    ///
    /// # Arguments
    ///
    /// * `error_follows_output` - Bind channel 2 to standard output instead of
    ///   standard error.
    pub fn load_defaults(&mut self, error_follows_output: bool) {
        self.set(Self::STDIN, Stream::Stdin(std::io::stdin()));
        self.set(Self::STDOUT, Stream::Stdout(std::io::stdout()));
        if error_follows_output {
            self.set(Self::STDERR, Stream::Stdout(std::io::stdout()));
        } else {
            self.set(Self::STDERR, Stream::Stderr(std::io::stderr()));
        }
    }

    /// Tries to duplicate every binding in the table.
    pub fn try_clone(&self) -> Result<Self, error::Error> {
        let mut streams = BTreeMap::new();
        for (channel, stream) in &self.streams {
            streams.insert(*channel, stream.try_clone()?);
        }

        Ok(Self { streams })
    }

    /// Returns a new table holding this table's bindings with `overlay`'s bindings
    /// on top.
    ///
    /// # Arguments
    ///
    /// * `overlay` - Bindings that take precedence.
    pub fn layer(&self, overlay: Self) -> Result<Self, error::Error> {
        let mut layered = self.try_clone()?;
        layered.streams.extend(overlay.streams);
        Ok(layered)
    }

    /// Looks up the stream bound to a channel.
    pub fn get(&self, channel: u32) -> Option<&Stream> {
        self.streams.get(&channel)
    }

    /// Looks up the stream bound to a channel for mutation.
    pub fn get_mut(&mut self, channel: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&channel)
    }

    /// Duplicates the stream bound to a channel.
    ///
    /// # Arguments
    ///
    /// * `channel` - The channel to duplicate.
    pub fn duplicate(&self, channel: u32) -> Result<Stream, error::Error> {
        self.get(channel)
            .ok_or(error::Error::BadChannel(channel))?
            .try_clone()
    }

    /// Binds a stream to a channel, returning the stream previously bound there.
    pub fn set(&mut self, channel: u32, stream: Stream) -> Option<Stream> {
        self.streams.insert(channel, stream)
    }

    /// Unbinds a channel, returning the stream bound there.
    pub fn remove(&mut self, channel: u32) -> Option<Stream> {
        self.streams.remove(&channel)
    }

    /// Checks whether a channel is bound.
    pub fn contains(&self, channel: u32) -> bool {
        self.streams.contains_key(&channel)
    }

    /// Returns the bound channels in ascending order.
    pub fn channels(&self) -> impl Iterator<Item = u32> + '_ {
        self.streams.keys().copied()
    }
}

impl IntoIterator for StreamTable {
    type Item = (u32, Stream);
    type IntoIter = std::collections::btree_map::IntoIter<u32, Stream>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.into_iter()
    }
}
