//! Threads copying bytes from one stream endpoint to another.

use std::io::{self, Read, Write};
use std::thread::JoinHandle;

use crate::error;
use crate::trace_categories;

/// A running copy from a source to a destination. The destination is flushed and
/// closed when the source reaches end-of-stream.
#[derive(Debug)]
pub struct Pump {
    name: String,
    channel: u32,
    handle: JoinHandle<Result<u64, error::Error>>,
}

impl Pump {
    /// Returns the pump's descriptive name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the copy has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the copy to finish and returns the number of bytes copied.
    pub fn join(self) -> Result<u64, error::Error> {
        self.handle.join().unwrap_or_else(|_| {
            Err(error::Error::StreamFailure {
                channel: self.channel,
                source: io::Error::other(format!("pump {} panicked", self.name)),
            })
        })
    }
}

/// Starts a thread copying `from` into `to` until end-of-stream.
///
/// A closed destination (broken pipe) ends the copy normally. Other I/O errors end
/// it with a [`error::Error::StreamFailure`], logged rather than propagated to
/// sibling pumps.
///
/// # Arguments
///
/// * `name` - Name used for the thread and in log events.
/// * `channel` - The channel being carried, for diagnostics.
/// * `from` - The source.
/// * `to` - The destination.
pub fn spawn_pump<R, W>(
    name: impl Into<String>,
    channel: u32,
    mut from: R,
    mut to: W,
) -> Result<Pump, error::Error>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let name = name.into();
    let thread_name = name.clone();

    let handle = std::thread::Builder::new()
        .name(format!("pump:{thread_name}"))
        .spawn(move || {
            let result = io::copy(&mut from, &mut to).and_then(|count| {
                to.flush()?;
                Ok(count)
            });
            drop(to);

            match result {
                Ok(count) => {
                    tracing::debug!(
                        target: trace_categories::STREAMS,
                        "{thread_name}: copied {count} bytes"
                    );
                    Ok(count)
                }
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!(
                        target: trace_categories::STREAMS,
                        "{thread_name}: destination closed"
                    );
                    Ok(0)
                }
                Err(err) => {
                    tracing::warn!(target: trace_categories::STREAMS, "{thread_name}: {err}");
                    Err(error::Error::StreamFailure {
                        channel,
                        source: err,
                    })
                }
            }
        })?;

    Ok(Pump {
        name,
        channel,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{pipe, OutputBuffer, Stream};
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn copies_until_end_of_stream() -> Result<()> {
        let buffer = OutputBuffer::new();
        let pump = spawn_pump(
            "doc",
            0,
            Stream::document("abc\ndef\n"),
            Stream::from(buffer.clone()),
        )?;
        assert_eq!(pump.name(), "doc");
        assert_eq!(pump.join()?, 8);
        assert_eq!(buffer.to_string_lossy(), "abc\ndef\n");
        Ok(())
    }

    #[test]
    fn closed_destination_is_not_an_error() -> Result<()> {
        let (reader, writer) = pipe()?;
        drop(reader);

        let pump = spawn_pump("closed", 1, Stream::document(vec![b'x'; 1 << 20]), writer)?;
        assert!(pump.join().is_ok());
        Ok(())
    }

    #[test]
    fn destination_sees_eof() -> Result<()> {
        let (mut reader, writer) = pipe()?;
        let pump = spawn_pump("eof", 1, Stream::document("payload"), writer)?;

        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        assert_eq!(text, "payload");
        pump.join()?;
        Ok(())
    }

    #[test]
    fn source_errors_are_stream_failures() -> Result<()> {
        let pump = spawn_pump("wrong", 3, Stream::from(OutputBuffer::new()), io::sink())?;
        assert!(matches!(
            pump.join(),
            Err(error::Error::StreamFailure { channel: 3, .. })
        ));
        Ok(())
    }
}
