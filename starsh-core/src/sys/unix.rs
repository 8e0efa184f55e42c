use std::os::unix::process::ExitStatusExt;
use std::path::Path;

use command_fds::{CommandFdExt, FdMapping};

use crate::error;
use crate::streams::Stream;

pub(crate) const DEFAULT_SEARCH_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

impl crate::sys::PathExt for Path {
    fn executable(&self) -> bool {
        nix::unistd::access(self, nix::unistd::AccessFlags::X_OK).is_ok()
    }
}

/// Maps a child's exit status to a shell status: the low byte of the exit code,
/// or 128 plus the terminating signal.
pub(crate) fn exit_status_code(status: std::process::ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        #[expect(clippy::cast_sign_loss)]
        return (code & 0xFF) as u8;
    }

    status
        .signal()
        .and_then(|signal| u8::try_from(128 + signal).ok())
        .unwrap_or(u8::MAX)
}

/// Passes channels above 2 to the child under the same numbers.
pub(crate) fn inject_streams(
    cmd: &mut std::process::Command,
    streams: impl Iterator<Item = (u32, Stream)>,
) -> Result<(), error::Error> {
    let mut fd_mappings = vec![];
    for (channel, stream) in streams {
        let Ok(child_fd) = i32::try_from(channel) else {
            return Err(error::Error::BadChannel(channel));
        };
        match stream.into_owned_fd()? {
            Some(parent_fd) => fd_mappings.push(FdMapping {
                parent_fd,
                child_fd,
            }),
            None => tracing::debug!(
                target: crate::trace_categories::STREAMS,
                "channel {channel} is in memory; not passed to child process"
            ),
        }
    }

    cmd.fd_mappings(fd_mappings)
        .map_err(|err| error::Error::Io(std::io::Error::other(err)))?;
    Ok(())
}
