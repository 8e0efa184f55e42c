use std::path::Path;

use crate::error;
use crate::streams::Stream;

pub(crate) const DEFAULT_SEARCH_PATH: &str = "";

impl crate::sys::PathExt for Path {
    fn executable(&self) -> bool {
        self.is_file()
    }
}

pub(crate) fn exit_status_code(status: std::process::ExitStatus) -> u8 {
    status.code().map_or(1, |code| (code & 0xFF) as u8)
}

pub(crate) fn inject_streams(
    _cmd: &mut std::process::Command,
    streams: impl Iterator<Item = (u32, Stream)>,
) -> Result<(), error::Error> {
    for (channel, _) in streams {
        tracing::debug!(
            target: crate::trace_categories::STREAMS,
            "channel {channel} cannot be passed to child processes on this platform"
        );
    }
    Ok(())
}
