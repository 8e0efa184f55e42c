use std::collections::HashSet;

use tracing_subscriber::{Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

/// Type of event to trace.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, clap::ValueEnum, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TraceEvent {
    /// Traces command launching and diagnostics.
    #[clap(name = "commands")]
    Commands,
    /// Traces function worker threads.
    #[clap(name = "functions")]
    Functions,
    /// Traces parsing of command text.
    #[clap(name = "parse")]
    Parse,
    /// Traces pipeline construction and teardown.
    #[clap(name = "pipeline")]
    Pipeline,
    /// Traces stream pumps and redirections.
    #[clap(name = "streams")]
    Streams,
}

impl TraceEvent {
    const fn target(self) -> &'static str {
        match self {
            Self::Commands => "commands",
            Self::Functions => "functions",
            Self::Parse => "parse",
            Self::Pipeline => "pipeline",
            Self::Streams => "streams",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TraceEventConfig {
    enabled_trace_events: HashSet<TraceEvent>,
}

impl TraceEventConfig {
    pub fn new(enabled_log_events: &[TraceEvent]) -> Self {
        Self {
            enabled_trace_events: enabled_log_events.iter().copied().collect(),
        }
    }

    /// Installs a stderr subscriber for this configuration. Returns false if a
    /// subscriber was already installed.
    pub fn init(&self) -> bool {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .with_filter(self.compose_filter());

        if tracing_subscriber::registry().with(layer).try_init().is_ok() {
            true
        } else {
            eprintln!("warning: failed to initialize tracing.");
            false
        }
    }

    fn compose_filter(&self) -> Targets {
        Targets::new()
            .with_default(tracing_subscriber::filter::LevelFilter::INFO)
            .with_targets(
                self.enabled_trace_events
                    .iter()
                    .map(|event| (event.target(), tracing::Level::DEBUG)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn event_names_match_targets() {
        for event in [
            TraceEvent::Commands,
            TraceEvent::Functions,
            TraceEvent::Parse,
            TraceEvent::Pipeline,
            TraceEvent::Streams,
        ] {
            assert_eq!(event.to_string(), event.target());
        }
    }

    #[test]
    fn enabled_events_raise_their_targets() {
        let config = TraceEventConfig::new(&[TraceEvent::Pipeline]);
        let filter = config.compose_filter();

        assert!(filter.would_enable("pipeline", &tracing::Level::DEBUG));
        assert!(!filter.would_enable("streams", &tracing::Level::DEBUG));
        assert!(filter.would_enable("streams", &tracing::Level::INFO));
        assert_eq!(filter.default_level(), Some(LevelFilter::INFO));
    }
}
