//! Process-wide tracing setup: formatted logs on stderr plus an optional SQLite copy of
//! every warning and error.

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives such as `info,juggernaut_engine=debug`. `RUST_LOG` wins when set.
    pub filter: String,
    /// JSON lines instead of the human-readable format.
    pub json: bool,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: true,
            log_to_sqlite: false,
            log_db_path: PathBuf::from("logs.db"),
        }
    }
}

/// Returned by [`init_telemetry`]. Hold it for the life of the process.
pub struct TelemetryGuard {
    sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// The persisted-log store, when SQLite logging is on and the database opened.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.sink.as_deref()
    }
}

fn stderr_layer<S>(config: &TelemetryConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    // stdout belongs to `run`, which streams events there.
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    if config.json {
        base.json().with_span_list(true).with_filter(filter).boxed()
    } else {
        base.with_filter(filter).boxed()
    }
}

fn open_sink(config: &TelemetryConfig) -> Option<Arc<SqliteLogSink>> {
    if !config.log_to_sqlite {
        return None;
    }
    match SqliteLogSink::new(&config.log_db_path) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            // No subscriber exists yet, so this cannot go through tracing.
            eprintln!(
                "juggernaut-telemetry: log database {} unavailable: {e}",
                config.log_db_path.display()
            );
            None
        }
    }
}

/// Install the global subscriber. Later calls leave the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let sink = open_sink(&config);
    let _ = tracing_subscriber::registry()
        .with(stderr_layer(&config))
        .with(sink.clone().map(SqliteLogLayer::new))
        .try_init();
    TelemetryGuard { sink }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig {
            log_to_sqlite: false,
            log_db_path: dir.path().join("logs.db"),
            ..Default::default()
        };
        assert!(open_sink(&config).is_none());
        assert!(!config.log_db_path.exists());

        let config = TelemetryConfig { log_to_sqlite: true, ..config };
        let sink = open_sink(&config).unwrap();
        assert_eq!(sink.count().unwrap(), 0);
    }
}
