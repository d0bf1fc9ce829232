//! Log output for applications built on the session layer
// (c) 2025 Ross Younger

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{
        format::FmtSpan,
        time::{ChronoLocal, ChronoUtc},
    },
    prelude::*,
};

/// Overrides [`LogOptions::level`] when set
const FILTER_ENV_VAR: &str = "RUST_LOG";

/// Crate whose events are shown when the environment does not say otherwise
const OWN_TARGET: &str = "quic_client_session";

static INSTALLED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How event timestamps are printed
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    /// Local wall-clock time, to the second
    #[default]
    Local,
    /// UTC, to the second
    Utc,
    /// RFC 3339, with subsecond precision
    Rfc3339,
}

/// Log output settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// Level for this crate's events, unless `RUST_LOG` is set
    pub level: String,
    /// Timestamp style
    pub time_format: TimeFormat,
    /// Emit an event when each session span opens and closes
    pub session_lifetimes: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".into(),
            time_format: TimeFormat::default(),
            session_lifetimes: false,
        }
    }
}

impl LogOptions {
    /// Options logging this crate at `level`
    #[must_use]
    pub fn with_level(level: &str) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Chooses the filter.
    ///
    /// Returns whether it came from the environment, in which case events from
    /// other crates may get through and their targets are worth showing.
    fn filter(&self) -> anyhow::Result<(EnvFilter, bool)> {
        match std::env::var(FILTER_ENV_VAR) {
            Ok(directives) => {
                let filter = EnvFilter::try_new(&directives).map_err(|e| {
                    anyhow::anyhow!("{FILTER_ENV_VAR}={directives:?} was not understood: {e}")
                })?;
                Ok((filter, true))
            }
            Err(_) => Ok((
                EnvFilter::try_new(format!("{OWN_TARGET}={}", self.level))?,
                false,
            )),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.session_lifetimes {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// Builds the stderr layer without installing it
    pub(crate) fn layer(&self) -> anyhow::Result<BoxedLayer> {
        let (filter, from_env) = self.filter()?;
        let fmt = tracing_subscriber::fmt::layer::<Registry>()
            .compact()
            .with_target(from_env)
            .with_span_events(self.span_events())
            .with_writer(std::io::stderr);
        let layer = match self.time_format {
            TimeFormat::Local => fmt
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%SL".into()))
                .with_filter(filter)
                .boxed(),
            TimeFormat::Utc => fmt
                .with_timer(ChronoUtc::new("%Y-%m-%d %H:%M:%SZ".into()))
                .with_filter(filter)
                .boxed(),
            TimeFormat::Rfc3339 => fmt
                .with_timer(ChronoUtc::rfc_3339())
                .with_filter(filter)
                .boxed(),
        };
        Ok(layer)
    }
}

/// Installs a global subscriber that logs to stderr.
///
/// Only the first successful call per process has any effect; later calls log a
/// warning and return `Ok`.
pub fn setup(options: &LogOptions) -> anyhow::Result<()> {
    if is_initialized() {
        tracing::warn!("log output already set up; ignoring {options:?}");
        return Ok(());
    }
    let layer = options.layer()?;
    tracing_subscriber::registry().with(layer).try_init()?;
    let _ = INSTALLED.set(());
    Ok(())
}

/// Whether [`setup`] has installed a subscriber
#[must_use]
pub fn is_initialized() -> bool {
    INSTALLED.get().is_some()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use pretty_assertions::assert_eq;
    use rusty_fork::rusty_fork_test;

    use super::{LogOptions, TimeFormat, setup};

    #[test]
    fn builds_each_time_format() {
        for time_format in [TimeFormat::Local, TimeFormat::Utc, TimeFormat::Rfc3339] {
            let options = LogOptions {
                time_format,
                session_lifetimes: true,
                ..LogOptions::with_level("debug")
            };
            let _layer = options.layer().unwrap();
        }
    }

    #[test]
    fn options_from_json() {
        let options: LogOptions =
            serde_json::from_str(r#"{"level":"trace","time_format":"utc"}"#).unwrap();
        assert_eq!(options.time_format, TimeFormat::Utc);
        assert_eq!(options.level, "trace");
        assert!(!options.session_lifetimes);
        assert_eq!("RFC3339".parse::<TimeFormat>().unwrap(), TimeFormat::Rfc3339);
    }

    #[test]
    fn bad_level_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(LogOptions::with_level("chatty!").layer().is_err());
    }

    // global state, so this runs in a fork
    rusty_fork_test! {
        #[test]
        fn second_setup_is_ignored() {
            setup(&LogOptions::with_level("debug")).unwrap();
            assert!(super::is_initialized());
            setup(&LogOptions::default()).unwrap();
        }
    }
}
