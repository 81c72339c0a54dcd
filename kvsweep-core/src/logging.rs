//! Log output setup.
//!
//! Components only emit `tracing` events.  The binary calls [`init`] once at
//! start-up; tests build their own dispatcher with [`subscriber`] and install
//! it with `tracing::subscriber::with_default`.
//!
//! The default `key-value` format writes one line per event that log
//! shippers can split without a parser:
//!
//! ```text
//! Time="2024-05-10T12:00:00+0000", Module="kvsweep_core::retire", Level="INFO", Message="deleted path host1/db at mount kv", mount="kv", path="host1/db"
//! ```

use std::fmt;
use std::io;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

use crate::{Result, SweepError};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    KeyValue,
    Compact,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Stderr,
    Stdout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `kvsweep_core=debug,warn`.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub target: LogTarget,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Build a subscriber for `config` that writes through `make_writer`.
pub fn subscriber<W>(config: &LogConfig, make_writer: W) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| SweepError::Config(format!("invalid log level {:?}: {e}", config.level)))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer);

    Ok(match config.format {
        LogFormat::KeyValue => Box::new(builder.event_format(KeyValueFormat).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    })
}

/// Install the process-wide subscriber.  Call once, before any work starts.
pub fn init(config: &LogConfig) -> Result<()> {
    let subscriber = match config.target {
        LogTarget::Stderr => subscriber(config, io::stderr)?,
        LogTarget::Stdout => subscriber(config, io::stdout)?,
    };
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| SweepError::Config(format!("logging already initialised: {e}")))
}

/// `Key="value"` line format.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueFormat;

impl<S, N> FormatEvent<S, N> for KeyValueFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut fields = KeyValueFields::default();
        event.record(&mut fields);

        write!(
            writer,
            "Time=\"{}\", Module=\"{}\", Level=\"{}\", Message=\"{}\"",
            Utc::now().format(TIME_FORMAT),
            meta.target(),
            meta.level(),
            escape(&fields.message)
        )?;
        for (name, value) in &fields.extra {
            write!(writer, ", {name}=\"{}\"", escape(value))?;
        }
        writeln!(writer)
    }
}

#[derive(Default)]
struct KeyValueFields {
    message: String,
    extra: Vec<(&'static str, String)>,
}

impl KeyValueFields {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.extra.push((field.name(), value));
        }
    }
}

impl Visit for KeyValueFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Log capture for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) mod capture {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::subscriber::DefaultGuard;

    use super::{LogConfig, subscriber};

    /// In-memory writer; clones share one buffer.
    #[derive(Clone, Default)]
    pub(crate) struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        /// Route this thread's events here with `config` until the guard drops.
        pub(crate) fn install(&self, config: &LogConfig) -> DefaultGuard {
            let writer = self.clone();
            tracing::subscriber::set_default(subscriber(config, move || writer.clone()).unwrap())
        }

        pub(crate) fn output(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        /// Lines logged at `level`, e.g. `"ERROR"`.
        pub(crate) fn lines_at(&self, level: &str) -> Vec<String> {
            let tag = format!("Level=\"{level}\"");
            self.output()
                .lines()
                .filter(|l| l.contains(&tag))
                .map(str::to_string)
                .collect()
        }
    }
}
