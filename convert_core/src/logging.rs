//! Console and persistent log output.
//!
//! Every event goes to stderr through the usual `fmt` layer and, as one JSON
//! line, to the converter's log file so a failed conversion can be inspected
//! afterwards.

use std::{
    collections::BTreeMap,
    fmt::Debug,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use serde_json::Value;
use tracing::{field::Field, Event, Subscriber};
use tracing_subscriber::{fmt, layer::Context, prelude::*, EnvFilter, Layer};

/// One log line. Converter messages read `area.event` or
/// `area.event=reason`; the reason is split out so failures can be grouped.
#[derive(Debug, Clone, Serialize)]
pub struct LogEnvelope {
    pub timestamp_ms: u64,
    pub level: String,
    pub target: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<&'static str, Value>,
}

impl LogEnvelope {
    fn from_event(event: &Event<'_>) -> Self {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);
        let message = fields
            .message
            .unwrap_or_else(|| metadata.target().to_string());
        let (event, reason) = match message.split_once('=') {
            Some((event, reason)) => (event.to_string(), Some(reason.to_string())),
            None => (message, None),
        };
        Self {
            timestamp_ms: now_ms(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            event,
            reason,
            fields: fields.values,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// Layer appending each event as a JSON line to any writer.
pub struct LogFileLayer<W: Write + Send + 'static> {
    writer: Mutex<W>,
}

impl LogFileLayer<BufWriter<File>> {
    /// Truncate `path` and log into it.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send + 'static> LogFileLayer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn append(&self, envelope: &LogEnvelope) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer poisoned"))?;
        serde_json::to_writer(&mut *writer, envelope)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl<S, W> Layer<S> for LogFileLayer<W>
where
    S: Subscriber,
    W: Write + Send + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Losing a log line never fails the conversion.
        let _ = self.append(&LogEnvelope::from_event(event));
    }
}

/// Collects event fields; `message` is kept apart from the rest.
#[derive(Default)]
struct EventFields {
    message: Option<String>,
    values: BTreeMap<&'static str, Value>,
}

impl EventFields {
    fn insert(&mut self, field: &Field, value: Value) {
        self.values.insert(field.name(), value);
    }
}

impl tracing::field::Visit for EventFields {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::from(value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        let text = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.insert(field, Value::String(text));
        }
    }
}

/// Install the global subscriber: `RUST_LOG` filtering (default `info`), a
/// console layer and the JSON log file. A subscriber installed earlier wins.
pub fn init_logging(log_file: &Path) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = LogFileLayer::create(log_file)?;
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(file_layer)
        .try_init();
    Ok(())
}
