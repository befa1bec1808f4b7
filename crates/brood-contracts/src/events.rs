use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only session event log.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - file sinks write one compact JSON object per line to `events.jsonl`
/// - memory sinks keep every emitted event for later inspection
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    sink: Mutex<EventSink>,
    session_id: String,
}

#[derive(Debug)]
enum EventSink {
    File(PathBuf),
    Memory(Vec<Value>),
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::File(path.into()), session_id.into())
    }

    pub fn in_memory(session_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::Memory(Vec::new()), session_id.into())
    }

    fn with_sink(sink: EventSink, session_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                sink: Mutex::new(sink),
                session_id,
            }),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        let sink = self.inner.sink.lock().ok()?;
        match &*sink {
            EventSink::File(path) => Some(path.clone()),
            EventSink::Memory(_) => None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Events kept by a memory sink. File sinks return nothing.
    pub fn recorded(&self) -> Vec<Value> {
        match self.inner.sink.lock() {
            Ok(sink) => match &*sink {
                EventSink::Memory(rows) => rows.clone(),
                EventSink::File(_) => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }

    pub fn recorded_types(&self) -> Vec<String> {
        self.recorded()
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        let mut sink = self
            .inner
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        match &mut *sink {
            EventSink::File(path) => append_line(path, &event)?,
            EventSink::Memory(rows) => rows.push(event.clone()),
        }
        Ok(event)
    }

    /// Convenience over [`EventWriter::emit`] for call sites that build payloads inline.
    pub fn emit_fields<'a, I>(&self, event_type: &str, fields: I) -> anyhow::Result<Value>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let payload = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect::<EventPayload>();
        self.emit(event_type, payload)
    }
}

fn append_line(path: &Path, event: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(event)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
