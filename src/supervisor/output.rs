//! Best-effort decoding of supervised process output.
//!
//! Tool servers usually log one JSON object per line. Each line is tried as
//! a structured record and re-emitted through `tracing` at the record's own
//! severity; anything else is passed through as plain text. Unstructured
//! output is the common case, not an error.

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Stream {
    /// Short label used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Level a line is re-emitted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// `error!`
    Error,
    /// `warn!`
    Warn,
    /// `info!`
    Info,
    /// `debug!`
    Debug,
}

/// A structured log line emitted by a child process.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Raw severity, lowercased (`"info"`, `"50"`, ...), if present.
    pub level: Option<String>,
    /// Message text from `msg` or `message`, if present.
    pub message: Option<String>,
    /// Remaining fields, excluding level, message and timestamp keys.
    pub fields: Map<String, Value>,
}

const LEVEL_KEYS: &[&str] = &["level", "severity", "lvl"];
const MESSAGE_KEYS: &[&str] = &["msg", "message"];
const DROPPED_KEYS: &[&str] = &["time", "ts", "timestamp"];

/// Try to decode one output line as a JSON object.
pub fn parse_record(line: &str) -> Option<LogRecord> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(trimmed) else {
        return None;
    };

    let level = take_first(&mut object, LEVEL_KEYS).map(|value| match value {
        Value::String(s) => s.to_ascii_lowercase(),
        other => other.to_string(),
    });
    let message = take_first(&mut object, MESSAGE_KEYS).map(|value| match value {
        Value::String(s) => s,
        other => other.to_string(),
    });
    for key in DROPPED_KEYS {
        object.remove(*key);
    }

    Some(LogRecord {
        level,
        message,
        fields: object,
    })
}

fn take_first(object: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| object.remove(*key))
}

/// Map a record's level to the severity it is re-emitted at.
///
/// Accepts names (`fatal`, `error`, `warn`, `info`, ...) and numeric
/// pino-style levels (60 fatal, 50 error, 40 warn, 30 info). Unknown or
/// missing levels map to debug.
pub fn severity_of(level: Option<&str>) -> Severity {
    match level {
        Some("fatal" | "panic" | "critical" | "error" | "err" | "60" | "50") => Severity::Error,
        Some("warn" | "warning" | "40") => Severity::Warn,
        Some("info" | "notice" | "30") => Severity::Info,
        _ => Severity::Debug,
    }
}

/// Render the extra fields of a record as `key=value` pairs.
pub fn render_fields(fields: &Map<String, Value>) -> String {
    fields
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}={s}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Re-emit one output line of process `name`.
pub fn emit_line(name: &str, stream: Stream, line: &str) {
    if line.trim().is_empty() {
        return;
    }

    let Some(record) = parse_record(line) else {
        match stream {
            Stream::Stdout => debug!(target: "switchboard::child", process = %name, stream = stream.as_str(), "{line}"),
            Stream::Stderr => warn!(target: "switchboard::child", process = %name, stream = stream.as_str(), "{line}"),
        }
        return;
    };

    let message = record.message.as_deref().unwrap_or("");
    let fields = render_fields(&record.fields);
    match severity_of(record.level.as_deref()) {
        Severity::Error => error!(target: "switchboard::child", process = %name, fields = %fields, "{message}"),
        Severity::Warn => warn!(target: "switchboard::child", process = %name, fields = %fields, "{message}"),
        Severity::Info => info!(target: "switchboard::child", process = %name, fields = %fields, "{message}"),
        Severity::Debug => debug!(target: "switchboard::child", process = %name, fields = %fields, "{message}"),
    }
}

/// Read `pipe` line by line until EOF, re-emitting every line.
///
/// Lines are decoded lossily, so invalid UTF-8 never ends the read loop;
/// the pipe must stay drained for the child's lifetime or its next write
/// fails with SIGPIPE.
pub async fn forward_lines<R>(name: String, stream: Stream, pipe: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => emit_line(&name, stream, &decode_line(&buf)),
            Err(e) => {
                debug!(process = %name, stream = stream.as_str(), error = %e, "output pipe closed with error");
                break;
            }
        }
    }
}

/// Decode one raw line, replacing invalid UTF-8 and trimming the line ending.
pub fn decode_line(raw: &[u8]) -> String {
    let line = String::from_utf8_lossy(raw);
    line.trim_end_matches(['\n', '\r']).to_owned()
}
