/// Log Pattern Module
///
/// Fallback decoding from program log lines. Patterns are registered under an id
/// and tried in registration order; the first pattern matching a line wins.
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::Arc;

use crate::models::Payload;

/// Id of the built-in `Program log: Event: <Name> key=value ...` pattern
pub const KEY_VALUE_EVENT_PATTERN: &str = "key-value-event";

const KEY_VALUE_EVENT_REGEX: &str = r"^Program log: Event: (?P<name>[A-Za-z_][A-Za-z0-9_]*)(?P<fields>(?:\s+[A-Za-z_][A-Za-z0-9_]*=\S+)*)\s*$";

/// Turns a matched line into `(event_type, payload)`; `None` rejects the match
pub type LogDecodeFn = Arc<dyn Fn(&Captures<'_>) -> Option<(String, Payload)> + Send + Sync>;

#[derive(Clone)]
pub struct LogPattern {
    pub id: String,
    pub regex: Regex,
    pub decode: LogDecodeFn,
}

impl std::fmt::Debug for LogPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPattern").field("id", &self.id).field("regex", &self.regex.as_str()).finish()
    }
}

impl LogPattern {
    pub fn new(id: impl Into<String>, regex: Regex, decode: LogDecodeFn) -> Self {
        Self { id: id.into(), regex, decode }
    }

    /// The `Program log: Event: Transfer from=A to=B amount=5` convention
    pub fn key_value_events() -> Result<Self, regex::Error> {
        let pairs = Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)=(\S+)")?;
        let regex = Regex::new(KEY_VALUE_EVENT_REGEX)?;

        Ok(Self::new(
            KEY_VALUE_EVENT_PATTERN,
            regex,
            Arc::new(move |caps: &Captures<'_>| {
                let name = caps.name("name")?.as_str().to_string();
                let mut payload = Payload::new();
                if let Some(fields) = caps.name("fields") {
                    for pair in pairs.captures_iter(fields.as_str()) {
                        payload.insert(pair[1].to_string(), parse_log_value(&pair[2]));
                    }
                }
                Some((name, payload))
            }),
        ))
    }

    pub fn apply(&self, line: &str) -> Option<(String, Payload)> {
        self.regex.captures(line).and_then(|caps| (self.decode)(&caps))
    }
}

/// Interpret a logged value as an integer or bool where it cleanly is one
pub fn parse_log_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<u64>() {
        return Value::from(n);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
