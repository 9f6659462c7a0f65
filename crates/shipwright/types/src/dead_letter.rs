//! Dead-letter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message that exhausted its delivery attempts, parked for out-of-band
/// inspection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Stream the message was consumed from
    pub source_stream: String,
    pub group: String,
    /// Entry id on the source stream
    pub entry_id: String,
    pub attempts: u32,
    pub reason: String,
    /// The original envelope, or the raw text when it was not valid JSON
    pub original: serde_json::Value,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        source_stream: impl Into<String>,
        group: impl Into<String>,
        entry_id: impl Into<String>,
        attempts: u32,
        reason: impl Into<String>,
        raw: &str,
    ) -> Self {
        let original = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        Self {
            source_stream: source_stream.into(),
            group: group.into(),
            entry_id: entry_id.into(),
            attempts,
            reason: reason.into(),
            original,
            dead_lettered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_json_original_is_kept_as_string() {
        let record = DeadLetterRecord::new("s", "g", "1-0", 6, "boom", "not json {");
        assert_eq!(record.original, serde_json::Value::String("not json {".into()));
    }

    #[test]
    fn test_json_original_is_structured() {
        let record = DeadLetterRecord::new("s", "g", "1-0", 6, "boom", r#"{"id":"x"}"#);
        assert_eq!(record.original["id"], "x");
    }
}
