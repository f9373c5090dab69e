//! The record: the validated unit of knowledge moved from buffer to store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::RecordError;
use crate::types::{EntryType, Importance, Source};

/// A single structured fact awaiting (or after) durable storage.
///
/// Records are immutable once created: the buffer and the store copy them,
/// never edit them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entry_type: EntryType,
    pub content: String,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Opaque producer payload, passed through unparsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(flatten)]
    pub enhanced: EnhancedFields,
}

/// Optional enrichment used by guideline and implementation-plan records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl EnhancedFields {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.keywords.is_empty()
            && self.applies_when.is_none()
            && self.source_file.is_none()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Record {
    /// Medium-importance record stamped with the current time.
    pub fn new(entry_type: EntryType, content: impl Into<String>) -> Self {
        Self {
            entry_type,
            content: content.into(),
            importance: Importance::default(),
            source: None,
            created_at: Utc::now(),
            metadata: None,
            enhanced: EnhancedFields::default(),
        }
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_enhanced(mut self, enhanced: EnhancedFields) -> Self {
        self.enhanced = enhanced;
        self
    }

    /// Check the field invariants a record must satisfy before it may be
    /// buffered or stored.
    ///
    /// Type, importance and source are closed enums, so an out-of-set value
    /// can only come from deserialization and is reported by
    /// [`Record::from_json_line`]. What remains to check here is content.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.content.trim().is_empty() {
            return Err(RecordError::EmptyContent);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Parse and validate one buffer line.
    pub fn from_json_line(line: &str) -> Result<Self, RecordError> {
        let record: Record =
            serde_json::from_str(line).map_err(|e| classify_parse_error(line, e))?;
        record.validate()?;
        Ok(record)
    }

    /// Serialize as a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Turn a serde failure into the most specific [`RecordError`] we can name,
/// so callers logging skipped lines see "unknown entry type 'x'" rather than
/// a raw serde message.
fn classify_parse_error(line: &str, error: serde_json::Error) -> RecordError {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(line) else {
        return RecordError::Malformed(error.to_string());
    };

    if let Some(raw) = map.get("entry_type").and_then(|v| v.as_str()) {
        if let Err(err) = raw.parse::<EntryType>() {
            return err;
        }
    }
    if let Some(raw) = map.get("importance").and_then(|v| v.as_str()) {
        if let Err(err) = raw.parse::<Importance>() {
            return err;
        }
    }
    if let Some(raw) = map.get("source").and_then(|v| v.as_str()) {
        if let Err(err) = raw.parse::<Source>() {
            return err;
        }
    }
    RecordError::Malformed(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_defaults() {
        let record = Record::new(EntryType::Learning, "cargo caches registry index");
        assert_eq!(record.importance, Importance::Medium);
        assert!(record.source.is_none());
        assert!(record.metadata.is_none());
        assert!(record.enhanced.is_empty());
        assert!(record.is_valid());
    }

    #[test]
    fn test_empty_and_blank_content_invalid() {
        assert_eq!(
            Record::new(EntryType::Decision, "").validate(),
            Err(RecordError::EmptyContent)
        );
        assert_eq!(
            Record::new(EntryType::Decision, "  \n\t").validate(),
            Err(RecordError::EmptyContent)
        );
    }

    #[test]
    fn test_json_line_round_trip_preserves_fields() {
        let record = Record::new(EntryType::Guideline, "prefer anyhow in binaries")
            .with_importance(Importance::High)
            .with_source(Source::User)
            .with_metadata(json!({"turn": 7, "tags": ["errors"]}))
            .with_enhanced(EnhancedFields {
                category: Some("style".into()),
                keywords: vec!["anyhow".into(), "errors".into()],
                applies_when: Some("writing a CLI".into()),
                source_file: Some("src/main.rs".into()),
            });

        let line = record.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        let parsed = Record::from_json_line(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_enhanced_fields_flattened_on_the_wire() {
        let record = Record::new(EntryType::ImplementationPlan, "split the store crate")
            .with_enhanced(EnhancedFields {
                category: Some("architecture".into()),
                ..EnhancedFields::default()
            });
        let value: serde_json::Value = serde_json::from_str(&record.to_json_line().unwrap()).unwrap();
        assert_eq!(value["category"], "architecture");
        assert!(value.get("enhanced").is_none());
        assert!(value.get("keywords").is_none());
    }

    #[test]
    fn test_minimal_line_gets_defaults() {
        let parsed =
            Record::from_json_line(r#"{"entry_type":"discovery","content":"tests use tempdirs"}"#)
                .unwrap();
        assert_eq!(parsed.entry_type, EntryType::Discovery);
        assert_eq!(parsed.importance, Importance::Medium);
        assert!(parsed.enhanced.keywords.is_empty());
    }

    #[test]
    fn test_null_keywords_treated_as_empty() {
        let parsed = Record::from_json_line(
            r#"{"entry_type":"guideline","content":"x","keywords":null,"source":null}"#,
        )
        .unwrap();
        assert!(parsed.enhanced.keywords.is_empty());
        assert!(parsed.source.is_none());
    }

    #[test]
    fn test_unknown_enum_values_reported_specifically() {
        assert_eq!(
            Record::from_json_line(r#"{"entry_type":"rumor","content":"x"}"#),
            Err(RecordError::UnknownEntryType("rumor".into()))
        );
        assert_eq!(
            Record::from_json_line(r#"{"entry_type":"learning","content":"x","importance":"critical"}"#),
            Err(RecordError::UnknownImportance("critical".into()))
        );
        assert_eq!(
            Record::from_json_line(r#"{"entry_type":"learning","content":"x","source":"system"}"#),
            Err(RecordError::UnknownSource("system".into()))
        );
    }

    #[test]
    fn test_garbage_and_empty_content_lines_rejected() {
        assert!(matches!(
            Record::from_json_line("{ not json"),
            Err(RecordError::Malformed(_))
        ));
        assert!(matches!(
            Record::from_json_line(r#"{"entry_type":"learning"}"#),
            Err(RecordError::Malformed(_))
        ));
        assert_eq!(
            Record::from_json_line(r#"{"entry_type":"learning","content":""}"#),
            Err(RecordError::EmptyContent)
        );
    }
}
