use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RecordError;

/// Kind of knowledge a record carries. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum EntryType {
    Learning,
    Decision,
    Guideline,
    Direction,
    Discovery,
    FileRead,
    FileEdit,
    FileWrite,
    ImplementationPlan,
    Pattern,
    Error,
}

impl EntryType {
    pub const ALL: [EntryType; 11] = [
        Self::Learning,
        Self::Decision,
        Self::Guideline,
        Self::Direction,
        Self::Discovery,
        Self::FileRead,
        Self::FileEdit,
        Self::FileWrite,
        Self::ImplementationPlan,
        Self::Pattern,
        Self::Error,
    ];

    /// Storage and wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learning => "learning",
            Self::Decision => "decision",
            Self::Guideline => "guideline",
            Self::Direction => "direction",
            Self::Discovery => "discovery",
            Self::FileRead => "file_read",
            Self::FileEdit => "file_edit",
            Self::FileWrite => "file_write",
            Self::ImplementationPlan => "implementation_plan",
            Self::Pattern => "pattern",
            Self::Error => "error",
        }
    }

    /// Whether the enhanced fields (category, keywords, ...) are meaningful
    /// for this type.
    pub fn supports_enhanced_fields(&self) -> bool {
        matches!(self, Self::Guideline | Self::ImplementationPlan)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|entry_type| entry_type.as_str() == s)
            .ok_or_else(|| RecordError::UnknownEntryType(s.to_string()))
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    #[default]
    Medium,
    Low,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(RecordError::UnknownImportance(other.to_string())),
        }
    }
}

/// Who originated a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    User,
    Assistant,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(RecordError::UnknownSource(other.to_string())),
        }
    }
}

/// Output format for CLI responses
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_round_trips_through_str() {
        for entry_type in EntryType::ALL {
            assert_eq!(<EntryType as std::str::FromStr>::from_str(entry_type.as_str()), Ok(entry_type));
        }
    }

    #[test]
    fn test_entry_type_serde_matches_as_str() {
        for entry_type in EntryType::ALL {
            let json = serde_json::to_string(&entry_type).unwrap();
            assert_eq!(json, format!("\"{}\"", entry_type.as_str()));
        }
    }

    #[test]
    fn test_entry_type_unknown_rejected() {
        assert_eq!(
            <EntryType as std::str::FromStr>::from_str("opinion"),
            Err(RecordError::UnknownEntryType("opinion".into()))
        );
        assert!(serde_json::from_str::<EntryType>("\"opinion\"").is_err());
    }

    #[test]
    fn test_enhanced_fields_support() {
        assert!(EntryType::Guideline.supports_enhanced_fields());
        assert!(EntryType::ImplementationPlan.supports_enhanced_fields());
        assert!(!EntryType::Decision.supports_enhanced_fields());
    }

    #[test]
    fn test_importance_default_is_medium() {
        assert_eq!(Importance::default(), Importance::Medium);
    }

    #[test]
    fn test_importance_and_source_parse() {
        assert_eq!("high".parse::<Importance>(), Ok(Importance::High));
        assert!("urgent".parse::<Importance>().is_err());
        assert_eq!("assistant".parse::<Source>(), Ok(Source::Assistant));
        assert_eq!(
            "system".parse::<Source>(),
            Err(RecordError::UnknownSource("system".into()))
        );
    }
}
