//! Users and transcription profiles consulted for auto-transcription.

use serde::{Deserialize, Serialize};

use super::folder::UserId;

/// The user fields the import path needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    pub username: String,

    /// Imported files are queued for transcription right away
    pub auto_transcription_enabled: bool,

    /// Preferred profile for auto-transcription
    pub default_profile_id: Option<String>,
}

/// A named set of transcription parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionProfile {
    pub id: String,

    pub name: String,

    /// System-wide default profile
    pub is_default: bool,

    pub parameters: TranscriptionParameters,
}

/// Parameters handed to the transcription executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionParameters {
    /// Model name (e.g. "base", "large-v3")
    pub model: String,

    /// Spoken language, detected when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Speaker diarization
    #[serde(default)]
    pub diarize: bool,

    /// Executor-specific settings, carried opaquely
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl Default for TranscriptionParameters {
    fn default() -> Self {
        Self {
            model: "base".to_string(),
            language: None,
            diarize: false,
            extra: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_deserialize_with_defaults() {
        let params: TranscriptionParameters = serde_json::from_str(r#"{"model":"small"}"#).unwrap();

        assert_eq!(params.model, "small");
        assert_eq!(params.language, None);
        assert!(!params.diarize);
        assert!(params.extra.is_null());
    }

    #[test]
    fn test_parameters_keep_extra_settings() {
        let json = r#"{"model":"large-v3","language":"de","diarize":true,"extra":{"beam_size":5}}"#;
        let params: TranscriptionParameters = serde_json::from_str(json).unwrap();

        assert!(params.diarize);
        assert_eq!(params.extra["beam_size"], 5);
    }
}
