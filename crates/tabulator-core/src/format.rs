//! Document formats for model and query files.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// A serde document format, chosen by file extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    #[default]
    Yaml,
    Toml,
}

/// Errors reading or writing a document.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("failed to parse {format} document: {message}")]
    Parse {
        format: DocumentFormat,
        message: String,
    },

    #[error("failed to write {format} document: {message}")]
    Write {
        format: DocumentFormat,
        message: String,
    },

    #[error("unsupported document format: {0}")]
    Unsupported(String),
}

impl DocumentFormat {
    /// Format named by a file path's extension.
    pub fn detect(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        Self::from_name(ext)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    pub fn parse<T: DeserializeOwned>(self, data: &[u8]) -> Result<T, FormatError> {
        let parse_error = |message: String| FormatError::Parse {
            format: self,
            message,
        };
        match self {
            Self::Json => serde_json::from_slice(data).map_err(|e| parse_error(e.to_string())),
            Self::Yaml => serde_yaml::from_slice(data).map_err(|e| parse_error(e.to_string())),
            Self::Toml => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| parse_error(format!("invalid UTF-8: {e}")))?;
                toml::from_str(s).map_err(|e| parse_error(e.to_string()))
            }
        }
    }

    pub fn render<T: Serialize>(self, value: &T) -> Result<Vec<u8>, FormatError> {
        let write_error = |message: String| FormatError::Write {
            format: self,
            message,
        };
        match self {
            Self::Json => serde_json::to_vec_pretty(value).map_err(|e| write_error(e.to_string())),
            Self::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| write_error(e.to_string())),
            Self::Toml => toml::to_string_pretty(value)
                .map(String::into_bytes)
                .map_err(|e| write_error(e.to_string())),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        })
    }
}

/// Parse a document, detecting the format from `path` (YAML when unknown).
pub fn from_bytes<T: DeserializeOwned>(data: &[u8], path: Option<&str>) -> Result<T, FormatError> {
    let format = path.and_then(DocumentFormat::detect).unwrap_or_default();
    format.parse(data)
}

/// Parse a document in an explicitly named format.
pub fn from_bytes_format<T: DeserializeOwned>(data: &[u8], format: &str) -> Result<T, FormatError> {
    DocumentFormat::from_name(format)
        .ok_or_else(|| FormatError::Unsupported(format.to_string()))?
        .parse(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_detect() {
        assert_eq!(DocumentFormat::detect("q.json"), Some(DocumentFormat::Json));
        assert_eq!(DocumentFormat::detect("dir.d/q.YML"), Some(DocumentFormat::Yaml));
        assert_eq!(DocumentFormat::detect("model.toml"), Some(DocumentFormat::Toml));
        assert_eq!(DocumentFormat::detect("model"), None);
        assert_eq!(DocumentFormat::detect("model.csv"), None);
    }

    #[test]
    fn test_parse_each_format() {
        let json: IndexMap<String, i64> = from_bytes(br#"{"a": 1}"#, Some("x.json")).unwrap();
        let yaml: IndexMap<String, i64> = from_bytes(b"a: 1\n", None).unwrap();
        let toml: IndexMap<String, i64> = from_bytes_format(b"a = 1\n", "toml").unwrap();
        assert_eq!(json, yaml);
        assert_eq!(yaml, toml);
    }

    #[test]
    fn test_errors() {
        let err = from_bytes::<IndexMap<String, i64>>(b"{", Some("x.json")).unwrap_err();
        assert!(matches!(err, FormatError::Parse { format: DocumentFormat::Json, .. }));

        let err = from_bytes_format::<IndexMap<String, i64>>(b"", "ron").unwrap_err();
        assert!(matches!(err, FormatError::Unsupported(_)));
    }
}
