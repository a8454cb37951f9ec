use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

pub const FALLBACK_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoSlot {
    Subject,
    Style,
}

impl PhotoSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Style => "style",
        }
    }
}

impl fmt::Display for PhotoSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded photo. `preview` is set as soon as a file is picked; `encoded`
/// only once the file has been read and transcoded, so readers must accept a
/// preview without payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoInput {
    pub source: Option<PathBuf>,
    pub preview: Option<String>,
    pub encoded: Option<String>,
    pub mime_type: Option<String>,
}

impl PhotoInput {
    pub fn pending(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        Self {
            preview: Some(source.to_string_lossy().to_string()),
            source: Some(source),
            encoded: None,
            mime_type: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.encoded.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.preview.is_none() && self.encoded.is_none()
    }

    pub fn mime_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(FALLBACK_MIME_TYPE)
    }

    /// Inline data URL of the encoded payload, if any.
    pub fn display_source(&self) -> Option<String> {
        self.encoded
            .as_ref()
            .map(|data| format!("data:{};base64,{data}", self.mime_type()))
    }
}
