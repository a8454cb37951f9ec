use std::fmt;

use serde::Serialize;

/// Remote-calling operations that share the single in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Generate,
    Suggest,
    Describe,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Suggest => "suggest",
            Self::Describe => "describe",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationPhase {
    Idle,
    Validating,
    Calling,
    Watermarking,
    Committing,
}

impl GenerationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Calling => "calling",
            Self::Watermarking => "watermarking",
            Self::Committing => "committing",
        }
    }
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
