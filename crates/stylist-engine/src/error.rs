use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub const GENERIC_FAILURE_MESSAGE: &str = "An unknown error occurred.";

/// Everything a studio operation can surface to the user. The `Display` text
/// is exactly what the error modal shows.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Remote(#[from] RemoteCallError),
}

impl StudioError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transcode(_) => "transcode",
            Self::Remote(_) => "remote",
        }
    }

    pub fn user_message(&self) -> String {
        let text = self.to_string();
        if text.trim().is_empty() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please upload your photo.")]
    MissingSubjectPhoto,
    #[error("Please upload a photo first.")]
    MissingPhoto,
    #[error("You have used all free generations ({cap}). Enter a promo code to continue.")]
    QuotaExhausted { cap: u64 },
    #[error("Another request is already in progress ({label}).")]
    Busy { label: String },
    #[error("There is nothing to show yet.")]
    NothingToShow,
}

#[derive(Debug, Error)]
#[error("Could not process the file {}.", .path.display())]
pub struct TranscodeError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteCallError {
    /// Non-2xx from the proxy; `message` is the upstream text when one was
    /// present, otherwise derived from the status code.
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("The proxy returned an unreadable response: {0}")]
    InvalidJson(String),
    #[error("no image returned: the AI did not send back an image, try another request or photo.")]
    NoImageReturned,
    #[error("no analysis returned: the AI could not analyze the image.")]
    NoAnalysisReturned,
}
