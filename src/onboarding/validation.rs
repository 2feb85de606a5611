//! File validation for KYC document uploads.

use std::fmt;

use serde::Serialize;

use crate::error::OnboardingError;

/// Accepted document media types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Jpeg,
    Png,
}

impl MediaType {
    /// Parse a declared MIME type. Parameters such as `; charset=` are ignored.
    pub fn from_mime(mime: &str) -> Option<MediaType> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(Self::Pdf),
            // Some browsers still report the non-standard `image/jpg`.
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// A file selected by the seller, as declared by the client.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Check size and declared type. Runs before any network activity.
pub fn validate_file(file: &FileUpload, max_size: usize) -> Result<MediaType, OnboardingError> {
    if file.bytes.is_empty() {
        return Err(OnboardingError::Validation {
            reason: "file is empty".to_string(),
        });
    }
    if file.size() > max_size {
        return Err(OnboardingError::Validation {
            reason: format!(
                "file is {} bytes, the limit is {} bytes",
                file.size(),
                max_size
            ),
        });
    }
    MediaType::from_mime(&file.media_type).ok_or_else(|| OnboardingError::Validation {
        reason: format!(
            "unsupported file type '{}', upload a PDF, JPG, or PNG",
            file.media_type
        ),
    })
}

/// Reduce a client-supplied file name to a single safe path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}
