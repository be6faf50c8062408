use thiserror::Error;

/// Errors surfaced by document loading and rendering.
///
/// The content interpreter swallows per-operator failures (real-world PDFs
/// routinely contain minor violations); only structural problems reach the
/// caller through this type.
#[derive(Debug, Error)]
pub enum PdfError {
    /// Malformed token, missing endobj, invalid xref
    #[error("parse error: {0}")]
    Parse(String),

    /// Dangling or cyclic indirect reference
    #[error("unresolvable reference")]
    Reference,

    /// A filter in a decode chain failed
    #[error("{filter} failed: {reason}")]
    Filter { filter: String, reason: String },

    /// Wrong password or missing certificate seed
    #[error("encryption: {0}")]
    Encryption(String),

    /// Missing font program or glyph
    #[error("font: {0}")]
    Font(String),

    /// Painter surface or render failure
    #[error("render: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, PdfError>;

impl PdfError {
    pub fn filter(name: &str, reason: impl Into<String>) -> Self {
        PdfError::Filter { filter: name.to_string(), reason: reason.into() }
    }
}
