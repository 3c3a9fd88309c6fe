//! Error types for archive generation.
//!
//! Every stage of the pipeline reports failures through [`Error`]. Errors
//! raised by a content source travel down the chain to the
//! [`ArchiveFileWriter`](crate::zip::ArchiveFileWriter), which aborts the
//! whole generation: callers either get a complete archive or an error,
//! never a partial buffer.

use std::io;
use std::sync::Arc;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the archive builder.
///
/// The enum is `Clone` because the writer fans a single error out to every
/// entry chain that is still queued.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An entry's content could not be loaded or encoded.
    #[error("source error: {0}")]
    Source(String),

    /// A locked pipeline was extended. This is a programming error.
    #[error("the stream '{0}' has already been used")]
    Structural(String),

    /// The writer could not assemble the archive.
    #[error("archive generation failed: {0}")]
    Generation(#[source] Box<Error>),

    /// The request needs a feature this builder does not provide.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An entry name that cannot be stored.
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),

    #[error("i/o error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// A remote content loader failed.
    #[error("http error: {0}")]
    Http(String),
}

impl Error {
    /// Wraps `self` as a generation failure unless it already is one.
    pub fn into_generation(self) -> Self {
        match self {
            Error::Generation(_) => self,
            other => Error::Generation(Box::new(other)),
        }
    }

    /// Returns the innermost error, looking through [`Error::Generation`].
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Generation(inner) => inner.root_cause(),
            other => other,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_wrapping_is_not_nested() {
        let err = Error::Source("boom".into()).into_generation();
        let again = err.clone().into_generation();
        assert!(matches!(again, Error::Generation(ref inner) if matches!(**inner, Error::Source(_))));
        assert!(matches!(again.root_cause(), Error::Source(msg) if msg == "boom"));
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(err.to_string().contains("missing"));
    }
}
