use crate::correction::CorrectionError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not access camera file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("camera data stream failed: {0}")]
    Stream(#[from] std::io::Error),

    #[error("unexpected end of camera file on line {line}, expected {expected}")]
    UnexpectedEof { line: usize, expected: &'static str },

    #[error("malformed camera file on line {line}: {source}")]
    Format {
        line: usize,
        #[source]
        source: FormatError,
    },

    #[error("invalid camera parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("failed to cast a ray from pixel ({}, {}): {source}", pixel[0], pixel[1])]
    PixelToRay {
        pixel: [f64; 2],
        #[source]
        source: CorrectionError,
    },

    #[error("unable to project point ({}, {}, {}) into the optical bar model: {reason}", point[0], point[1], point[2])]
    PointToPixel { point: [f64; 3], reason: String },
}

impl Error {
    /// Returns `true` for failures to read or write the underlying file.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Stream(_) | Error::UnexpectedEof { .. }
        )
    }

    /// Returns `true` for files that were readable but did not match the
    /// camera file grammar.
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format { .. } | Error::InvalidParameter { .. })
    }
}

/// Describes why a single line of a camera file was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("expected a VERSION_<n> header but got `{found}`")]
    MissingVersion { found: String },

    #[error("versions prior to {minimum} are not supported, got {found}")]
    UnsupportedVersion { found: u32, minimum: u32 },

    #[error("expected camera type {expected} but got `{found}`")]
    WrongCameraType {
        expected: &'static str,
        found: String,
    },

    #[error("expected field `{expected}` but got `{found}`")]
    UnexpectedLabel {
        expected: &'static str,
        found: String,
    },

    #[error("field `{label}` expects {expected} values but got {found}")]
    WrongArity {
        label: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("field `{label}` has an invalid value `{value}`")]
    InvalidValue { label: &'static str, value: String },

    #[error("field `iR` is not a proper rotation matrix")]
    InvalidRotation,
}
