use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

use crate::initialization::RandErr;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidConfig(String),
    InvalidStructure(String),
    CacheExhausted {
        requested: usize,
        capacity: usize,
        in_use: usize,
    },
    Dataset {
        line: usize,
        msg: String,
    },
    Init(RandErr),
    Shape(ShapeError),
    Serialization(String),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => format!("There's a size mismatch in {what}, got {got} and expected {expected}"),
            MlErr::InvalidConfig(msg) => format!("Invalid configuration: {msg}"),
            MlErr::InvalidStructure(msg) => format!("Invalid network structure: {msg}"),
            MlErr::CacheExhausted {
                requested,
                capacity,
                in_use,
            } => format!(
                "The memory cache can't serve {requested} bytes, {in_use} of {capacity} bytes are in use"
            ),
            MlErr::Dataset { line, msg } => format!("Malformed dataset at line {line}: {msg}"),
            MlErr::Init(e) => format!("Failed to initialize parameters: {e}"),
            MlErr::Shape(e) => format!("Shape error: {e}"),
            MlErr::Serialization(msg) => format!("Model file error: {msg}"),
            MlErr::Io(e) => format!("I/O error: {e}"),
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Init(e) => Some(e),
            MlErr::Shape(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::Init(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Serialization(value.to_string())
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
