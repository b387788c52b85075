use std::io;

use thiserror::Error;

use crate::camera::State;
use crate::FourCC;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot {op} while the camera is {state}")]
    InvalidState { op: &'static str, state: State },

    #[error("camera `{0}` not found")]
    NoCamera(String),

    #[error("camera manager is already running")]
    ManagerRunning,

    #[error("camera `{0}` is already acquired")]
    Busy(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("buffer error: {0}")]
    Buffer(String),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(FourCC),

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("display error: {0}")]
    Display(String),
}

pub type Result<T> = std::result::Result<T, Error>;
