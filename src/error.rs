use thiserror::Error;

use crate::net::frame::FrameError;
use crate::net::proto::ProtoError;

/// Crate-level convenience error.
///
/// Subsystem errors stay contained at the boundary where they occur; this
/// wrapper exists for the startup/shutdown paths that cross subsystems.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("config error: {0}")]
    Config(String),

    #[error("no free tcp port in {start}..={end}")]
    NoFreePort { start: u16, end: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;
