use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The device opened but does not advertise UMP capability.
    #[error("{0} is not a UMP device")]
    NotUmp(String),

    #[error("{op} is not permitted on an {stream} handle")]
    WrongDirection { op: &'static str, stream: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation would block")]
    WouldBlock,

    #[error("{op} is not allowed in state {state}")]
    BadState { op: &'static str, state: &'static str },

    #[error("{0} is not supported by this device")]
    Unsupported(&'static str),

    /// The slave transferred `frames` frames but mirroring them failed.
    #[error("mirror write failed after {frames} frames: {source}")]
    Mirror {
        frames: usize,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Negative errno equivalent of this error, for callers that report a signed status.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Error::InvalidArgument(_)
            | Error::NotUmp(_)
            | Error::WrongDirection { .. }
            | Error::Config(_)
            | Error::Toml(_) => libc::EINVAL,
            Error::WouldBlock => libc::EAGAIN,
            Error::BadState { .. } => libc::EBADFD,
            Error::Unsupported(_) => libc::ENXIO,
            Error::Mirror { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Error::Io(e) => match e.kind() {
                io::ErrorKind::WouldBlock => libc::EAGAIN,
                _ => e.raw_os_error().unwrap_or(libc::EIO),
            },
            Error::Wav(_) => libc::EIO,
        };
        -code
    }

    pub(crate) fn from_io(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::WouldBlock {
            Error::WouldBlock
        } else {
            Error::Io(e)
        }
    }
}
