use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame source unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("frame read failed: {0}")]
    FrameReadFailure(String),
    #[error("invalid image: {0}")]
    InvalidImage(&'static str),
    #[error("no region found at threshold {threshold}")]
    NoRegionFound { threshold: u8 },
    #[error("no capture in progress")]
    NotPreviewing,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("display error: {0}")]
    Display(String),
}

impl Error {
    /// Everything except a missing device leaves the session usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::DeviceUnavailable(_) | Error::InvalidConfig(_))
    }
}
