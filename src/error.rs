use thiserror::Error;

/// Errors surfaced by the waveform core.
///
/// Out-of-window reads are never errors: they are clamped to the zero
/// sentinel by the storage. Everything here is either a configuration
/// mistake or a backend failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("scale must be a positive finite number, got {0}")]
    InvalidScale(f64),

    #[error("column count must be greater than zero, got {0}")]
    InvalidCount(usize),

    #[error("invalid palette: {0}")]
    InvalidPalette(String),

    #[error("invalid decibel range: min_db ({min}) must be below max_db ({max})")]
    InvalidDecibelRange { min: f64, max: f64 },

    #[error("viewport {width}x{height} is empty or extends past the pixel coordinate range")]
    InvalidViewport { width: u32, height: u32 },

    #[error("texture dimension {size} exceeds the device limit of {limit}")]
    TextureTooLarge { size: u64, limit: u32 },

    #[error("palette levels must be greater than zero, got {0}")]
    InvalidLevels(usize),

    #[error("buffer size must be greater than zero")]
    InvalidCapacity,

    #[error("rendering backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("waveform driver has shut down")]
    DriverClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
