use std::io;

use thiserror::Error;

/// Reasons an activation is refused. A failed activation leaves the engine untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unsupported sample rate {sample_rate} Hz (supported: {min}..={max} Hz)")]
    UnsupportedSampleRate { sample_rate: f32, min: f32, max: f32 },

    #[error("unsupported channel count {channels} (supported: 1..={max})")]
    UnsupportedChannelCount { channels: usize, max: usize },

    #[error("frame size must be non-zero")]
    EmptyFrame,

    #[error("spectrum of {bins} bins exceeds the noise profile capacity of {capacity}")]
    SpectrumTooLarge { bins: usize, capacity: usize },
}

/// Failures while encoding or decoding the persisted state payload.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state stream error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported state version {0}")]
    UnsupportedVersion(u32),

    #[error("stored noise profile has {size} bins, capacity is {capacity}")]
    ProfileTooLarge { size: usize, capacity: usize },
}

pub type StateResult<T> = Result<T, StateError>;
