// Error types for World Alarm
//
// This module defines error types using thiserror for better error handling
// and debugging throughout the application. Audio errors live next to the
// audio backends in `audio`.

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::AudioError;

/// Main error type for alarm operations
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Alarm store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Time sync error: {0}")]
    SyncError(#[from] SyncError),

    #[error("Audio error: {0}")]
    AudioError(#[from] AudioError),

    #[error("Invalid alarm: {0}")]
    AlarmError(#[from] AlarmParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    NoConfigDir,

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Alarm record store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access alarm file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse alarm file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize alarms: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Alarm store unavailable: {0}")]
    Unavailable(String),
}

/// Network time synchronization errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Failed to parse server time: {0}")]
    ParseError(String),
}

/// Errors raised while reading alarm definitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlarmParseError {
    #[error("Invalid alarm time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("Unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("Unknown repeat mode '{0}', expected once, daily, weekdays or weekends")]
    UnknownRepeat(String),

    #[error("Alarm name must not be empty")]
    EmptyName,
}

/// Notification delivery errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Failed to run notifier: {0}")]
    Spawn(#[from] std::io::Error),
}

// Convenience type aliases for common Result types
pub type Result<T> = std::result::Result<T, AppError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type SyncResult<T> = std::result::Result<T, SyncError>;
