//! Error types shared by the discovery engine and its radio backends.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::DeviceCommand;

/// Errors raised across the watcher, backend and device-link seams
#[derive(Error, Debug)]
pub enum BleError {
    #[error("Radio watcher failure: {0}")]
    Radio(String),

    #[error("Device {address:#X} is not reachable")]
    DeviceUnavailable { address: u64 },

    #[error("GATT service {uuid} not found")]
    ServiceNotFound { uuid: Uuid },

    #[error("Characteristic {uuid} not found")]
    CharacteristicNotFound { uuid: Uuid },

    #[error("Device rejected the handshake")]
    HandshakeRejected,

    #[error("{step} timed out")]
    Timeout { step: &'static str },

    #[error("Resolution cancelled")]
    Cancelled,

    #[error("Device link lost")]
    LinkLost,

    #[error("Command not supported by device: {0:?}")]
    Unsupported(DeviceCommand),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, BleError>;

#[cfg(windows)]
impl From<windows::core::Error> for BleError {
    fn from(err: windows::core::Error) -> Self {
        BleError::Backend(err.message())
    }
}
