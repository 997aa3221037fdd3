//! Bluetooth Module
//!
//! Discovers, negotiates and drives a Fleshlight Launch over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                     │
//! │      (connector event loop + command router task)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      BleConnector                       │
//! │   scan guard · resolution pipeline · retry policy       │
//! └───────┬─────────────────────────────────────┬───────────┘
//!         │ RadioWatcher                        │ NegotiationBackend
//!         ▼                                     ▼
//! ┌───────────────┐                     ┌──────────────────┐
//! │    Scanner    │                     │    Connection    │
//! │ advertisement │                     │ GATT lookup and  │
//! │    watcher    │                     │   LaunchLink     │
//! └───────────────┘                     └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Launch GATT identifiers and command encoding
//! - [`backend`] - Traits the connector drives the platform through
//! - [`connector`] - Discovery and connection lifecycle
//! - [`cancel`] - Shutdown signal for in-flight resolutions
//! - `scanner` / `connection` - WinRT implementations (Windows only)
//! - [`service`] - Main service coordinator

pub mod backend;
pub mod cancel;
#[cfg(windows)]
pub mod connection;
pub mod connector;
pub mod protocol;
#[cfg(windows)]
pub mod scanner;
pub mod service;

#[cfg(test)]
pub(crate) mod mock;

// Re-export main service for convenience
pub use connector::{BleConnector, ConnectorConfig};
pub use service::BluetoothService;
