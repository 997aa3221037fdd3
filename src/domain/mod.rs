//! Domain types: device handles, discovery events, settings and command routing.

pub mod discovery;
pub mod error;
pub mod models;
pub mod router;
pub mod settings;
