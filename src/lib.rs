//! Discovery, connection and command routing for the Fleshlight Launch over
//! Bluetooth LE.

pub mod domain;
pub mod infrastructure;
