//! Fleshlight Launch Protocol
//!
//! GATT identifiers and command encoding for the Launch (firmware 1.2).

use crate::domain::error::{BleError, Result};
use uuid::Uuid;

/// Launch primary service UUID
pub const SERVICE_UUID: &str = "88f80580-0000-01e6-aace-0002a5d5c51b";

/// Write characteristic - receives position/speed pairs
pub const WRITE_CHAR_UUID: &str = "88f80581-0000-01e6-aace-0002a5d5c51b";

/// Status notification characteristic
pub const NOTIFY_CHAR_UUID: &str = "88f80582-0000-01e6-aace-0002a5d5c51b";

/// Command characteristic - mode switches
pub const COMMAND_CHAR_UUID: &str = "88f80583-0000-01e6-aace-0002a5d5c51b";

/// Written to the command characteristic to enter position/speed mode
pub const INIT_COMMAND: &[u8] = &[0x00];

/// Highest position and speed value the firmware accepts
pub const MAX_VALUE: u8 = 99;

/// Slowest speed used for converted linear moves; lower values stall
pub const MIN_LINEAR_SPEED: u8 = 20;

/// Travel model: a full stroke at speed `s` takes about
/// `STROKE_COEFFICIENT * s^STROKE_EXPONENT` milliseconds
const STROKE_COEFFICIENT: f64 = 21_000.0;
const STROKE_EXPONENT: f64 = -0.93;

/// Encode a raw move for the write characteristic
pub fn encode_launch(position: u8, speed: u8) -> [u8; 2] {
    [position.min(MAX_VALUE), speed.min(MAX_VALUE)]
}

/// Scale a normalized position (0.0..=1.0) to the firmware range
pub fn launch_position(position: f64) -> u8 {
    (position.clamp(0.0, 1.0) * f64::from(MAX_VALUE)).round() as u8
}

/// Speed needed to travel `distance` (fraction of the stroke) in `duration_ms`
pub fn launch_speed(distance: f64, duration_ms: u32) -> u8 {
    let distance = distance.abs().min(1.0);
    if distance <= f64::EPSILON || duration_ms == 0 {
        return MIN_LINEAR_SPEED;
    }

    let full_stroke_ms = f64::from(duration_ms) / distance;
    let speed = (full_stroke_ms / STROKE_COEFFICIENT).powf(1.0 / STROKE_EXPONENT);
    speed
        .round()
        .clamp(f64::from(MIN_LINEAR_SPEED), f64::from(MAX_VALUE)) as u8
}

/// Convert a linear move from `from` to `to` into a Launch position/speed pair
pub fn linear_to_launch(from: f64, to: f64, duration_ms: u32) -> (u8, u8) {
    let speed = launch_speed(to - from, duration_ms);
    (launch_position(to), speed)
}

/// Parse a UUID string from settings
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim()).map_err(|_| BleError::InvalidUuid(uuid_str.to_string()))
}

#[cfg(windows)]
pub fn to_guid(uuid: Uuid) -> windows::core::GUID {
    windows::core::GUID::from_u128(uuid.as_u128())
}

#[cfg(windows)]
pub fn from_guid(guid: &windows::core::GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}
