//! RuuviTag manufacturer-data codec.
//!
//! Input is the manufacturer-specific data of an advertisement, starting with
//! the two company-identifier bytes in transmission order, followed by the
//! data-format tag. Formats 3 (RAWv1) and 5 (RAWv2) are supported.
//! See: https://github.com/ruuvi/ruuvi-sensor-protocols

mod rawv1;
mod rawv2;

use crate::psychrometrics::{DerivationError, dewpoint, wetbulb};
use crate::temperature::Unit;
use serde::Serialize;
use thiserror::Error;

/// The first two manufacturer-data bytes of every Ruuvi advertisement, read
/// big-endian in transmission order.
pub const MANUFACTURER_PREFIX: u16 = 0x9904;

/// Ruuvi Innovations' Bluetooth company identifier. Transmitted little-endian,
/// which yields [`MANUFACTURER_PREFIX`] when the bytes are read in order.
pub const COMPANY_ID: u16 = 0x0499;

/// Offset of the data-format tag.
const FORMAT_OFFSET: usize = 2;

/// Error types for decoding RuuviTag data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Not a RuuviTag advertisement at all
    #[error("not a RuuviTag advertisement")]
    NotRecognized,
    /// Recognized manufacturer but a data format this codec does not know
    #[error("unsupported data format {0}")]
    UnsupportedFormat(u8),
    /// Payload shorter than its format requires
    #[error("truncated format {format} payload: expected {expected} bytes, got {actual}")]
    Truncated {
        format: u8,
        expected: usize,
        actual: usize,
    },
    /// A field carries its "invalid / not available" sentinel
    #[error("invalid {0} reading")]
    InvalidReading(&'static str),
    /// The format decoder refused the payload for another reason
    #[error("rejected payload: {0}")]
    Rejected(String),
}

impl DecodeError {
    /// True for recognized but undecodable payloads (the errors worth logging).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::Truncated { .. } | Self::Rejected(_)
        )
    }
}

/// Raw 3-axis acceleration in milli-g.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Acceleration {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// Physical values decoded from one advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorValues {
    pub data_format: u8,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent. May exceed 100 on some firmware.
    pub humidity: f64,
    /// Atmospheric pressure in hPa
    pub pressure: f64,
    pub acceleration: Acceleration,
    /// Battery voltage in Volts
    pub battery: Option<f64>,
    /// TX power in dBm (format 5)
    pub tx_power: Option<i8>,
    /// Movement counter (format 5)
    pub movement_counter: Option<u8>,
    /// Measurement sequence number (format 5)
    pub measurement_sequence: Option<u16>,
}

impl SensorValues {
    /// Dew point in Celsius.
    pub fn dew_point(&self) -> Result<f64, DerivationError> {
        dewpoint::calculate(self.temperature, Unit::Celsius, self.humidity)
    }

    /// Wet-bulb temperature in Celsius.
    pub fn wet_bulb(&self) -> Result<f64, DerivationError> {
        wetbulb::calculate(self.temperature, Unit::Celsius, self.humidity)
    }
}

/// Cheap framing check: does this manufacturer data come from a RuuviTag?
///
/// Only the prefix is inspected; the payload itself is not decoded.
pub fn is_ruuvi_tag(data: &[u8]) -> bool {
    data.len() > FORMAT_OFFSET && u16::from_be_bytes([data[0], data[1]]) == MANUFACTURER_PREFIX
}

/// Decode RuuviTag manufacturer data into sensor values.
///
/// # Errors
/// - [`DecodeError::NotRecognized`] if the prefix does not match
/// - [`DecodeError::UnsupportedFormat`], [`DecodeError::Truncated`] or
///   [`DecodeError::Rejected`] for malformed payloads
/// - [`DecodeError::InvalidReading`] when temperature, humidity or pressure
///   carry their "not available" sentinel
pub fn decode(data: &[u8]) -> Result<SensorValues, DecodeError> {
    if !is_ruuvi_tag(data) {
        return Err(DecodeError::NotRecognized);
    }
    match data[FORMAT_OFFSET] {
        rawv1::FORMAT => rawv1::decode(data),
        rawv2::FORMAT => rawv2::decode(data),
        other => Err(DecodeError::UnsupportedFormat(other)),
    }
}

/// Borrow the fixed-size head of `data` required by `format`.
fn fixed<const N: usize>(data: &[u8], format: u8) -> Result<&[u8; N], DecodeError> {
    data.get(..N)
        .and_then(|head| head.try_into().ok())
        .ok_or(DecodeError::Truncated {
            format,
            expected: N,
            actual: data.len(),
        })
}
