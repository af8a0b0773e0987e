//! Data format 5 (RAWv2).
//!
//! Field decoding and the "not available" sentinels are handled by
//! `ruuvi_decoders::v5`. This module frames the payload for it and maps its
//! result onto [`SensorValues`]:
//!
//! - temperature, humidity or pressure unavailable is [`DecodeError::InvalidReading`]
//! - battery, tx power, movement counter and sequence number become `None`
//! - pressure arrives in Pa and is reported in hPa

use super::{Acceleration, DecodeError, FORMAT_OFFSET, SensorValues, fixed};
use ruuvi_decoders::v5;

pub(super) const FORMAT: u8 = 5;
/// Manufacturer prefix plus the full 24-byte payload, MAC included.
const LEN: usize = FORMAT_OFFSET + v5::PAYLOAD_WITH_MAC_LENGTH;

pub(super) fn decode(data: &[u8]) -> Result<SensorValues, DecodeError> {
    let b = fixed::<LEN>(data, FORMAT)?;
    let tag = v5::decode(&b[FORMAT_OFFSET..]).map_err(|e| match e {
        ruuvi_decoders::DecodeError::UnsupportedFormat(format) => {
            DecodeError::UnsupportedFormat(format)
        }
        ruuvi_decoders::DecodeError::InvalidLength(_) => DecodeError::Truncated {
            format: FORMAT,
            expected: LEN,
            actual: data.len(),
        },
        other => DecodeError::Rejected(other.to_string()),
    })?;

    let temperature = tag
        .temperature
        .ok_or(DecodeError::InvalidReading("temperature"))?;
    let humidity = tag.humidity.ok_or(DecodeError::InvalidReading("humidity"))?;
    let pressure = tag.pressure.ok_or(DecodeError::InvalidReading("pressure"))?;

    Ok(SensorValues {
        data_format: FORMAT,
        temperature,
        humidity,
        pressure: pressure / 100.0,
        // An unavailable axis keeps its raw 0x8000 value.
        acceleration: Acceleration {
            x: tag.acceleration_x.unwrap_or(i16::MIN),
            y: tag.acceleration_y.unwrap_or(i16::MIN),
            z: tag.acceleration_z.unwrap_or(i16::MIN),
        },
        battery: tag.battery_voltage.map(|mv| f64::from(mv) / 1000.0),
        tx_power: tag.tx_power,
        movement_counter: tag.movement_counter,
        measurement_sequence: tag.measurement_sequence,
    })
}
