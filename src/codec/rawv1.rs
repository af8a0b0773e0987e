//! Data format 3 (RAWv1).
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0–1    | manufacturer prefix |
//! | 2      | format (3) |
//! | 3      | humidity, 0.5 % steps |
//! | 4      | temperature, sign bit + integer degrees |
//! | 5      | temperature fraction, 0.01 °C |
//! | 6–7    | pressure, Pa above 50 000 |
//! | 8–13   | acceleration X/Y/Z, milli-g |
//! | 14–15  | battery, millivolts |

use super::{Acceleration, DecodeError, SensorValues, fixed};

pub(super) const FORMAT: u8 = 3;
const LEN: usize = 16;

pub(super) fn decode(data: &[u8]) -> Result<SensorValues, DecodeError> {
    let b = fixed::<LEN>(data, FORMAT)?;
    Ok(SensorValues {
        data_format: FORMAT,
        temperature: temperature(b[4], b[5]),
        humidity: f64::from(b[3]) / 2.0,
        pressure: (f64::from(u16::from_be_bytes([b[6], b[7]])) + 50_000.0) / 100.0,
        acceleration: Acceleration {
            x: i16::from_be_bytes([b[8], b[9]]),
            y: i16::from_be_bytes([b[10], b[11]]),
            z: i16::from_be_bytes([b[12], b[13]]),
        },
        battery: Some(f64::from(u16::from_be_bytes([b[14], b[15]])) / 1000.0),
        tx_power: None,
        movement_counter: None,
        measurement_sequence: None,
    })
}

/// Sign-magnitude integer part plus a fraction that shares its sign.
fn temperature(integer: u8, fraction: u8) -> f64 {
    let magnitude = f64::from(integer & 0x7F) + f64::from(fraction) / 100.0;
    if integer & 0x80 != 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(hex: &[u8]) -> Vec<u8> {
        let mut data = vec![0x99, 0x04];
        data.extend_from_slice(hex);
        data
    }

    #[test]
    fn reference_vector() {
        // Official RAWv1 example
        let data = payload(&[
            0x03, 0x29, 0x1A, 0x1E, 0xCE, 0x1E, 0xFC, 0x18, 0xF9, 0x42, 0x02, 0xCA, 0x0B, 0x53,
        ]);
        let values = decode(&data).unwrap();
        assert_eq!(values.humidity, 20.5);
        assert!((values.temperature - 26.3).abs() < 1e-9);
        // 0xCE1E = 52766 Pa above 50 kPa, offset then scaled to hPa
        assert!((values.pressure - 1027.66).abs() < 1e-9);
        assert_eq!(
            values.acceleration,
            Acceleration { x: -1000, y: -1726, z: 714 }
        );
        assert_eq!(values.battery, Some(2.899));
        assert_eq!(values.tx_power, None);
    }

    #[test]
    fn extreme_values() {
        let max = decode(&payload(&[
            0x03, 0xFF, 0x7F, 0x63, 0xFF, 0xFF, 0x7F, 0xFF, 0x7F, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF,
        ]))
        .unwrap();
        assert!((max.temperature - 127.99).abs() < 1e-9);
        assert_eq!(max.humidity, 127.5);
        assert!((max.pressure - 1155.35).abs() < 1e-9);
        assert_eq!(max.battery, Some(65.535));

        let min = decode(&payload(&[
            0x03, 0x00, 0xFF, 0x63, 0x00, 0x00, 0x80, 0x01, 0x80, 0x01, 0x80, 0x01, 0x00, 0x00,
        ]))
        .unwrap();
        assert!((min.temperature + 127.99).abs() < 1e-9);
        assert_eq!(min.humidity, 0.0);
        assert_eq!(min.pressure, 500.0);
        assert_eq!(min.acceleration.x, -32767);
    }

    #[test]
    fn fraction_follows_integer_sign() {
        assert!((temperature(0x81, 50) + 1.5).abs() < 1e-9);
        assert!((temperature(0x01, 50) - 1.5).abs() < 1e-9);
        assert!((temperature(0x80, 25) + 0.25).abs() < 1e-9);
    }
}
