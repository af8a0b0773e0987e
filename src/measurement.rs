//! RuuviTag measurement data structure.

use crate::codec::{Acceleration, SensorValues};
use crate::mac_address::MacAddress;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::time::SystemTime;

/// One decoded sample from one RuuviTag.
///
/// Units:
/// - Temperature, dew point and wet bulb in Celsius
/// - Humidity in percent
/// - Pressure in hPa
/// - Battery voltage in Volts
/// - TX power in dBm
/// - Acceleration in milli-g
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    /// Address of the RuuviTag
    pub mac: MacAddress,
    /// Display name from the peripheral registry, empty if unregistered
    pub name: String,
    /// When the collector decoded the advertisement
    #[serde(rename = "ts", serialize_with = "rfc3339")]
    pub timestamp: SystemTime,
    pub data_format: u8,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    /// Absent when it could not be derived from temperature and humidity
    pub dew_point: Option<f64>,
    /// Absent when it could not be derived from temperature and humidity
    pub wet_bulb: Option<f64>,
    pub battery: Option<f64>,
    pub tx_power: Option<i8>,
    pub acceleration: Acceleration,
    pub movement_counter: Option<u8>,
    pub measurement_sequence: Option<u16>,
}

impl Measurement {
    /// Tag decoded values with their origin and capture time.
    ///
    /// Derived quantities start out absent; the caller fills them in.
    pub fn new(
        mac: MacAddress,
        name: impl Into<String>,
        timestamp: SystemTime,
        values: SensorValues,
    ) -> Self {
        Self {
            mac,
            name: name.into(),
            timestamp,
            data_format: values.data_format,
            temperature: values.temperature,
            humidity: values.humidity,
            pressure: values.pressure,
            dew_point: None,
            wet_bulb: None,
            battery: values.battery,
            tx_power: values.tx_power,
            acceleration: values.acceleration,
            movement_counter: values.movement_counter,
            measurement_sequence: values.measurement_sequence,
        }
    }
}

fn rfc3339<S: Serializer>(timestamp: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let timestamp: DateTime<Utc> = (*timestamp).into();
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}
