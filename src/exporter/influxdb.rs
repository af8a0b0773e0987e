//! InfluxDB line protocol console sink.

use super::{ExportError, Exporter};
use crate::measurement::Measurement;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

/// Default InfluxDB measurement name.
pub const DEFAULT_MEASUREMENT_NAME: &str = "ruuvi_measurement";

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<&'static str, String>,
    pub field_set: BTreeMap<&'static str, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in a tag value.
fn escape_tag(value: &str, fmt: &mut fmt::Formatter) -> fmt::Result {
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            write!(fmt, "\\")?;
        }
        write!(fmt, "{c}")?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        for (key, value) in &self.tag_set {
            write!(fmt, ",{key}=")?;
            escape_tag(value, fmt)?;
        }
        for (i, (key, value)) in self.field_set.iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            write!(fmt, "{sep}{key}={value}")?;
        }
        // Timestamps before the epoch cannot be represented; omit them.
        if let Some(nanos) = self
            .timestamp
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        {
            write!(fmt, " {}", nanos.as_nanos())?;
        }
        Ok(())
    }
}

/// Build the line protocol data point for one measurement.
///
/// Humidity is written as a fraction and pressure in kPa, matching the
/// schema Telegraf's RuuviTag input produces.
pub fn data_point(measurement_name: &str, m: &Measurement) -> DataPoint {
    let mac = m.mac.to_string();
    let name = if m.name.is_empty() {
        mac.clone()
    } else {
        m.name.clone()
    };
    let tag_set = BTreeMap::from([("mac", mac), ("name", name)]);

    let mut fields = BTreeMap::new();
    fields.insert("temperature", FieldValue::Float(m.temperature));
    fields.insert("humidity", FieldValue::Float(m.humidity / 100.0));
    fields.insert("pressure", FieldValue::Float(m.pressure / 10.0));
    fields.insert("acceleration_x", FieldValue::Integer(m.acceleration.x.into()));
    fields.insert("acceleration_y", FieldValue::Integer(m.acceleration.y.into()));
    fields.insert("acceleration_z", FieldValue::Integer(m.acceleration.z.into()));

    macro_rules! add {
        ($name:literal, $val:expr, $variant:ident) => {
            if let Some(v) = $val {
                fields.insert($name, FieldValue::$variant(v.into()));
            }
        };
    }

    add!("dew_point", m.dew_point, Float);
    add!("wet_bulb", m.wet_bulb, Float);
    add!("battery_voltage", m.battery, Float);
    add!("tx_power", m.tx_power, Integer);
    add!("movement_counter", m.movement_counter, Integer);
    add!("measurement_number", m.measurement_sequence, Integer);

    DataPoint {
        measurement: measurement_name.to_string(),
        tag_set,
        field_set: fields,
        timestamp: Some(m.timestamp),
    }
}

/// Writes one line protocol record per measurement.
pub struct InfluxDbExporter {
    measurement_name: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl InfluxDbExporter {
    pub fn new(measurement_name: impl Into<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            measurement_name: measurement_name.into(),
            out: Mutex::new(out),
        }
    }
}

impl Exporter for InfluxDbExporter {
    fn name(&self) -> &str {
        "influxdb"
    }

    fn export<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        measurement: &'a Measurement,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            let line = data_point(&self.measurement_name, measurement);
            let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(out, "{line}")?;
            out.flush()?;
            Ok(())
        })
    }

    fn close(&self) -> Result<(), ExportError> {
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{SharedBuffer, TEST_MAC, base_measurement};
    use std::time::Duration;

    fn at_epoch_plus(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn field_value_display() {
        assert_eq!(FieldValue::Float(3.14).to_string(), "3.14");
        assert_eq!(FieldValue::Integer(-4).to_string(), "-4i");
    }

    #[test]
    fn data_point_format() {
        let data_point = DataPoint {
            measurement: "test".to_string(),
            tag_set: BTreeMap::from([("name", "test".to_string()), ("test", "true".to_string())]),
            field_set: BTreeMap::from([
                ("temperature", FieldValue::Float(32.0)),
                ("humidity", FieldValue::Float(0.2)),
            ]),
            timestamp: Some(at_epoch_plus(1_000_000_000)),
        };
        assert_eq!(
            data_point.to_string(),
            "test,name=test,test=true humidity=0.2,temperature=32 1000000000000000000"
        );
    }

    #[test]
    fn tag_values_are_escaped() {
        let mut m = base_measurement(TEST_MAC, at_epoch_plus(1));
        m.name = "Living room, north".to_string();
        let line = data_point("ruuvi", &m).to_string();
        assert!(line.contains(r"name=Living\ room\,\ north "));
    }

    #[test]
    fn converts_units_and_names() {
        let mut m = base_measurement(TEST_MAC, at_epoch_plus(1_000_000_000));
        m.name = "Sauna".to_string();
        m.temperature = 25.5;
        m.humidity = 60.0;
        m.pressure = 1013.25;
        m.battery = Some(3.0);
        m.tx_power = Some(4);
        m.movement_counter = Some(10);
        m.measurement_sequence = Some(100);

        let line = data_point("ruuvi", &m).to_string();
        assert!(line.starts_with("ruuvi,mac=AA:BB:CC:DD:EE:FF,name=Sauna "));
        assert!(line.contains("temperature=25.5"));
        assert!(line.contains("humidity=0.6"));
        assert!(line.contains("pressure=101.325"));
        assert!(line.contains("battery_voltage=3"));
        assert!(line.contains("tx_power=4i"));
        assert!(line.contains("movement_counter=10i"));
        assert!(line.contains("measurement_number=100i"));
        assert!(line.contains("acceleration_z=1000i"));
        assert!(line.ends_with(" 1000000000000000000"));
    }

    #[test]
    fn unnamed_peripheral_falls_back_to_mac() {
        let m = base_measurement(TEST_MAC, at_epoch_plus(1));
        let line = data_point("ruuvi", &m).to_string();
        assert!(line.contains(",name=AA:BB:CC:DD:EE:FF "));
    }

    #[test]
    fn absent_values_are_omitted() {
        let m = base_measurement(TEST_MAC, at_epoch_plus(1));
        let line = data_point("ruuvi", &m).to_string();
        assert!(!line.contains("dew_point="));
        assert!(!line.contains("battery_voltage="));
        assert!(!line.contains("tx_power="));
    }

    #[tokio::test]
    async fn export_writes_one_line_per_measurement() {
        let buffer = SharedBuffer::default();
        let exporter = InfluxDbExporter::new(DEFAULT_MEASUREMENT_NAME, Box::new(buffer.clone()));
        let cancel = CancellationToken::new();
        let m = base_measurement(TEST_MAC, at_epoch_plus(1));

        exporter.export(&cancel, &m).await.unwrap();
        exporter.export(&cancel, &m).await.unwrap();
        exporter.close().unwrap();

        let output = buffer.contents();
        assert_eq!(output.lines().count(), 2);
        assert!(output.starts_with("ruuvi_measurement,"));
    }
}
