//! `ruuvitag-collector` library.
//!
//! Reads RuuviTag environmental sensors over Bluetooth LE and delivers every
//! decoded measurement to a set of exporters. The binary (`src/main.rs`) is
//! responsible for logging setup, signals and process exit codes; everything
//! else lives here so it can be tested with injected radios and sinks.

pub mod app;
pub mod ble;
pub mod cancel;
pub mod codec;
pub mod duration;
pub mod even_minutes;
pub mod exporter;
pub mod mac_address;
pub mod measurement;
pub mod peripherals;
pub mod psychrometrics;
pub mod scanner;
pub mod stream;
pub mod temperature;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use ble::{Advertisement, Backend, BleScanner, Device, DeviceCreator, DeviceError, Radio};
pub use codec::{DecodeError, SensorValues, decode, is_ruuvi_tag};
pub use duration::parse_duration;
pub use exporter::{ExportError, ExportErrors, Exporter, export_all};
pub use mac_address::MacAddress;
pub use measurement::Measurement;
pub use peripherals::{Peripheral, PeripheralRegistry, parse_peripheral};
pub use scanner::{Discovery, ScanConfig, ScanError, ScanMode, Scanner};
pub use stream::MeasurementStream;
