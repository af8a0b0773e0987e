use crate::ble::{
    Advertisement, AdvertisementFilter, AdvertisementHandler, BleScanner, Device, DeviceCreator,
    DeviceError,
};
use crate::codec::Acceleration;
use crate::exporter::{ExportError, Exporter};
use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use crate::scanner::ScanError;
use futures::future::BoxFuture;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Build an unnamed format 5 `Measurement` with every optional field unset.
///
/// Tests can override just the fields they care about.
pub fn base_measurement(mac: MacAddress, timestamp: SystemTime) -> Measurement {
    Measurement {
        mac,
        name: String::new(),
        timestamp,
        data_format: 5,
        temperature: 20.0,
        humidity: 50.0,
        pressure: 1000.0,
        dew_point: None,
        wet_bulb: None,
        battery: None,
        tx_power: None,
        acceleration: Acceleration { x: 0, y: 0, z: 1000 },
        movement_counter: None,
        measurement_sequence: None,
    }
}

/// An advertisement from `mac` carrying `manufacturer_data` verbatim.
pub fn advertisement(mac: &str, manufacturer_data: Vec<u8>) -> Advertisement {
    Advertisement {
        address: mac.parse().unwrap(),
        manufacturer_data,
        rssi: Some(-60),
    }
}

const PREFIX: [u8; 2] = [0x99, 0x04];

/// Field values for a format 3 payload, in decoded units.
#[derive(Debug, Clone)]
pub struct Rawv1 {
    pub humidity: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub acceleration: Acceleration,
    pub battery_mv: u16,
}

impl Default for Rawv1 {
    fn default() -> Self {
        Self {
            humidity: 50.0,
            temperature: 20.0,
            pressure: 1000.0,
            acceleration: Acceleration { x: 0, y: 0, z: 1000 },
            battery_mv: 3000,
        }
    }
}

impl Rawv1 {
    pub fn encode(&self) -> Vec<u8> {
        let magnitude = self.temperature.abs();
        let integer = magnitude.trunc() as u8 & 0x7F;
        let fraction = ((magnitude - magnitude.trunc()) * 100.0).round() as u8;
        let sign = if self.temperature < 0.0 { 0x80 } else { 0x00 };

        let mut data = PREFIX.to_vec();
        data.push(3);
        data.push((self.humidity * 2.0).round() as u8);
        data.push(sign | integer);
        data.push(fraction);
        let pressure = (self.pressure * 100.0).round() as u32 - 50_000;
        data.extend_from_slice(&pressure.to_be_bytes()[2..]);
        data.extend_from_slice(&self.acceleration.x.to_be_bytes());
        data.extend_from_slice(&self.acceleration.y.to_be_bytes());
        data.extend_from_slice(&self.acceleration.z.to_be_bytes());
        data.extend_from_slice(&self.battery_mv.to_be_bytes());
        data
    }
}

/// Field values for a format 5 payload, in decoded units.
#[derive(Debug, Clone)]
pub struct Rawv2 {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub acceleration: Acceleration,
    pub battery_mv: u16,
    pub tx_power: i8,
    pub movement_counter: u8,
    pub measurement_sequence: u16,
}

impl Default for Rawv2 {
    fn default() -> Self {
        Self {
            temperature: 20.0,
            humidity: 50.0,
            pressure: 1000.0,
            acceleration: Acceleration { x: 0, y: 0, z: 1000 },
            battery_mv: 3000,
            tx_power: 4,
            movement_counter: 0,
            measurement_sequence: 0,
        }
    }
}

impl Rawv2 {
    pub fn encode(&self) -> Vec<u8> {
        let temperature = (self.temperature / 0.005).round() as i16;
        let humidity = (self.humidity * 400.0).round() as u16;
        let pressure = ((self.pressure * 100.0).round() - 50_000.0) as u16;
        let battery = self.battery_mv.saturating_sub(1600) & 0x07FF;
        let tx_power = ((i16::from(self.tx_power) + 40) / 2) as u16 & 0x1F;

        let mut data = PREFIX.to_vec();
        data.push(5);
        data.extend_from_slice(&temperature.to_be_bytes());
        data.extend_from_slice(&humidity.to_be_bytes());
        data.extend_from_slice(&pressure.to_be_bytes());
        data.extend_from_slice(&self.acceleration.x.to_be_bytes());
        data.extend_from_slice(&self.acceleration.y.to_be_bytes());
        data.extend_from_slice(&self.acceleration.z.to_be_bytes());
        data.extend_from_slice(&((battery << 5) | tx_power).to_be_bytes());
        data.push(self.movement_counter);
        data.extend_from_slice(&self.measurement_sequence.to_be_bytes());
        data.extend_from_slice(&TEST_MAC.0);
        data
    }
}

/// Replays a fixed set of advertisements at the start of every scan, then
/// waits for cancellation like a radio with nothing more in range.
#[derive(Default)]
pub struct FakeBleScanner {
    advertisements: Vec<Advertisement>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl FakeBleScanner {
    pub fn new(advertisements: Vec<Advertisement>) -> Self {
        Self {
            advertisements,
            ..Default::default()
        }
    }

    /// A scanner whose every scan fails immediately with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn scan_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BleScanner for FakeBleScanner {
    fn scan<'a>(
        &'a self,
        cancel: CancellationToken,
        _allow_duplicates: bool,
        mut handler: AdvertisementHandler<'a>,
        filter: AdvertisementFilter<'a>,
    ) -> BoxFuture<'a, Result<(), ScanError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.failure {
                return Err(ScanError::Bluetooth(message.clone()));
            }
            for advertisement in &self.advertisements {
                if filter(advertisement) {
                    handler(advertisement.clone());
                }
            }
            cancel.cancelled().await;
            Ok(())
        })
    }
}

/// Hands out devices that count how often they are stopped.
#[derive(Default)]
pub struct CountingDevices {
    opened: AtomicUsize,
    stops: Arc<AtomicUsize>,
    fail_open: bool,
    fail_stop: bool,
}

impl CountingDevices {
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn failing_stop() -> Self {
        Self {
            fail_stop: true,
            ..Default::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct CountingDevice {
    stops: Arc<AtomicUsize>,
    fail: bool,
}

impl Device for CountingDevice {
    fn stop(&mut self) -> Result<(), DeviceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DeviceError::Bluetooth("stop failed".to_string()));
        }
        Ok(())
    }
}

impl DeviceCreator for CountingDevices {
    fn new_device<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Device>, DeviceError>> {
        Box::pin(async move {
            if self.fail_open {
                return Err(DeviceError::NotFound(name.to_string()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingDevice {
                stops: self.stops.clone(),
                fail: self.fail_stop,
            }) as Box<dyn Device>)
        })
    }
}

/// Keeps every exported measurement.
pub struct RecordingExporter {
    name: String,
    delay: Duration,
    exported: Mutex<Vec<Measurement>>,
    closes: AtomicUsize,
}

impl RecordingExporter {
    pub fn new(name: &str) -> Self {
        Self::with_delay(name, Duration::ZERO)
    }

    /// An exporter that takes `delay` to complete every export.
    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            exported: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn exported(&self) -> Vec<Measurement> {
        self.exported.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Exporter for RecordingExporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn export<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        measurement: &'a Measurement,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.exported.lock().unwrap().push(measurement.clone());
            Ok(())
        })
    }

    fn close(&self) -> Result<(), ExportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails every export and close.
pub struct FailingExporter {
    name: String,
    attempts: AtomicUsize,
    closes: AtomicUsize,
}

impl FailingExporter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attempts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Exporter for FailingExporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn export<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        _measurement: &'a Measurement,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ExportError::Sink("sink unavailable".into()))
        })
    }

    fn close(&self) -> Result<(), ExportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Err(ExportError::Sink("close failed".into()))
    }
}

/// Never finishes an export.
pub struct HangingExporter {
    name: String,
}

impl HangingExporter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Exporter for HangingExporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn export<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        _measurement: &'a Measurement,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(futures::future::pending())
    }

    fn close(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// A clonable in-memory writer for checking sink output.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
