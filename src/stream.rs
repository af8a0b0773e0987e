//! Turns the callback-driven BLE scan into a channel of measurements.

use crate::ble::{Advertisement, BleScanner, PeripheralFilter};
use crate::codec::{self, DecodeError};
use crate::measurement::Measurement;
use crate::peripherals::PeripheralRegistry;
use crate::scanner::ScanError;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Buffer size for the measurement channel.
pub const MEASUREMENT_CHANNEL_BUFFER_SIZE: usize = 128;

/// Number of leading payload bytes included when logging a bad payload.
const LOGGED_HEADER_LEN: usize = 4;

/// Receiving end of a running scan.
///
/// `receiver` yields `None` once the scan has ended; `worker` then resolves
/// to the scan's outcome.
pub struct MeasurementChannel {
    pub receiver: mpsc::Receiver<Measurement>,
    pub worker: JoinHandle<Result<(), ScanError>>,
}

/// Decodes advertisements from registered peripherals into measurements.
#[derive(Clone)]
pub struct MeasurementStream {
    scanner: Arc<dyn BleScanner>,
    peripherals: Arc<PeripheralRegistry>,
    capacity: usize,
}

impl MeasurementStream {
    pub fn new(scanner: Arc<dyn BleScanner>, peripherals: Arc<PeripheralRegistry>) -> Self {
        Self {
            scanner,
            peripherals,
            capacity: MEASUREMENT_CHANNEL_BUFFER_SIZE,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Start a scan worker feeding a new channel.
    ///
    /// The radio callback never blocks: decoded samples are queued for the
    /// worker, which forwards every one of them into the bounded channel at
    /// the consumer's pace. The worker stops when `cancel` fires or the radio
    /// fails, and the channel closes once it has. Must be called within a
    /// tokio runtime.
    pub fn channel(&self, cancel: CancellationToken) -> MeasurementChannel {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let scanner = self.scanner.clone();
        let peripherals = self.peripherals.clone();

        let worker = tokio::spawn(async move {
            let (queue, mut queued) = mpsc::unbounded_channel();
            let filter = PeripheralFilter::new(peripherals.clone());
            let handler = move |advertisement: Advertisement| {
                if let Some(measurement) = process(&advertisement, &peripherals) {
                    // Fails only once forwarding has stopped.
                    let _ = queue.send(measurement);
                }
            };
            let scan = scanner.scan(
                cancel.clone(),
                true,
                Box::new(handler),
                Box::new(move |adv| filter.accept(adv)),
            );
            // Ends when the scan has returned and dropped its handler.
            let forward = async move {
                while let Some(measurement) = queued.recv().await {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = tx.send(measurement) => if sent.is_err() { break },
                    }
                }
            };

            let (result, ()) = tokio::join!(scan, forward);
            match &result {
                Ok(()) => log::debug!("Scan ended"),
                Err(e) => log::error!("Scan failed: {e}"),
            }
            result
        });

        MeasurementChannel { receiver, worker }
    }
}

/// Decode one advertisement and stamp it with its name and capture time.
///
/// Returns `None` for anything that is not a usable reading; the reason is
/// logged here and never propagated.
pub fn process(
    advertisement: &Advertisement,
    peripherals: &PeripheralRegistry,
) -> Option<Measurement> {
    let address = advertisement.address;
    match advertisement.rssi {
        Some(rssi) => log::debug!("Read sensor data from device {address} at {rssi} dBm"),
        None => log::debug!("Read sensor data from device {address}"),
    }

    let values = match codec::decode(&advertisement.manufacturer_data) {
        Ok(values) => values,
        Err(DecodeError::NotRecognized) => return None,
        Err(e) => {
            log_invalid_data(advertisement, &e);
            return None;
        }
    };

    let mut measurement = Measurement::new(
        address,
        peripherals.name(&address),
        SystemTime::now(),
        values.clone(),
    );
    measurement.dew_point = values
        .dew_point()
        .inspect_err(|e| log::debug!("No dew point for {address}: {e}"))
        .ok();
    measurement.wet_bulb = values
        .wet_bulb()
        .inspect_err(|e| log::debug!("No wet bulb for {address}: {e}"))
        .ok();
    Some(measurement)
}

/// Garbled payloads are warnings; a sensor reporting "not available" is not.
fn log_invalid_data(advertisement: &Advertisement, err: &DecodeError) {
    let level = if err.is_malformed() {
        log::Level::Warn
    } else {
        log::Level::Debug
    };
    let data = &advertisement.manufacturer_data;
    let header = &data[..data.len().min(LOGGED_HEADER_LEN)];
    log::log!(
        level,
        "Dropping invalid data from {}: header {:02X?}: {err}",
        advertisement.address,
        header
    );
}
