//! The scan engine: consumes the measurement stream and fans every
//! measurement out to the configured exporters.
//!
//! Three scheduling modes share one consumption loop and differ only in
//! when a scan window ends:
//!
//! - [`ScanMode::Once`]: until every registered peripheral has reported, or
//!   the caller's deadline passes.
//! - [`ScanMode::Interval`]: one `Once`-style window per tick, each bounded by
//!   the interval itself.
//! - [`ScanMode::Continuous`]: until cancelled.

pub mod discovery;

use crate::ble::{BleScanner, Device, DeviceCreator, DeviceError};
use crate::cancel::{self, CancelOnDrop};
use crate::even_minutes;
use crate::exporter::{self, DEFAULT_EXPORT_TIMEOUT, ExportErrors, Exporter};
use crate::peripherals::PeripheralRegistry;
use crate::stream::{MEASUREMENT_CHANNEL_BUFFER_SIZE, MeasurementChannel, MeasurementStream};
use chrono::Local;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use discovery::Discovery;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    #[error("failed to initialize device {name}: {source}")]
    Device {
        name: String,
        #[source]
        source: DeviceError,
    },
    #[error("scanner is not initialized")]
    NotInitialized,
    #[error("scanner is closed")]
    Closed,
    #[error("scan interval must be greater than zero")]
    InvalidInterval,
    #[error("at least one exporter must be specified")]
    NoExporters,
    /// The scan worker task panicked or was aborted
    #[error("scan worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Once,
    Interval,
    Continuous,
}

/// When a scan window ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    AllPeripheralsSeen,
    Never,
}

/// Everything a scan session needs besides the radio.
#[derive(Clone)]
pub struct ScanConfig {
    pub peripherals: Arc<PeripheralRegistry>,
    pub exporters: Vec<Arc<dyn Exporter>>,
    /// Ceiling for delivering one measurement to all exporters
    pub export_timeout: Duration,
    pub channel_capacity: usize,
}

impl ScanConfig {
    pub fn new(peripherals: PeripheralRegistry, exporters: Vec<Arc<dyn Exporter>>) -> Self {
        Self {
            peripherals: Arc::new(peripherals),
            exporters,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            channel_capacity: MEASUREMENT_CHANNEL_BUFFER_SIZE,
        }
    }
}

/// A scan session owning one device handle.
pub struct Scanner {
    mode: ScanMode,
    config: ScanConfig,
    stream: MeasurementStream,
    devices: Arc<dyn DeviceCreator>,
    device: Option<Box<dyn Device>>,
    stop: CancellationToken,
    closed: bool,
}

impl Scanner {
    pub fn new(
        mode: ScanMode,
        config: ScanConfig,
        ble: Arc<dyn BleScanner>,
        devices: Arc<dyn DeviceCreator>,
    ) -> Self {
        let stream = MeasurementStream::new(ble, config.peripherals.clone())
            .with_capacity(config.channel_capacity);
        Self {
            mode,
            config,
            stream,
            devices,
            device: None,
            stop: CancellationToken::new(),
            closed: false,
        }
    }

    pub fn once(
        config: ScanConfig,
        ble: Arc<dyn BleScanner>,
        devices: Arc<dyn DeviceCreator>,
    ) -> Self {
        Self::new(ScanMode::Once, config, ble, devices)
    }

    pub fn interval(
        config: ScanConfig,
        ble: Arc<dyn BleScanner>,
        devices: Arc<dyn DeviceCreator>,
    ) -> Self {
        Self::new(ScanMode::Interval, config, ble, devices)
    }

    pub fn continuous(
        config: ScanConfig,
        ble: Arc<dyn BleScanner>,
        devices: Arc<dyn DeviceCreator>,
    ) -> Self {
        Self::new(ScanMode::Continuous, config, ble, devices)
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Cancelling this token ends any running or future scan of this session.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Open the named radio. Must succeed before [`Scanner::scan`].
    ///
    /// # Arguments
    /// * `device_name` - `"default"` or a backend-specific adapter name such as `hci0`
    ///
    /// # Errors
    /// - [`ScanError::Closed`] after [`Scanner::close`]
    /// - [`ScanError::Device`] if the radio cannot be opened
    pub async fn init(&mut self, device_name: &str) -> Result<(), ScanError> {
        if self.closed {
            return Err(ScanError::Closed);
        }
        let device = self
            .devices
            .new_device(device_name)
            .await
            .map_err(|source| ScanError::Device {
                name: device_name.to_string(),
                source,
            })?;
        if let Some(mut previous) = self.device.replace(device)
            && let Err(e) = previous.stop()
        {
            log::warn!("Failed to stop previous device: {e}");
        }

        if self.config.peripherals.is_empty() {
            log::info!("Reading from all nearby RuuviTags");
        } else {
            let addresses: Vec<String> = self
                .config
                .peripherals
                .addresses()
                .map(ToString::to_string)
                .collect();
            log::info!("Reading from peripherals {}", addresses.join(", "));
        }
        Ok(())
    }

    /// Run one scan according to the session's mode.
    ///
    /// `interval` is only used by [`ScanMode::Interval`]. Cancellation of
    /// `cancel` or of the stop token ends the scan without error, and so does
    /// a deadline carried by `cancel`. Export failures are logged and never
    /// end a scan.
    ///
    /// # Errors
    /// - [`ScanError::Closed`] after [`Scanner::close`]
    /// - [`ScanError::NotInitialized`] without a successful [`Scanner::init`]
    /// - [`ScanError::NoExporters`] when the session has no exporter
    /// - [`ScanError::InvalidInterval`] for a zero interval in interval mode
    /// - [`ScanError::Bluetooth`] or [`ScanError::Worker`] when the radio scan fails
    pub async fn scan(
        &self,
        cancel: &CancellationToken,
        interval: Duration,
    ) -> Result<(), ScanError> {
        if self.closed {
            return Err(ScanError::Closed);
        }
        if self.device.is_none() {
            return Err(ScanError::NotInitialized);
        }
        if self.config.exporters.is_empty() {
            return Err(ScanError::NoExporters);
        }

        let cancel = cancel::either(cancel, &self.stop);
        let _release = CancelOnDrop(cancel.clone());
        match self.mode {
            ScanMode::Once => self.window(&cancel, Termination::AllPeripheralsSeen).await,
            ScanMode::Continuous => {
                log::info!("Listening for measurements");
                self.window(&cancel, Termination::Never).await
            }
            ScanMode::Interval => self.scan_interval(&cancel, interval).await,
        }
    }

    async fn scan_interval(
        &self,
        cancel: &CancellationToken,
        interval: Duration,
    ) -> Result<(), ScanError> {
        if interval.is_zero() {
            return Err(ScanError::InvalidInterval);
        }
        let wait = even_minutes::until(Local::now(), interval);
        log::info!("Scanning measurements every {interval:?}, first scan in {wait:?}");

        let mut ticks = tokio::time::interval_at(Instant::now() + wait, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticks.tick() => {}
            }
            let window = cancel::with_timeout(cancel, interval);
            let _release = CancelOnDrop(window.clone());
            self.window(&window, Termination::AllPeripheralsSeen).await?;
        }
    }

    /// Consume one measurement stream until `termination` says so, `cancel`
    /// fires, or the stream ends.
    async fn window(
        &self,
        cancel: &CancellationToken,
        termination: Termination,
    ) -> Result<(), ScanError> {
        let scan = cancel.child_token();
        let _stop_scan = CancelOnDrop(scan.clone());
        let MeasurementChannel {
            mut receiver,
            worker,
        } = self.stream.channel(scan.clone());

        let mut seen = HashSet::new();
        loop {
            let measurement = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(measurement) => measurement,
                    None => break,
                },
            };
            seen.insert(measurement.mac);
            log::info!(
                "Exporting measurement from {} ({})",
                measurement.mac,
                measurement.name
            );
            if let Err(errors) = exporter::export_all(
                &self.config.exporters,
                cancel,
                &measurement,
                self.config.export_timeout,
            )
            .await
            {
                log::debug!("{} of {} exports failed", errors.len(), self.config.exporters.len());
            }
            if termination == Termination::AllPeripheralsSeen
                && self.config.peripherals.is_covered_by(&seen)
            {
                log::debug!("All peripherals seen");
                break;
            }
        }

        scan.cancel();
        drop(receiver);
        worker
            .await
            .unwrap_or_else(|e| Err(ScanError::Worker(e.to_string())))
    }

    /// Stop scanning, release the device and close every exporter.
    ///
    /// Device failures are logged; exporter failures are returned together.
    /// Calling this more than once is a no-op.
    ///
    /// # Errors
    /// [`ExportErrors`] holding every exporter whose `close` failed.
    pub fn close(&mut self) -> Result<(), ExportErrors> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stop.cancel();
        if let Some(mut device) = self.device.take()
            && let Err(e) = device.stop()
        {
            log::error!("Failed to stop device: {e}");
        }
        exporter::close_all(&self.config.exporters)
    }
}
