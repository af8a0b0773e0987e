//! BLE radio abstraction.
//!
//! The collector needs two narrow capabilities from the radio: open/close a
//! device ([`DeviceCreator`], [`Device`]) and run a passive advertisement scan
//! ([`BleScanner`]). Platform bindings live in the feature-gated submodules;
//! tests drive the pipeline with scripted doubles instead.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

pub mod filter;

use crate::mac_address::MacAddress;
use crate::scanner::ScanError;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use filter::PeripheralFilter;

/// Device name that selects the platform's default adapter.
pub const DEFAULT_DEVICE: &str = "default";

/// One received advertisement, reduced to what the collector uses.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub address: MacAddress,
    /// Manufacturer-specific data including the two company-identifier bytes,
    /// in transmission order.
    pub manufacturer_data: Vec<u8>,
    pub rssi: Option<i16>,
}

/// Callback invoked for every accepted advertisement.
pub type AdvertisementHandler<'a> = Box<dyn FnMut(Advertisement) + Send + 'a>;

/// Predicate deciding which advertisements reach the handler.
pub type AdvertisementFilter<'a> = Box<dyn Fn(&Advertisement) -> bool + Send + Sync + 'a>;

/// Error type for device lifecycle operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No adapter with the requested name
    #[error("Bluetooth device '{0}' not found")]
    NotFound(String),
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An opened radio.
pub trait Device: Send + Sync {
    /// Release the radio. Called at most once per handle by its owner.
    fn stop(&mut self) -> Result<(), DeviceError>;
}

/// Opens radios by name.
pub trait DeviceCreator: Send + Sync {
    fn new_device<'a>(&'a self, name: &'a str)
    -> BoxFuture<'a, Result<Box<dyn Device>, DeviceError>>;
}

/// Passive advertisement scanning.
pub trait BleScanner: Send + Sync {
    /// Scan until `cancel` fires or the radio fails.
    ///
    /// Every advertisement for which `filter` returns true is passed to
    /// `handler`. Cancellation (including an expired deadline) ends the scan
    /// with `Ok(())`; only radio failures are errors.
    fn scan<'a>(
        &'a self,
        cancel: CancellationToken,
        allow_duplicates: bool,
        handler: AdvertisementHandler<'a>,
        filter: AdvertisementFilter<'a>,
    ) -> BoxFuture<'a, Result<(), ScanError>>;
}

/// The scanner and device creator of one radio binding.
#[derive(Clone)]
pub struct Radio {
    pub scanner: Arc<dyn BleScanner>,
    pub devices: Arc<dyn DeviceCreator>,
}

/// Available radio backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

impl Backend {
    /// Instantiate the radio binding for this backend.
    pub fn radio(self) -> Radio {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => {
                let backend = Arc::new(bluer::BluerBackend::default());
                Radio {
                    scanner: backend.clone(),
                    devices: backend,
                }
            }
            #[cfg(feature = "hci")]
            Backend::Hci => {
                let backend = Arc::new(hci::HciBackend::default());
                Radio {
                    scanner: backend.clone(),
                    devices: backend,
                }
            }
        }
    }
}
