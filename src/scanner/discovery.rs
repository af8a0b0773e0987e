//! Listing the RuuviTags in range.

use super::ScanError;
use crate::ble::{Advertisement, BleScanner, Device, DeviceCreator, DeviceError, PeripheralFilter};
use crate::mac_address::MacAddress;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Scans for any RuuviTag and reports addresses only; nothing is exported.
pub struct Discovery {
    ble: Arc<dyn BleScanner>,
    device: Option<Box<dyn Device>>,
}

impl Discovery {
    /// Open the named radio for discovery.
    ///
    /// # Errors
    /// [`ScanError::Device`] if the radio cannot be opened.
    pub async fn new(
        device_name: &str,
        ble: Arc<dyn BleScanner>,
        devices: Arc<dyn DeviceCreator>,
    ) -> Result<Self, ScanError> {
        let device = devices
            .new_device(device_name)
            .await
            .map_err(|source| ScanError::Device {
                name: device_name.to_string(),
                source,
            })?;
        Ok(Self {
            ble,
            device: Some(device),
        })
    }

    /// Scan until `cancel` fires and return every address seen, sorted and
    /// without duplicates.
    ///
    /// Cancellation, including a deadline carried by `cancel`, is the normal
    /// way for discovery to end.
    ///
    /// # Errors
    /// - [`ScanError::Closed`] after [`Discovery::close`]
    /// - any other radio failure reported by the scan
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<MacAddress>, ScanError> {
        if self.device.is_none() {
            return Err(ScanError::Closed);
        }
        let filter = PeripheralFilter::any();
        let mut found = BTreeSet::new();
        self.ble
            .scan(
                cancel.clone(),
                true,
                Box::new(|advertisement: Advertisement| {
                    log::debug!("Found RuuviTag {}", advertisement.address);
                    found.insert(advertisement.address);
                }),
                Box::new(move |advertisement| filter.accept(advertisement)),
            )
            .await?;
        Ok(found.into_iter().collect())
    }

    /// Release the radio. Later calls do nothing.
    ///
    /// # Errors
    /// The device's own stop failure, on the first call only.
    pub fn close(&mut self) -> Result<(), DeviceError> {
        match self.device.take() {
            Some(mut device) => device.stop(),
            None => Ok(()),
        }
    }
}
