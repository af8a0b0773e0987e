//! BlueZ D-Bus radio binding.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    Advertisement, AdvertisementFilter, AdvertisementHandler, BleScanner, DEFAULT_DEVICE, Device,
    DeviceCreator, DeviceError,
};
use crate::codec::COMPANY_ID;
use crate::mac_address::MacAddress;
use crate::scanner::ScanError;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, SelectAll};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// AD type of manufacturer-specific data.
const MANUFACTURER_DATA_TYPE: u8 = 0xFF;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

impl From<bluer::Error> for DeviceError {
    fn from(err: bluer::Error) -> Self {
        DeviceError::Bluetooth(err.to_string())
    }
}

struct Opened {
    _session: Session,
    adapter: Adapter,
}

type Slot = Arc<Mutex<Option<Opened>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Opened>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scanner and device creator sharing one BlueZ adapter.
#[derive(Default)]
pub struct BluerBackend {
    slot: Slot,
}

struct BluerDevice {
    slot: Slot,
}

impl Device for BluerDevice {
    fn stop(&mut self) -> Result<(), DeviceError> {
        // Dropping the session releases the D-Bus connection and any monitor.
        if let Some(opened) = lock(&self.slot).take() {
            log::debug!("Released Bluetooth adapter {}", opened.adapter.name());
        }
        Ok(())
    }
}

impl DeviceCreator for BluerBackend {
    fn new_device<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Device>, DeviceError>> {
        Box::pin(async move {
            let session = Session::new().await?;
            let adapter = if name == DEFAULT_DEVICE {
                session.default_adapter().await?
            } else {
                session
                    .adapter(name)
                    .map_err(|_| DeviceError::NotFound(name.to_string()))?
            };
            adapter.set_powered(true).await?;
            log::info!("Using Bluetooth adapter {}", adapter.name());

            *lock(&self.slot) = Some(Opened {
                _session: session,
                adapter,
            });
            Ok(Box::new(BluerDevice {
                slot: self.slot.clone(),
            }) as Box<dyn Device>)
        })
    }
}

impl BleScanner for BluerBackend {
    fn scan<'a>(
        &'a self,
        cancel: CancellationToken,
        allow_duplicates: bool,
        mut handler: AdvertisementHandler<'a>,
        filter: AdvertisementFilter<'a>,
    ) -> BoxFuture<'a, Result<(), ScanError>> {
        Box::pin(async move {
            let adapter = lock(&self.slot)
                .as_ref()
                .map(|opened| opened.adapter.clone())
                .ok_or(ScanError::NotInitialized)?;

            let pattern = Pattern {
                data_type: MANUFACTURER_DATA_TYPE,
                start_position: 0,
                content: COMPANY_ID.to_le_bytes().to_vec(),
            };
            let monitor_manager = adapter.monitor().await?;
            let mut monitor = monitor_manager
                .register(Monitor {
                    patterns: Some(vec![pattern]),
                    ..Default::default()
                })
                .await?;

            // BlueZ reports each device once through the monitor; repeated
            // advertisements surface as manufacturer data property changes.
            let mut followed = HashSet::new();
            let mut updates: SelectAll<BoxStream<'static, (MacAddress, DeviceEvent)>> =
                SelectAll::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    event = monitor.next() => match event {
                        Some(MonitorEvent::DeviceFound(id)) => {
                            let address = MacAddress::from(id.device);
                            let device = adapter.device(id.device)?;
                            if let Some(data) = device.manufacturer_data().await? {
                                emit(address, &data, &mut handler, &filter);
                            }
                            if allow_duplicates && followed.insert(address) {
                                let events = device.events().await?;
                                updates.push(events.map(move |event| (address, event)).boxed());
                            }
                        }
                        Some(_) => {}
                        None => {
                            return Err(ScanError::Bluetooth(
                                "advertisement monitor closed".to_string(),
                            ));
                        }
                    },
                    Some((address, event)) = updates.next(), if !updates.is_empty() => {
                        use DeviceProperty::ManufacturerData;
                        if let DeviceEvent::PropertyChanged(ManufacturerData(data)) = event {
                            emit(address, &data, &mut handler, &filter);
                        }
                    }
                }
            }
        })
    }
}

fn emit(
    address: MacAddress,
    data: &HashMap<u16, Vec<u8>>,
    handler: &mut AdvertisementHandler<'_>,
    filter: &AdvertisementFilter<'_>,
) {
    let Some(payload) = data.get(&COMPANY_ID) else {
        return;
    };
    // BlueZ strips the company identifier; put it back so every backend
    // delivers the payload as transmitted.
    let mut manufacturer_data = Vec::with_capacity(payload.len() + 2);
    manufacturer_data.extend_from_slice(&COMPANY_ID.to_le_bytes());
    manufacturer_data.extend_from_slice(payload);

    let advertisement = Advertisement {
        address,
        manufacturer_data,
        rssi: None,
    };
    if filter(&advertisement) {
        handler(advertisement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MANUFACTURER_PREFIX;
    use bluer::Address;

    #[test]
    fn address_converts_to_mac_address() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac, MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }

    #[test]
    fn emit_restores_company_identifier() {
        let mut data = HashMap::new();
        data.insert(COMPANY_ID, vec![0x05, 0x01]);
        let mut seen = Vec::new();
        {
            let mut handler: AdvertisementHandler<'_> = Box::new(|adv| seen.push(adv));
            let filter: AdvertisementFilter<'_> = Box::new(|_| true);
            emit(MacAddress([1, 2, 3, 4, 5, 6]), &data, &mut handler, &filter);
        }
        assert_eq!(seen.len(), 1);
        let data = &seen[0].manufacturer_data;
        let prefix = u16::from_be_bytes([data[0], data[1]]);
        assert_eq!(prefix, MANUFACTURER_PREFIX);
        assert_eq!(&data[2..], &[0x05, 0x01]);
    }

    #[test]
    fn emit_ignores_other_manufacturers() {
        let mut data = HashMap::new();
        data.insert(0x004C, vec![0x02, 0x15]);
        let mut count = 0;
        {
            let mut handler: AdvertisementHandler<'_> = Box::new(|_| count += 1);
            let filter: AdvertisementFilter<'_> = Box::new(|_| true);
            emit(MacAddress([1, 2, 3, 4, 5, 6]), &data, &mut handler, &filter);
        }
        assert_eq!(count, 0);
    }

    #[test]
    fn emit_honours_filter() {
        let mut data = HashMap::new();
        data.insert(COMPANY_ID, vec![0x05]);
        let mut count = 0;
        {
            let mut handler: AdvertisementHandler<'_> = Box::new(|_| count += 1);
            let filter: AdvertisementFilter<'_> = Box::new(|_| false);
            emit(MacAddress([1, 2, 3, 4, 5, 6]), &data, &mut handler, &filter);
        }
        assert_eq!(count, 0);
    }

    #[test]
    fn stop_without_adapter_is_a_noop() {
        let backend = BluerBackend::default();
        let mut device = BluerDevice {
            slot: backend.slot.clone(),
        };
        assert!(device.stop().is_ok());
    }
}
