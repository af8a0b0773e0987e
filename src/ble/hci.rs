//! Raw HCI socket radio binding.
//!
//! Scans for BLE advertisements through raw Linux HCI sockets without the
//! BlueZ daemon. Requires CAP_NET_RAW and CAP_NET_ADMIN capabilities or root
//! privileges.

use super::{
    Advertisement, AdvertisementFilter, AdvertisementHandler, BleScanner, DEFAULT_DEVICE, Device,
    DeviceCreator, DeviceError,
};
use crate::mac_address::MacAddress;
use crate::scanner::ScanError;
use futures::future::BoxFuture;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::unix::AsyncFd;
use tokio_util::sync::CancellationToken;

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Largest HCI event: 3 header bytes plus 255 parameter bytes.
const MAX_EVENT_SIZE: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
#[derive(Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Map an adapter name to its controller index: `default` is controller 0,
/// `hciN` is controller N.
fn controller_id(name: &str) -> Result<u16, DeviceError> {
    if name == DEFAULT_DEVICE {
        return Ok(0);
    }
    name.strip_prefix("hci")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| DeviceError::NotFound(name.to_string()))
}

fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn scan_parameters_packet() -> Vec<u8> {
    // Passive scan, 10ms interval and window in 0.625ms units.
    let interval = 0x0010u16.to_le_bytes();
    let window = 0x0010u16.to_le_bytes();
    let params = [
        LE_SCAN_PASSIVE,
        interval[0],
        interval[1],
        window[0],
        window[1],
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ];
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

fn scan_enable_packet(enable: bool, filter_duplicates: bool) -> Vec<u8> {
    let params = [u8::from(enable), u8::from(filter_duplicates)];
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &params)
}

fn last_os_error(context: &str) -> io::Error {
    let err = io::Error::last_os_error();
    io::Error::new(err.kind(), format!("{context}: {err}"))
}

/// Open a non-blocking raw HCI socket bound to controller `dev_id`.
fn open_socket(dev_id: u16) -> io::Result<OwnedFd> {
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(last_os_error("failed to create HCI socket"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(last_os_error(&format!("failed to bind hci{dev_id}")));
    }
    Ok(fd)
}

fn set_event_filter(fd: &OwnedFd) -> io::Result<()> {
    let mut filter = HciFilter::default();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(last_os_error("failed to set HCI filter"));
    }
    Ok(())
}

fn send_command(fd: &OwnedFd, packet: &[u8]) -> io::Result<()> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    if ret < 0 {
        return Err(last_os_error("failed to send HCI command"));
    }
    Ok(())
}

fn disable_scan(dev_id: u16) -> io::Result<()> {
    let fd = open_socket(dev_id)?;
    send_command(&fd, &scan_enable_packet(false, false))
}

/// Extract every manufacturer-data advertisement from an LE advertising
/// report event (starting at the HCI packet-type byte).
fn parse_advertising_report(event: &[u8]) -> Vec<Advertisement> {
    let mut advertisements = Vec::new();
    if event.len() < 5
        || event[0] != HCI_EVENT_PKT
        || event[1] != EVT_LE_META_EVENT
        || event[3] != EVT_LE_ADVERTISING_REPORT
    {
        return advertisements;
    }

    let num_reports = event[4] as usize;
    let mut report = &event[5..];
    for _ in 0..num_reports {
        // event_type(1) addr_type(1) addr(6) data_len(1) data(data_len) rssi(1)
        if report.len() < 9 {
            break;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&report[2..8]);
        addr.reverse();
        let data_len = report[8] as usize;
        if report.len() < 9 + data_len + 1 {
            break;
        }
        let ad_data = &report[9..9 + data_len];
        let rssi = report[9 + data_len] as i8;

        if let Some(manufacturer_data) = manufacturer_data(ad_data) {
            advertisements.push(Advertisement {
                address: MacAddress(addr),
                manufacturer_data: manufacturer_data.to_vec(),
                rssi: Some(i16::from(rssi)),
            });
        }
        report = &report[9 + data_len + 1..];
    }
    advertisements
}

/// The manufacturer-specific AD structure's payload (company identifier
/// included), if the advertisement carries one.
fn manufacturer_data(ad_data: &[u8]) -> Option<&[u8]> {
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            return None;
        }
        if ad_data[offset + 1] == AD_TYPE_MANUFACTURER_DATA && len >= 3 {
            return Some(&ad_data[offset + 2..offset + 1 + len]);
        }
        offset += 1 + len;
    }
    None
}

/// Scanner and device creator sharing one HCI controller.
#[derive(Default)]
pub struct HciBackend {
    controller: Arc<Mutex<Option<u16>>>,
}

impl HciBackend {
    fn controller(&self) -> Option<u16> {
        *self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct HciDevice {
    dev_id: u16,
    controller: Arc<Mutex<Option<u16>>>,
}

impl Device for HciDevice {
    fn stop(&mut self) -> Result<(), DeviceError> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        disable_scan(self.dev_id)?;
        Ok(())
    }
}

impl DeviceCreator for HciBackend {
    fn new_device<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Device>, DeviceError>> {
        Box::pin(async move {
            let dev_id = controller_id(name)?;
            // Fail early on missing controllers or privileges.
            open_socket(dev_id)?;
            log::info!("Using Bluetooth controller hci{dev_id}");

            *self.controller.lock().unwrap_or_else(PoisonError::into_inner) = Some(dev_id);
            Ok(Box::new(HciDevice {
                dev_id,
                controller: self.controller.clone(),
            }) as Box<dyn Device>)
        })
    }
}

impl BleScanner for HciBackend {
    fn scan<'a>(
        &'a self,
        cancel: CancellationToken,
        allow_duplicates: bool,
        mut handler: AdvertisementHandler<'a>,
        filter: AdvertisementFilter<'a>,
    ) -> BoxFuture<'a, Result<(), ScanError>> {
        Box::pin(async move {
            let dev_id = self.controller().ok_or(ScanError::NotInitialized)?;

            let events = open_socket(dev_id).map_err(bluetooth)?;
            set_event_filter(&events).map_err(bluetooth)?;

            let commands = open_socket(dev_id).map_err(bluetooth)?;
            send_command(&commands, &scan_parameters_packet()).map_err(bluetooth)?;
            send_command(&commands, &scan_enable_packet(true, !allow_duplicates))
                .map_err(bluetooth)?;

            let result = read_events(events, &cancel, &mut handler, &filter).await;

            if let Err(e) = send_command(&commands, &scan_enable_packet(false, false)) {
                log::warn!("Failed to disable scanning on hci{dev_id}: {e}");
            }
            result
        })
    }
}

fn bluetooth(err: io::Error) -> ScanError {
    ScanError::Bluetooth(err.to_string())
}

async fn read_events(
    events: OwnedFd,
    cancel: &CancellationToken,
    handler: &mut AdvertisementHandler<'_>,
    filter: &AdvertisementFilter<'_>,
) -> Result<(), ScanError> {
    let async_fd = AsyncFd::new(events).map_err(bluetooth)?;
    let mut buf = [0u8; MAX_EVENT_SIZE];

    loop {
        let mut guard = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            ready = async_fd.readable() => ready.map_err(bluetooth)?,
        };

        // Drain all available packets before waiting again
        loop {
            let read = guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            });
            let n = match read {
                Ok(Ok(n)) if n > 0 => n,
                Ok(Ok(_)) => break,
                Ok(Err(e)) => return Err(bluetooth(e)),
                Err(_would_block) => break,
            };

            for advertisement in parse_advertising_report(&buf[..n]) {
                if filter(&advertisement) {
                    handler(advertisement);
                }
            }
        }
    }
}
