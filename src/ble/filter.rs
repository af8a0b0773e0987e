//! Which advertisements the collector is interested in.

use super::Advertisement;
use crate::codec;
use crate::peripherals::PeripheralRegistry;
use std::sync::Arc;

/// Accepts RuuviTag advertisements from registered peripherals, or from any
/// RuuviTag when the registry is empty.
#[derive(Debug, Clone, Default)]
pub struct PeripheralFilter {
    peripherals: Arc<PeripheralRegistry>,
}

impl PeripheralFilter {
    pub fn new(peripherals: Arc<PeripheralRegistry>) -> Self {
        Self { peripherals }
    }

    /// A filter that accepts every RuuviTag.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn accept(&self, advertisement: &Advertisement) -> bool {
        if !codec::is_ruuvi_tag(&advertisement.manufacturer_data) {
            return false;
        }
        self.peripherals.is_empty() || self.peripherals.contains(&advertisement.address)
    }
}
