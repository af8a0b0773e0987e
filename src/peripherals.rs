//! The peripheral registry: which RuuviTags to read and what to call them.
//!
//! An empty registry means "accept any RuuviTag in range".

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// A parsed `MAC=NAME` pair, as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Peripheral {
    /// The peripheral address (e.g., "AA:BB:CC:DD:EE:FF")
    pub address: MacAddress,
    /// The human-readable name (e.g., "Sauna")
    pub name: String,
}

/// Parse a peripheral from a string in the format "MAC=NAME".
///
/// The address part is case-insensitive; the name may be empty or contain
/// spaces.
///
/// # Example
/// ```
/// use ruuvitag_collector::peripherals::parse_peripheral;
///
/// let peripheral = parse_peripheral("aa:bb:cc:dd:ee:ff=Kitchen").unwrap();
/// assert_eq!(peripheral.address.to_string(), "AA:BB:CC:DD:EE:FF");
/// assert_eq!(peripheral.name, "Kitchen");
/// ```
pub fn parse_peripheral(src: &str) -> Result<Peripheral, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid peripheral: expected format MAC=NAME".to_string())?;
    let address = address
        .parse()
        .map_err(|e| format!("invalid peripheral '{src}': {e}"))?;
    Ok(Peripheral {
        address,
        name: name.to_string(),
    })
}

/// Immutable mapping from peripheral address to display name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeripheralRegistry {
    names: BTreeMap<MacAddress, String>,
}

impl PeripheralRegistry {
    pub fn new(names: BTreeMap<MacAddress, String>) -> Self {
        Self { names }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn contains(&self, address: &MacAddress) -> bool {
        self.names.contains_key(address)
    }

    /// Display name for `address`, empty when the address is not registered.
    pub fn name(&self, address: &MacAddress) -> &str {
        self.names.get(address).map(String::as_str).unwrap_or_default()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &MacAddress> {
        self.names.keys()
    }

    /// True when every registered address is present in `seen`.
    ///
    /// Only keys are compared; an empty registry is never covered.
    pub fn is_covered_by<'a, I>(&self, seen: I) -> bool
    where
        I: IntoIterator<Item = &'a MacAddress>,
    {
        if self.is_empty() {
            return false;
        }
        let seen: std::collections::BTreeSet<&MacAddress> = seen.into_iter().collect();
        self.names.keys().all(|address| seen.contains(address))
    }
}

impl FromIterator<Peripheral> for PeripheralRegistry {
    fn from_iter<T: IntoIterator<Item = Peripheral>>(iter: T) -> Self {
        Self::new(iter.into_iter().map(|p| (p.address, p.name)).collect())
    }
}
