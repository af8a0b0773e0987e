//! Temperature units.

/// Offset between the Celsius and Kelvin scales.
pub const CELSIUS_OFFSET: f64 = 273.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Kelvin,
    Celsius,
    Fahrenheit,
}

/// Convert `value` from one unit to another.
pub fn convert(value: f64, from: Unit, to: Unit) -> f64 {
    let kelvin = match from {
        Unit::Kelvin => value,
        Unit::Celsius => value + CELSIUS_OFFSET,
        Unit::Fahrenheit => (value + 459.67) / 1.8,
    };
    match to {
        Unit::Kelvin => kelvin,
        Unit::Celsius => kelvin - CELSIUS_OFFSET,
        Unit::Fahrenheit => kelvin * 1.8 - 459.67,
    }
}
