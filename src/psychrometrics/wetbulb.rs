//! Wet-bulb temperature (Stull 2011 approximation).

use super::DerivationError;
use crate::temperature::{self, Unit};

/// Wet-bulb temperature of air at `temperature` (in `unit`) and relative
/// `humidity` (percent), returned in `unit`.
pub fn calculate(temperature: f64, unit: Unit, humidity: f64) -> Result<f64, DerivationError> {
    if !(0.0..=100.0).contains(&humidity) {
        return Err(DerivationError::InvalidHumidity(humidity));
    }
    let t = temperature::convert(temperature, unit, Unit::Celsius);
    let rh = humidity;
    let tw = t * (0.151977 * (rh + 8.313659).sqrt()).atan() + (t + rh).atan()
        - (rh - 1.676331).atan()
        + 0.00391838 * rh.powf(1.5) * (0.023101 * rh).atan()
        - 4.686035;
    Ok(temperature::convert(tw, Unit::Celsius, unit))
}
