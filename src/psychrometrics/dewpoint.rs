//! Dew point from temperature and relative humidity.
//!
//! The saturation vapor pressure over water follows the IAPWS-IF97 region 4
//! equation; over ice it uses the Sonntag (1990) fit. The dew point is the
//! temperature at which saturation pressure equals the actual vapor pressure,
//! found numerically.

use super::DerivationError;
use super::solver::solve;
use crate::temperature::{self, CELSIUS_OFFSET, Unit};

/// Valid range of the saturation curves, in Kelvin.
pub const MIN_TEMPERATURE: f64 = 173.0;
pub const MAX_TEMPERATURE: f64 = 678.0;

// Water
const N1: f64 = 0.116_705_214_527_67e4;
const N2: f64 = -0.724_213_167_032_06e6;
const N3: f64 = -0.170_738_469_400_92e2;
const N4: f64 = 0.120_208_247_024_70e5;
const N5: f64 = -0.323_255_503_223_33e7;
const N6: f64 = 0.149_151_086_135_30e2;
const N7: f64 = -0.482_326_573_615_91e4;
const N8: f64 = 0.405_113_405_420_57e6;
const N9: f64 = -0.238_555_575_678_49;
const N10: f64 = 0.650_175_348_447_98e3;

// Ice
const K0: f64 = -5.866_642_6e3;
const K1: f64 = 2.232_870_244e1;
const K2: f64 = 1.393_870_03e-2;
const K3: f64 = -3.426_240_2e-5;
const K4: f64 = 2.704_095_5e-8;
const K5: f64 = 6.706_352_2e-1;

/// Dew point of air at `temperature` (in `unit`) and relative `humidity`
/// (percent), returned in `unit`.
///
/// Humidity must be within (0, 100]; at zero humidity there is no dew point.
pub fn calculate(temperature: f64, unit: Unit, humidity: f64) -> Result<f64, DerivationError> {
    if !(humidity > 0.0 && humidity <= 100.0) {
        return Err(DerivationError::InvalidHumidity(humidity));
    }
    let kelvin = temperature::convert(temperature, unit, Unit::Kelvin);
    let vapor_pressure = humidity / 100.0 * saturation_pressure(kelvin)?;
    let dew_point = solve(saturation_pressure, vapor_pressure, kelvin)?;
    Ok(temperature::convert(dew_point, Unit::Kelvin, unit))
}

/// Saturation vapor pressure in Pa, over ice below the triple point and
/// over water above it.
pub fn saturation_pressure(kelvin: f64) -> Result<f64, DerivationError> {
    if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&kelvin) {
        return Err(DerivationError::OutOfDomain(kelvin));
    }
    if kelvin < CELSIUS_OFFSET {
        Ok(over_ice(kelvin))
    } else {
        Ok(over_water(kelvin))
    }
}

fn over_water(kelvin: f64) -> f64 {
    let th = kelvin + N9 / (kelvin - N10);
    let a = (th + N1) * th + N2;
    let b = (N3 * th + N4) * th + N5;
    let c = (N6 * th + N7) * th + N8;

    let p = 2.0 * c / (-b + (b * b - 4.0 * a * c).sqrt());
    p.powi(4) * 1e6
}

fn over_ice(kelvin: f64) -> f64 {
    let ln_p = K0 / kelvin
        + K1
        + (K2 + (K3 + K4 * kelvin) * kelvin) * kelvin
        + K5 * kelvin.ln();
    ln_p.exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        let dp = calculate(20.0, Unit::Celsius, 50.0).unwrap();
        assert!((dp - 9.3).abs() < 0.1, "dew point {dp}");

        let dp = calculate(30.0, Unit::Celsius, 60.0).unwrap();
        assert!((dp - 21.4).abs() < 0.1, "dew point {dp}");
    }

    #[test]
    fn saturated_air_dew_point_equals_temperature() {
        let dp = calculate(15.0, Unit::Celsius, 100.0).unwrap();
        assert!((dp - 15.0).abs() < 0.01);
    }

    #[test]
    fn non_decreasing_in_humidity() {
        let mut previous = f64::NEG_INFINITY;
        for humidity in (30..=100).step_by(5) {
            let dp = calculate(20.0, Unit::Celsius, f64::from(humidity)).unwrap();
            assert!(dp >= previous, "{dp} < {previous} at {humidity}%");
            previous = dp;
        }
    }

    #[test]
    fn below_freezing_uses_ice_curve() {
        let dp = calculate(-5.0, Unit::Celsius, 80.0).unwrap();
        assert!(dp < -5.0);
        assert!(dp > -15.0);
    }

    #[test]
    fn respects_unit() {
        let celsius = calculate(20.0, Unit::Celsius, 50.0).unwrap();
        let fahrenheit = calculate(68.0, Unit::Fahrenheit, 50.0).unwrap();
        let converted = temperature::convert(fahrenheit, Unit::Fahrenheit, Unit::Celsius);
        assert!((converted - celsius).abs() < 0.01);
    }

    #[test]
    fn rejects_out_of_range_humidity() {
        for humidity in [0.0, -1.0, 100.5, 150.0, f64::NAN] {
            assert!(matches!(
                calculate(20.0, Unit::Celsius, humidity),
                Err(DerivationError::InvalidHumidity(_))
            ));
        }
    }

    #[test]
    fn saturation_curve_domain() {
        assert!(saturation_pressure(MIN_TEMPERATURE).is_ok());
        assert_eq!(
            saturation_pressure(100.0),
            Err(DerivationError::OutOfDomain(100.0))
        );
        assert!(saturation_pressure(700.0).is_err());
    }

    #[test]
    fn saturation_curve_matches_reference_points() {
        // ~611 Pa at the triple point, ~2339 Pa at 20 °C
        assert!((saturation_pressure(273.16).unwrap() - 611.7).abs() < 1.0);
        assert!((saturation_pressure(293.15).unwrap() - 2339.0).abs() < 5.0);
    }
}
