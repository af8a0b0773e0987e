use super::DerivationError;

/// Iteration cap for [`solve`].
pub(crate) const MAX_ITERATIONS: usize = 10;

/// Relative step size below which the solver considers itself converged.
const TOLERANCE: f64 = 1e-4;

/// Find `x` such that `f(x) == y`, starting from `x0`.
///
/// Newton iteration with a forward-difference derivative (`dx = x / 1000`).
pub(crate) fn solve<F>(f: F, y: f64, x0: f64) -> Result<f64, DerivationError>
where
    F: Fn(f64) -> Result<f64, DerivationError>,
{
    let mut x = x0;
    for _ in 0..MAX_ITERATIONS {
        let dx = x / 1000.0;
        let z = f(x)?;
        let x_new = x + dx * (y - z) / (f(x + dx)? - z);
        if !x_new.is_finite() {
            break;
        }
        if ((x_new - x) / x_new).abs() < TOLERANCE {
            return Ok(x_new);
        }
        x = x_new;
    }
    Err(DerivationError::SolverDidNotConverge(MAX_ITERATIONS))
}
