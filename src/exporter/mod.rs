//! Measurement sinks and the concurrent fan-out that feeds them.
//!
//! Network sinks (databases, message queues) are supplied by the embedding
//! application through the [`Exporter`] trait. Two console sinks ship with
//! the crate so the binary is usable on its own.

pub mod influxdb;
pub mod json;

use crate::measurement::Measurement;
use futures::future::{BoxFuture, join_all};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Ceiling for one fan-out, independent of the scan window.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error from one exporter.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sink(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A failure attributed to the exporter that produced it.
#[derive(Error, Debug)]
#[error("{exporter}: {source}")]
pub struct ExportFailure {
    pub exporter: String,
    pub source: ExportError,
}

/// Every failure from one fan-out or one close pass, one per line.
#[derive(Debug, Default)]
pub struct ExportErrors(pub Vec<ExportFailure>);

impl ExportErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExportFailure> {
        self.0.iter()
    }

    pub fn push(&mut self, exporter: impl Into<String>, source: ExportError) {
        self.0.push(ExportFailure {
            exporter: exporter.into(),
            source,
        });
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ExportErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExportErrors {}

/// A destination for measurements.
///
/// `export` may be called concurrently with itself; implementations must
/// synchronize internally.
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;

    fn export<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        measurement: &'a Measurement,
    ) -> BoxFuture<'a, Result<(), ExportError>>;

    fn close(&self) -> Result<(), ExportError>;
}

/// Deliver `measurement` to every exporter concurrently.
///
/// Each exporter runs in its own task bounded by `timeout` and by `cancel`.
/// All exporters are attempted; the failures of those that did not succeed
/// are returned together.
///
/// # Arguments
/// * `exporters` - Sinks to deliver to, in no particular order
/// * `cancel` - Parent of the token each export observes
/// * `measurement` - The sample to deliver
/// * `timeout` - Ceiling for a single exporter
///
/// # Errors
/// [`ExportErrors`] with one entry per exporter that failed, timed out
/// ([`ExportError::Timeout`]), was cancelled ([`ExportError::Cancelled`]) or
/// panicked ([`ExportError::Panicked`]).
pub async fn export_all(
    exporters: &[Arc<dyn Exporter>],
    cancel: &CancellationToken,
    measurement: &Measurement,
    timeout: Duration,
) -> Result<(), ExportErrors> {
    let measurement = Arc::new(measurement.clone());
    let tasks = exporters.iter().map(|exporter| {
        let exporter = exporter.clone();
        let measurement = measurement.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            log::debug!("Exporting measurement to {}", exporter.name());
            tokio::select! {
                _ = cancel.cancelled() => Err(ExportError::Cancelled),
                result = tokio::time::timeout(timeout, exporter.export(&cancel, &measurement)) => {
                    result.unwrap_or(Err(ExportError::Timeout(timeout)))
                }
            }
        })
    });
    let results = join_all(tasks).await;

    let mut errors = ExportErrors::default();
    for (exporter, result) in exporters.iter().zip(results) {
        let outcome = result.unwrap_or_else(|e| Err(ExportError::Panicked(e.to_string())));
        if let Err(e) = outcome {
            if matches!(e, ExportError::Cancelled) {
                log::debug!("Export to {} cancelled", exporter.name());
            } else {
                log::error!("Failed to export measurement to {}: {e}", exporter.name());
            }
            errors.push(exporter.name(), e);
        }
    }
    errors.into_result()
}

/// Close every exporter, collecting all failures.
pub fn close_all(exporters: &[Arc<dyn Exporter>]) -> Result<(), ExportErrors> {
    let mut errors = ExportErrors::default();
    for exporter in exporters {
        if let Err(e) = exporter.close() {
            log::error!("Failed to close exporter {}: {e}", exporter.name());
            errors.push(exporter.name(), e);
        }
    }
    errors.into_result()
}
