//! Newline-delimited JSON console sink.

use super::{ExportError, Exporter};
use crate::measurement::Measurement;
use futures::future::BoxFuture;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

pub struct JsonExporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonExporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Exporter for JsonExporter {
    fn name(&self) -> &str {
        "json"
    }

    fn export<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        measurement: &'a Measurement,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            let line = serde_json::to_string(measurement).map_err(std::io::Error::from)?;
            let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(out, "{line}")?;
            out.flush()?;
            Ok(())
        })
    }

    fn close(&self) -> Result<(), ExportError> {
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }
}
