//! Core application runner for `ruuvitag-collector`.
//!
//! Decoupled from process setup (logging, signals, exit codes) so it can be
//! tested with an injected radio and output stream.

use crate::ble::{Backend, DEFAULT_DEVICE, DeviceError, Radio};
use crate::cancel;
use crate::duration::parse_duration;
use crate::exporter::influxdb::{DEFAULT_MEASUREMENT_NAME, InfluxDbExporter};
use crate::exporter::json::JsonExporter;
use crate::exporter::{ExportErrors, Exporter};
use crate::peripherals::{Peripheral, PeripheralRegistry, parse_peripheral};
use crate::scanner::{Discovery, ScanConfig, ScanError, ScanMode, Scanner};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Collect RuuviTag measurements over Bluetooth LE.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Bluetooth device to scan with ("default" or an adapter name such as hci0)
    #[arg(long, global = true, env = "RUUVITAG_DEVICE", default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Bluetooth backend to use
    #[arg(long, global = true, default_value_t, value_enum)]
    pub backend: Backend,

    /// RuuviTag to read, with a human-readable name. Repeatable.
    /// Format: --peripheral DE:AD:BE:EF:00:00=Sauna
    /// Without any, every RuuviTag in range is read.
    #[arg(
        long = "peripheral",
        global = true,
        value_parser = parse_peripheral,
        value_name = "MAC=NAME"
    )]
    pub peripherals: Vec<Peripheral>,

    /// Output format. Repeatable.
    #[arg(long = "output", global = true, value_enum, default_values_t = [Output::Influx])]
    pub outputs: Vec<Output>,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, global = true, default_value = DEFAULT_MEASUREMENT_NAME)]
    pub influxdb_measurement: String,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Read every peripheral once and exit.
    /// Durations accept a suffix: 500ms, 30s, 5m, 2h.
    Scan {
        /// Give up on peripherals that have not reported by then
        #[arg(long, default_value = "30s", value_parser = parse_duration)]
        timeout: Duration,
    },
    /// Keep reading until interrupted
    Daemon {
        /// Scan window period; 0 reports every advertisement as it arrives
        #[arg(long, default_value = "60s", value_parser = parse_duration)]
        interval: Duration,
    },
    /// List the RuuviTags in range
    Discover {
        #[arg(long, default_value = "30s", value_parser = parse_duration)]
        timeout: Duration,
    },
}

/// Built-in console sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Output {
    /// InfluxDB line protocol
    Influx,
    /// One JSON object per line
    Json,
}

/// Errors returned by the application runner.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Export(#[from] ExportErrors),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One output stream shared by every sink.
#[derive(Clone)]
struct SharedOut(Arc<Mutex<Box<dyn Write + Send>>>);

impl Write for SharedOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

fn exporters(options: &Options, out: &SharedOut) -> Vec<Arc<dyn Exporter>> {
    let mut outputs = options.outputs.clone();
    outputs.sort();
    outputs.dedup();
    outputs
        .into_iter()
        .map(|output| -> Arc<dyn Exporter> {
            match output {
                Output::Influx => Arc::new(InfluxDbExporter::new(
                    options.influxdb_measurement.clone(),
                    Box::new(out.clone()),
                )),
                Output::Json => Arc::new(JsonExporter::new(Box::new(out.clone()))),
            }
        })
        .collect()
}

/// Run the selected command until it completes or `cancel` fires.
///
/// Measurements (or discovered addresses) are written to `out`.
pub async fn run(
    options: Options,
    radio: Radio,
    cancel: CancellationToken,
    out: Box<dyn Write + Send>,
) -> Result<(), AppError> {
    let out = SharedOut(Arc::new(Mutex::new(out)));
    match options.command {
        Command::Scan { timeout } => {
            let deadline = cancel::with_timeout(&cancel, timeout);
            collect(&options, radio, ScanMode::Once, &deadline, Duration::ZERO, &out).await
        }
        Command::Daemon { interval } if interval.is_zero() => {
            collect(&options, radio, ScanMode::Continuous, &cancel, interval, &out).await
        }
        Command::Daemon { interval } => {
            collect(&options, radio, ScanMode::Interval, &cancel, interval, &out).await
        }
        Command::Discover { timeout } => {
            let deadline = cancel::with_timeout(&cancel, timeout);
            discover(&options, radio, &deadline, out).await
        }
    }
}

async fn collect(
    options: &Options,
    radio: Radio,
    mode: ScanMode,
    cancel: &CancellationToken,
    interval: Duration,
    out: &SharedOut,
) -> Result<(), AppError> {
    let peripherals: PeripheralRegistry = options.peripherals.iter().cloned().collect();
    let config = ScanConfig::new(peripherals, exporters(options, out));
    let mut scanner = Scanner::new(mode, config, radio.scanner, radio.devices);

    let result = match scanner.init(&options.device).await {
        Ok(()) => scanner.scan(cancel, interval).await,
        Err(e) => Err(e),
    };
    let closed = scanner.close();
    result?;
    closed?;
    Ok(())
}

async fn discover(
    options: &Options,
    radio: Radio,
    cancel: &CancellationToken,
    mut out: SharedOut,
) -> Result<(), AppError> {
    let mut discovery = Discovery::new(&options.device, radio.scanner, radio.devices).await?;
    let result = discovery.discover(cancel).await;
    discovery.close()?;
    for address in result? {
        writeln!(out, "{address}")?;
    }
    out.flush()?;
    Ok(())
}
