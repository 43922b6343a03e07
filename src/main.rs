//! CLI Entry Point for bench_daq
//!
//! Connects to one bench instrument, validates its identity and then either
//! prints the identity, takes a single snapshot, or polls the selected
//! functions until Ctrl-C or a transport failure.
//!
//! # Usage
//!
//! Poll voltage and current of a power supply every 500 ms into a CSV file:
//! ```bash
//! bench_daq --port /dev/ttyUSB0 --instrument spe6103 \
//!     --function voltage --function current --interval-ms 500 --csv logs/psu.csv
//! ```
//!
//! Try the workflow without hardware:
//! ```bash
//! bench_daq --mock --instrument mp730889 --snapshot
//! ```

use anyhow::{anyhow, bail, Context, Result};
use bench_daq::adapters::{
    list_serial_ports, MockTransport, SerialSettings, SerialTransport, SUPPORTED_BAUD_RATES,
};
use bench_daq::config::Settings;
use bench_daq::data::{ensure_csv_extension, CsvLogger};
use bench_daq::instrument::{lookup, InstrumentType, MeasurementFunction};
use bench_daq::measurement::Reading;
use bench_daq::poller::PollEvent;
use bench_daq::scpi::ScpiClient;
use bench_daq::session::InstrumentSession;
use bench_daq::tracing_init::{self, TracingConfig};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "bench_daq", version)]
#[command(about = "Poll SCPI bench multimeters and power supplies over serial", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port (e.g. /dev/ttyUSB0, COM3)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Instrument model (mp730889, spe6103)
    #[arg(long)]
    instrument: Option<InstrumentType>,

    /// Function to sample; repeat for several slots (voltage, current)
    #[arg(long = "function", short = 'f')]
    functions: Vec<MeasurementFunction>,

    /// Polling interval in milliseconds (200-60000)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Append readings to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Query every function once and exit
    #[arg(long, conflicts_with = "identify")]
    snapshot: bool,

    /// Print the device identity and exit
    #[arg(long)]
    identify: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Use a simulated instrument instead of a serial port
    #[arg(long)]
    mock: bool,

    /// Print readings as JSON lines
    #[arg(long)]
    json: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(port) = &self.port {
            settings.serial.port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            settings.serial.baud_rate = baud;
        }
        if let Some(instrument) = self.instrument {
            settings.polling.instrument = instrument;
        }
        if !self.functions.is_empty() {
            settings.polling.functions = self.functions.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            settings.polling.interval_ms = interval_ms;
        }
        if let Some(csv) = &self.csv {
            settings.storage.csv_path = Some(csv.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_ports {
        let ports = list_serial_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Settings::load().context("Failed to load configuration")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    tracing_init::init(TracingConfig::from_settings(&settings)?)?;

    let mut session = connect(&cli, &settings).await?;
    info!("Device ID: {}", session.device_identity());

    if cli.identify {
        println!("{}", session.device_identity());
        session.disconnect().await?;
        return Ok(());
    }

    let mut csv = match &settings.storage.csv_path {
        Some(path) => Some(CsvLogger::open(ensure_csv_extension(path))?),
        None => None,
    };

    let result = if cli.snapshot {
        snapshot(&session, &settings, cli.json, csv.as_mut()).await
    } else {
        poll(&mut session, &settings, cli.json, csv.as_mut()).await
    };

    if let Some(csv) = csv {
        csv.close()?;
    }
    session.disconnect().await?;
    result
}

async fn connect(cli: &Cli, settings: &Settings) -> Result<InstrumentSession> {
    let instrument = settings.polling.instrument;
    let profile = lookup(instrument);
    let terminator = settings.serial.terminator.as_str();

    let client = if cli.mock {
        info!("Using simulated {}", instrument);
        ScpiClient::with_terminator(
            MockTransport::for_instrument(instrument).with_response_terminator(terminator),
            terminator,
        )
    } else {
        let port = settings
            .serial
            .port
            .clone()
            .ok_or_else(|| anyhow!("Select a serial port with --port before connecting"))?;
        let baud = settings.serial.baud_rate;
        if !SUPPORTED_BAUD_RATES.contains(&baud) {
            warn!("Baud rate {} is not one of {:?}", baud, SUPPORTED_BAUD_RATES);
        }
        info!("Connecting to {} at {} baud for {}", port, baud, instrument);
        let serial = SerialSettings::new(port, baud).with_timeout(settings.serial.timeout());
        ScpiClient::with_terminator(SerialTransport::new(serial), terminator)
    };

    let session = InstrumentSession::connect_with_client(profile, client)
        .await
        .context("Connection failed")?;
    Ok(session.with_join_timeout(settings.polling.join_timeout()))
}

async fn snapshot(
    session: &InstrumentSession,
    settings: &Settings,
    json: bool,
    mut csv: Option<&mut CsvLogger>,
) -> Result<()> {
    let readings = session
        .snapshot(&settings.polling.functions)
        .await
        .context("Snapshot failed")?;
    for reading in &readings {
        emit(reading, json, csv.as_deref_mut())?;
    }
    Ok(())
}

async fn poll(
    session: &mut InstrumentSession,
    settings: &Settings,
    json: bool,
    mut csv: Option<&mut CsvLogger>,
) -> Result<()> {
    let interval = settings.polling.interval()?;
    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();
    session
        .start_polling(&settings.polling.functions, interval, tx)
        .await
        .context("Configuration failed")?;

    let outcome = drain_events(&mut rx, tokio::signal::ctrl_c(), |reading| {
        emit(reading, json, csv.as_deref_mut())
    })
    .await;

    if !session.stop_polling().await {
        warn!("Polling task was abandoned");
    }
    outcome
}

/// Hands readings to `on_reading` until `shutdown` resolves, the poller
/// reports an error, or the channel closes.
///
/// `shutdown` is created once, so a signal that fires while `on_reading`
/// runs is seen on the next turn of the loop.
async fn drain_events<F, T>(
    rx: &mut mpsc::UnboundedReceiver<PollEvent>,
    shutdown: F,
    mut on_reading: impl FnMut(&Reading) -> Result<()>,
) -> Result<()>
where
    F: Future<Output = T>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted");
                return Ok(());
            }
            event = rx.recv() => match event {
                Some(PollEvent::Reading(reading)) => on_reading(&reading)?,
                Some(PollEvent::Error(message)) => {
                    error!("Polling error: {}", message);
                    return Err(anyhow!("Polling error: {}", message));
                }
                None => return Ok(()),
            }
        }
    }
}

fn emit(reading: &Reading, json: bool, csv: Option<&mut CsvLogger>) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(reading)?);
    } else {
        println!(
            "{} | Slot {} {}: {}",
            reading.timestamp.format("%H:%M:%S"),
            reading.slot_number(),
            reading.function,
            reading.display_value()
        );
    }
    if let Some(csv) = csv {
        if let Err(e) = csv.write_reading(reading) {
            bail!("CSV write failed: {}", e);
        }
    }
    Ok(())
}
