//! Soil probe CLI
//!
//! A command-line interface (CLI) application for the RS485 7-in-1 soil
//! probe (moisture, temperature, pH, nitrogen, phosphorus, potassium).
//!
//! This tool allows users to:
//! - Read all soil values once.
//! - Read a single soil value.
//! - Run in a continuous daemon mode to poll the probe and either print new
//!   readings to the console or publish them to an MQTT broker.
//! - Scan the bus for the probe's baud rate.
//!
//! The CLI leverages the `soilprobe_lib` crate for the protocol, clients and
//! the polling cycle.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use soilprobe_lib::{
    poller::{Poller, ReadingCache},
    protocol as proto,
    sync_safe_client::SafeClient,
    tokio_common::minimum_frame_gap,
    transport::SerialTransport,
};
use std::io::{stdout, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::{panic, time::Duration};

mod commandline;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Checks if the user-provided delay covers the bus silence; if not, uses the
/// silence.
fn check_rtu_delay(user_delay: Duration, baud_rate: &proto::BaudRate) -> Duration {
    let min_rtu_delay = minimum_frame_gap(baud_rate);
    if user_delay < min_rtu_delay {
        warn!(
            "User-defined RTU delay of {user_delay:?} is below the recommended minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        user_delay
    }
}

fn open_client(
    device: &str,
    baud_rate: &proto::BaudRate,
    address: proto::Address,
    timeout: Duration,
) -> Result<SafeClient<SerialTransport>> {
    let port = SerialTransport::open(device, baud_rate)
        .with_context(|| format!("Cannot open serial port {device} at baud {baud_rate}"))?;
    let mut client = SafeClient::new(port, address);
    client.set_settle(timeout);
    Ok(client)
}

fn print_reading(reading: &proto::SensorReading) {
    for (field, value) in reading.iter() {
        println!("{:<12} {:>6} {}", field.name(), value, field.unit());
    }
}

/// Prompts the user for confirmation that only the probe is on the bus.
fn confirm_only_one_probe_connected() -> Result<bool> {
    println!(
        "WARNING: This operation should only be performed if a SINGLE soil probe \
         is connected to the RS485 bus segment."
    );
    println!("Other devices may answer or be confused by requests at foreign baud rates.");
    Confirm::new()
        .with_prompt("Do you want to continue with this understanding?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

/// Handles the RTU scan command.
///
/// Iterates through all supported baud rates and stops at the first one the
/// probe answers on.
fn handle_rtu_scan(
    device: &str,
    address: proto::Address,
    delay: Duration,
    timeout: Duration,
) -> Result<()> {
    if !confirm_only_one_probe_connected()? {
        info!("RTU scan aborted by user.");
        return Ok(());
    }
    info!("Starting RTU scan on device: {device}");

    for baud_rate in proto::BaudRate::ALL {
        print!("Scanning at {baud_rate} baud on {device} ... ");
        stdout().flush().context("Failed to flush stdout")?;

        let scan_attempt_delay = check_rtu_delay(delay, &baud_rate);
        let result = open_client(device, &baud_rate, address, timeout)
            .and_then(|client| client.read_all().context("Cannot read probe"));
        match result {
            Ok(reading) => {
                println!("SUCCESS!");
                println!("  Probe found with RS485 Address: {address}");
                println!("  Communication established at Baud rate: {baud_rate}");
                println!("  Reading: {reading}");
                return Ok(());
            }
            Err(error) => {
                println!("failed.");
                debug!("Scan error at {baud_rate} baud: {error:?}");
                std::thread::sleep(scan_attempt_delay);
            }
        }
    }
    bail!("No soil probe found on {device} at address {address} across all supported baud rates.");
}

fn run_console_daemon(
    client: SafeClient<SerialTransport>,
    poll_interval: Duration,
    running: &AtomicBool,
) -> Result<()> {
    let cache = Arc::new(ReadingCache::new());
    cache.subscribe(|reading| println!("{reading}"));
    let poller = Poller::with_cache(client, poll_interval, cache)
        .context("Cannot start poller")?;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("Stopping... {:?}", poller.status());
    poller.stop();
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Soil probe CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    let (device, baud_rate, address, command) = match &args.connection {
        commandline::CliConnection::RtuScan { device, address } => {
            // 2. Handle RTU Scan command separately as it has a different workflow
            return handle_rtu_scan(device, *address, args.delay, args.timeout);
        }
        commandline::CliConnection::Rtu {
            device,
            baud_rate,
            address,
            command,
        } => (device, baud_rate, *address, command),
    };

    // 3. Setup the client
    info!("Attempting to connect via RTU to device {device} (Address: {address}, Baud: {baud_rate})...");
    let delay = check_rtu_delay(args.delay, baud_rate);
    let client = open_client(device, baud_rate, address, args.timeout)?;

    // 4. Execute the command
    match command {
        commandline::CliCommands::Daemon {
            poll_interval,
            output,
        } => {
            let poll_interval = delay.max(*poll_interval);
            info!("Starting daemon mode: output={output:?}, interval={poll_interval:?}");

            let running = Arc::new(AtomicBool::new(true));
            let r = running.clone();
            ctrlc::set_handler(move || {
                r.store(false, Ordering::SeqCst);
                trace!("Received Ctrl-C")
            })
            .context("Error setting Ctrl-C handler")?;

            match output {
                commandline::DaemonOutput::Console => {
                    run_console_daemon(client, poll_interval, &running)?;
                }
                commandline::DaemonOutput::Mqtt { config_file } => {
                    mqtt::run_daemon(client, poll_interval, config_file, &running)?;
                }
            }
        }
        commandline::CliCommands::Read => {
            info!("Executing: Read");
            let reading = client
                .read_all()
                .with_context(|| format!("Cannot read soil probe {address}"))?;
            print_reading(&reading);
        }
        commandline::CliCommands::ReadField { field } => {
            info!("Executing: Read {field}");
            match client.read_field(*field) {
                Some(value) => println!("{value} {}", field.unit()),
                None => bail!("Cannot read {field} from soil probe {address}"),
            }
        }
    }

    Ok(())
}
