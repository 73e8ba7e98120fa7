//! Soil sensor monitor CLI
//!
//! A command-line interface (CLI) application for reading RS485 soil sensors
//! that report nitrogen, phosphorus and potassium content, electrical
//! conductivity and pH.
//!
//! This tool allows users to:
//! - Read all values, one register group or a single value, once or repeatedly.
//! - List the serial ports of the machine and see which one auto-discovery picks.
//! - Run in a continuous daemon mode and either print readings to the console
//!   or publish them to an MQTT broker.
//!
//! The CLI leverages the `soil_npk_lib` crate for the protocol and the serial session.

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use soil_npk_lib::{
    protocol as proto, serial_common, sync_client::SoilSensor, transport::SessionConfig,
};
use std::{fmt, panic};

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

/// Prints `value` or "N/A" when the read failed; the error goes to the log.
fn show<T: fmt::Display>(label: &str, value: soil_npk_lib::Result<T>, unit: &str) {
    match value {
        Ok(value) => println!("{label}: {value}{unit}"),
        Err(error) => {
            warn!("Cannot read {label}: {error}");
            println!("{label}: N/A");
        }
    }
}

fn measure_and_display(sensor: &mut SoilSensor, mode: commandline::ReadMode) {
    use commandline::ReadMode;
    match mode {
        ReadMode::All => {
            println!("===== Soil sensor =====");
            println!("{}", sensor.read_all());
        }
        ReadMode::Npk => match sensor.read_npk() {
            Ok(npk) => println!("{npk}"),
            Err(error) => {
                warn!("Cannot read NPK: {error}");
                println!("N=N/A, P=N/A, K=N/A");
            }
        },
        ReadMode::EcPh => match sensor.read_ec_ph() {
            Ok(ec_ph) => println!("{ec_ph}"),
            Err(error) => {
                warn!("Cannot read EC/pH: {error}");
                println!("EC=N/A, pH=N/A");
            }
        },
        ReadMode::N => show("Nitrogen (N)", sensor.read_nitrogen(), " mg/kg"),
        ReadMode::P => show("Phosphorus (P)", sensor.read_phosphorus(), " mg/kg"),
        ReadMode::K => show("Potassium (K)", sensor.read_potassium(), " mg/kg"),
        ReadMode::Ec => show("Conductivity (EC)", sensor.read_ec(), " µS/cm"),
        ReadMode::Ph => show(
            "pH",
            sensor.read_ph().map(|ph| format!("{ph:.1}")),
            "",
        ),
    }
}

fn handle_list_ports() -> Result<()> {
    let names = serial_common::list_ports().context("Cannot enumerate serial ports")?;
    let selected = serial_common::select_port(
        names.iter().map(String::as_str),
        serial_common::PORT_PREFIXES,
    );
    if names.is_empty() {
        println!("No serial ports found.");
    }
    for name in &names {
        let marker = if selected.as_deref() == Some(name.as_str()) {
            " (auto-discovery)"
        } else {
            ""
        };
        println!("{name}{marker}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Soil sensor CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Listing ports needs no connection
    if args.command == commandline::CliCommands::ListPorts {
        return handle_list_ports();
    }

    // 3. Connect
    let config = SessionConfig {
        device_id: args.device_id,
        baud_rate: args.baud_rate,
        timeout: args.timeout,
        settle: args.settle,
        crc_check: args.crc_check(),
    };
    if config.crc_check == proto::CrcCheck::Relaxed {
        warn!("CRC verification of responses is disabled");
    }
    let mut sensor = SoilSensor::connect(args.port.as_deref(), config).with_context(|| {
        format!(
            "Cannot connect to the sensor on {}",
            args.port.as_deref().unwrap_or("an auto-discovered port")
        )
    })?;

    // 4. Execute the command
    match &args.command {
        commandline::CliCommands::Read {
            mode,
            count,
            interval,
        } => {
            info!("Executing: Read {mode:?} (count={count}, interval={interval:?})");
            let mut done = 0;
            while *count == 0 || done < *count {
                measure_and_display(&mut sensor, *mode);
                done += 1;
                if *count == 0 || done < *count {
                    std::thread::sleep(*interval);
                }
            }
        }
        commandline::CliCommands::Daemon {
            poll_interval,
            output,
        } => {
            info!("Starting daemon mode: output={output:?}, interval={poll_interval:?}");
            match output {
                commandline::DaemonOutput::Console => loop {
                    debug!("Daemon: Reading values for stdout...");
                    println!("{}", sensor.read_all());
                    std::thread::sleep(*poll_interval);
                },
                commandline::DaemonOutput::Mqtt { config_file } => {
                    mqtt::run_daemon(&mut sensor, poll_interval, config_file)?;
                }
            }
        }
        commandline::CliCommands::ListPorts => unreachable!("ListPorts is handled earlier."),
    }

    sensor.close();
    Ok(())
}
