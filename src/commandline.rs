use crate::mqtt::MqttConfig;
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use soil_npk_lib::protocol as proto;
use std::time::Duration;

fn parse_device_id(s: &str) -> Result<proto::DeviceId, String> {
    let id = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid device id format: {e}"))?;
    Ok(proto::DeviceId::from(id))
}

fn parse_baud_rate(s: &str) -> Result<proto::BaudRate, String> {
    let rate_val = s
        .parse::<u32>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    proto::BaudRate::try_from(rate_val).map_err(|e| e.to_string())
}

/// Which values a `read` command fetches.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Nitrogen, phosphorus, potassium, conductivity and pH (two exchanges).
    All,
    /// Nitrogen, phosphorus and potassium in one exchange.
    Npk,
    /// Conductivity and pH in one exchange.
    EcPh,
    /// Nitrogen only.
    N,
    /// Phosphorus only.
    P,
    /// Potassium only.
    K,
    /// Electrical conductivity only.
    Ec,
    /// pH only.
    Ph,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously read all values and print them to the standard output (console).
    Console,
    /// Continuously read all values and publish them to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Read and display sensor values.
    /// A value that cannot be read is shown as "N/A"; the remaining values are still read.
    #[clap(verbatim_doc_comment)]
    Read {
        /// The values to read.
        #[arg(value_enum, default_value_t = ReadMode::All)]
        mode: ReadMode,

        /// Number of measurements, `0` repeats until interrupted.
        #[arg(short, long, default_value_t = 1)]
        count: u32,

        /// Pause between two measurements (e.g., "5s", "1m").
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "5s")]
        interval: Duration,
    },

    /// List the serial ports of this machine and mark the one auto-discovery would pick.
    ListPorts,

    /// Run in daemon mode: continuously poll all values at a specified interval.
    /// Output can be directed to stdout or an MQTT broker.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval for fetching values (e.g., "10s", "1m")
        #[arg(value_parser = humantime::parse_duration, short = 'i', long, default_value = "5s", verbatim_doc_comment)]
        poll_interval: Duration,

        /// Specifies the output.
        #[command(subcommand)]
        output: DaemonOutput,
    },
}

const fn about_text() -> &'static str {
    "Soil sensor monitor - Read nitrogen, phosphorus, potassium, conductivity and pH from RS485 soil sensors."
}

#[derive(Parser, Debug)]
#[command(name="soilmon", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Serial port device name.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    /// When omitted the first USB/UART serial port found is used.
    #[arg(global = true, short, long, verbatim_doc_comment)]
    pub port: Option<String>,

    /// Baud rate for serial communication.
    /// Supported values: 1200, 2400, 4800, 9600, 19200.
    #[arg(global = true, short, long, default_value_t = proto::BaudRate::default(), value_parser = parse_baud_rate, verbatim_doc_comment)]
    pub baud_rate: proto::BaudRate,

    /// The Modbus RTU device address of the sensor.
    /// Can be specified in decimal or hexadecimal (e.g., "0x01").
    #[arg(global = true, short, long, default_value_t = proto::DeviceId::default(), value_parser = parse_device_id, verbatim_doc_comment)]
    pub device_id: proto::DeviceId,

    /// Timeout for a complete response.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "1s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Pause between sending a request and reading the response.
    /// The RS485 converter and the sensor need time to switch
    /// between transmitting (TX) and receiving (RX).
    #[arg(global = true, long, default_value = "50ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub settle: Duration,

    /// Accept responses with a wrong CRC checksum.
    /// Only useful for sensors with non-conforming firmware.
    #[arg(global = true, long, verbatim_doc_comment)]
    pub relaxed_crc: bool,

    #[command(subcommand)]
    pub command: CliCommands,
}

impl CliArgs {
    pub fn crc_check(&self) -> proto::CrcCheck {
        if self.relaxed_crc {
            proto::CrcCheck::Relaxed
        } else {
            proto::CrcCheck::Strict
        }
    }
}
