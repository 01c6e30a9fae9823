use crate::mqtt::MqttConfig;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use soilprobe_lib::protocol as proto;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_address(s: &str) -> Result<proto::Address, String> {
    let address_val =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid address format: {e}"))?;
    proto::Address::try_from(address_val).map_err(|e| e.to_string())
}

fn parse_baud_rate(s: &str) -> Result<proto::BaudRate, String> {
    let rate_val = s
        .parse::<u16>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    proto::BaudRate::try_from(rate_val).map_err(|e| e.to_string())
}

fn parse_field(s: &str) -> Result<proto::Field, String> {
    s.parse::<proto::Field>().map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliConnection {
    /// Connect to a soil probe on an RS485 serial bus.
    Rtu {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
        #[arg(short, long, default_value_t = default_device_name(), verbatim_doc_comment)]
        device: String,

        /// Baud rate for serial communication.
        /// Supported values: 2400, 4800, 9600.
        #[arg(long, default_value_t = proto::BaudRate::default(), value_parser = parse_baud_rate, verbatim_doc_comment)]
        baud_rate: proto::BaudRate,

        /// The RS485 address of the probe (1 to 247).
        /// Can be specified in decimal or hexadecimal (e.g., "0x01").
        #[arg(short, long, default_value_t = proto::Address::default(), value_parser = parse_address, verbatim_doc_comment)]
        address: proto::Address,

        /// Commands for the connected probe.
        #[command(subcommand)]
        command: CliCommands,
    },
    /// Search for a probe by trying all supported baud rates.
    /// **Warning:** Only the probe should be connected to the bus segment
    /// being scanned.
    #[clap(verbatim_doc_comment)]
    RtuScan {
        /// Serial port device name to scan.
        #[arg(short, long, default_value_t = default_device_name())]
        device: String,

        /// The RS485 address to query.
        #[arg(short, long, default_value_t = proto::Address::default(), value_parser = parse_address)]
        address: proto::Address,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Print every new reading to the standard output (console).
    Console,
    /// Publish readings and poll status to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run in daemon mode: poll the probe at a fixed interval.
    /// A failed poll keeps the last good reading; polling goes on.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval between two polls (e.g., "5s", "1m")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "5s")]
        poll_interval: Duration,

        /// Specifies the output.
        #[command(subcommand)]
        output: DaemonOutput,
    },

    /// Read and display all soil values.
    Read,

    /// Read and display a single soil value.
    ReadField {
        /// One of: moisture, temperature, ph, nitrogen, phosphorus, potassium.
        #[arg(value_parser = parse_field)]
        field: proto::Field,
    },
}

const fn about_text() -> &'static str {
    "Soil probe CLI - Read the RS485 7-in-1 soil probe (moisture, temperature, pH, NPK)."
}

#[derive(Parser, Debug)]
#[command(name="soilprobe", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warn.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Specifies the connection and probe commands.
    #[command(subcommand)]
    pub connection: CliConnection,

    /// Time the probe gets to answer a request.
    /// Examples: "100ms", "1s".
    #[arg(global = true, long, default_value = "100ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Minimum delay between two requests on the bus.
    /// USB-to-RS485 converters need time to switch between transmitting (TX)
    /// and receiving (RX).
    /// Examples: "50ms", "100ms".
    #[arg(global = true, long, default_value = "50ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parse_read_field() {
        let args =
            CliArgs::try_parse_from(["soilprobe", "rtu", "-a", "0x02", "read-field", "hum"])
                .unwrap();
        assert_eq!(args.timeout, Duration::from_millis(100));
        assert_eq!(
            args.connection,
            CliConnection::Rtu {
                device: default_device_name(),
                baud_rate: proto::BaudRate::B9600,
                address: proto::Address::try_from(2).unwrap(),
                command: CliCommands::ReadField {
                    field: proto::Field::Moisture
                },
            }
        );
    }

    #[test]
    fn parse_daemon() {
        let args = CliArgs::try_parse_from([
            "soilprobe",
            "--timeout",
            "250ms",
            "rtu",
            "--baud-rate",
            "4800",
            "daemon",
            "-p",
            "1m",
            "mqtt",
        ])
        .unwrap();
        assert_eq!(args.timeout, Duration::from_millis(250));
        let CliConnection::Rtu {
            baud_rate, command, ..
        } = args.connection
        else {
            panic!("expected rtu connection");
        };
        assert_eq!(baud_rate, proto::BaudRate::B4800);
        assert_eq!(
            command,
            CliCommands::Daemon {
                poll_interval: Duration::from_secs(60),
                output: DaemonOutput::Mqtt {
                    config_file: MqttConfig::DEFAULT_CONFIG_FILE.to_string()
                },
            }
        );
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(CliArgs::try_parse_from(["soilprobe", "rtu", "-a", "0", "read"]).is_err());
        assert!(
            CliArgs::try_parse_from(["soilprobe", "rtu", "--baud-rate", "19200", "read"]).is_err()
        );
        assert!(CliArgs::try_parse_from(["soilprobe", "rtu", "read-field", "salinity"]).is_err());
    }
}
