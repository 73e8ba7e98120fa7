//! Serial line settings and port discovery for the RS485 adapter.
//!
//! The sensor always talks 8 data bits, no parity, one stop bit. Port
//! discovery is a name heuristic: it picks the first port that looks like a
//! USB or on-board UART adapter. It does not identify the sensor itself.
use crate::protocol as proto;
use crate::transport::TransportError;

/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Port name prefixes considered by [`auto_discover`] on this platform.
#[cfg(target_os = "windows")]
pub const PORT_PREFIXES: &[&str] = &["COM"];
/// Port name prefixes considered by [`auto_discover`] on this platform.
#[cfg(not(target_os = "windows"))]
pub const PORT_PREFIXES: &[&str] = &["ttyUSB", "ttyAMA", "ttyS"];

/// Creates a `tokio_serial::SerialPortBuilder` with the sensor's line settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate for the serial communication.
/// * `timeout` - The read timeout of the opened port.
pub fn serial_port_builder(
    device: &str,
    baud_rate: &proto::BaudRate,
    timeout: std::time::Duration,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, u32::from(*baud_rate))
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout)
}

/// Lists the names of all serial ports known to the operating system.
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    let ports = tokio_serial::available_ports().map_err(std::io::Error::from)?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

/// Returns the first name whose last path component starts with one of `prefixes`.
pub fn select_port<'a, I>(names: I, prefixes: &[&str]) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().find_map(|name| {
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        prefixes
            .iter()
            .any(|prefix| file_name.starts_with(prefix))
            .then(|| name.to_string())
    })
}

/// Picks the first available port matching [`PORT_PREFIXES`].
///
/// This is a best-effort guess: any adapter with a matching name is chosen,
/// whether or not the sensor is attached to it.
pub fn auto_discover() -> Result<String, TransportError> {
    let names = list_ports()?;
    log::debug!("Available serial ports: {names:?}");
    select_port(names.iter().map(String::as_str), PORT_PREFIXES).ok_or(TransportError::NoPortFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_port_on_posix_names() {
        let names = ["/dev/ttyACM0", "/dev/ttyUSB1", "/dev/ttyS0"];
        assert_eq!(
            select_port(names, &["ttyUSB", "ttyAMA", "ttyS"]),
            Some("/dev/ttyUSB1".to_string())
        );
    }

    #[test]
    fn select_port_keeps_enumeration_order() {
        let names = ["/dev/ttyS0", "/dev/ttyUSB0"];
        assert_eq!(
            select_port(names, &["ttyUSB", "ttyS"]),
            Some("/dev/ttyS0".to_string())
        );
    }

    #[test]
    fn select_port_on_windows_names() {
        assert_eq!(
            select_port(["COM3", "LPT1"], &["COM"]),
            Some("COM3".to_string())
        );
        assert_eq!(
            select_port([r"\\.\COM12"], &["COM"]),
            Some(r"\\.\COM12".to_string())
        );
    }

    #[test]
    fn select_port_without_match() {
        assert_eq!(select_port(["/dev/ttyACM0"], &["ttyUSB"]), None);
        assert_eq!(select_port([], &["ttyUSB"]), None);
    }
}
