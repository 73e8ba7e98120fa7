//! Blocking client for the soil NPK / EC / pH sensor.
//!
//! [`SoilSensor`] turns register reads into typed values: it builds the
//! request frame, runs the exchange on its [`Session`] and validates and
//! decodes the response.
//!
//! ## Example
//!
//! ```no_run
//! use soil_npk_lib::{sync_client::SoilSensor, transport::SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Pick the first USB serial adapter and talk to device 1 at 9600 baud.
//!     let mut sensor = SoilSensor::connect(None, SessionConfig::default())?;
//!
//!     let npk = sensor.read_npk()?;
//!     println!("{npk}");
//!     println!("pH: {:.1}", sensor.read_ph()?);
//!
//!     sensor.close();
//!     Ok(())
//! }
//! ```
use crate::{
    error::{Error, Result},
    protocol as proto,
    transport::Session,
};
use std::fmt;
use std::time::Duration;

/// Synchronous client for the soil sensor.
///
/// All methods block the current thread for one request/response exchange
/// (two for [`SoilSensor::read_all`]).
#[derive(Debug)]
pub struct SoilSensor {
    session: Session,
    timeout: Option<Duration>,
}

impl SoilSensor {
    /// Creates a client on top of an (opened or not yet opened) session.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            timeout: None,
        }
    }

    /// Opens `port`, or the first auto-discovered port when `None`.
    #[cfg(feature = "serial")]
    pub fn connect(
        port: Option<&str>,
        config: crate::transport::SessionConfig,
    ) -> Result<Self> {
        let port = match port {
            Some(port) => port.to_string(),
            None => {
                let port = crate::serial_common::auto_discover()?;
                log::info!("Auto-discovered serial port {port}");
                port
            }
        };
        let mut session = Session::new(config);
        session.open(&port)?;
        Ok(Self::new(session))
    }

    /// Overrides the session's response timeout for subsequent reads.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// The effective response timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(self.session.config().timeout)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_open()
    }

    /// Closes the underlying session. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.session.close();
    }

    fn read_data(&mut self, register: proto::Register) -> Result<Vec<u8>> {
        let config = *self.session.config();
        let request = proto::build_request(config.device_id, register);
        let rsp = self
            .session
            .send_and_receive(&request, register.response_len(), self.timeout)?;
        let data = proto::parse_response(
            &rsp,
            config.device_id,
            register.byte_count(),
            config.crc_check,
        )?;
        Ok(data.to_vec())
    }

    fn read_u16(&mut self, register: proto::Register) -> Result<u16> {
        let data = self.read_data(register)?;
        Ok(proto::decode_u16_be(&data))
    }

    /// Reads a single register.
    ///
    /// Grouped registers fail with [`Error::GroupRegister`] without touching
    /// the bus; use [`SoilSensor::read_group`] for them.
    pub fn read_register(&mut self, register: proto::Register) -> Result<proto::Reading> {
        if register.is_group() {
            return Err(Error::GroupRegister(register));
        }
        let data = self.read_data(register)?;
        proto::Reading::decode_data(register, &data).ok_or(Error::GroupRegister(register))
    }

    /// Reads the nitrogen content in mg/kg.
    pub fn read_nitrogen(&mut self) -> Result<u16> {
        self.read_u16(proto::Register::Nitrogen)
    }

    /// Reads the phosphorus content in mg/kg.
    pub fn read_phosphorus(&mut self) -> Result<u16> {
        self.read_u16(proto::Register::Phosphorus)
    }

    /// Reads the potassium content in mg/kg.
    pub fn read_potassium(&mut self) -> Result<u16> {
        self.read_u16(proto::Register::Potassium)
    }

    /// Reads the electrical conductivity in µS/cm.
    pub fn read_ec(&mut self) -> Result<u16> {
        self.read_u16(proto::Register::ElectricalConductivity)
    }

    pub fn read_ph(&mut self) -> Result<f32> {
        Ok(proto::decode_ph(self.read_u16(proto::Register::Ph)?))
    }

    /// Reads a register group in one exchange.
    pub fn read_group(&mut self, group: proto::Group) -> Result<proto::GroupReading> {
        let data = self.read_data(group.register())?;
        Ok(proto::GroupReading::decode_data(group, &data))
    }

    pub fn read_npk(&mut self) -> Result<proto::Npk> {
        let data = self.read_data(proto::Npk::REGISTER)?;
        Ok(proto::Npk::decode_data(&data))
    }

    pub fn read_ec_ph(&mut self) -> Result<proto::EcPh> {
        let data = self.read_data(proto::EcPh::REGISTER)?;
        Ok(proto::EcPh::decode_data(&data))
    }

    /// Reads both groups. A failure of one group does not hide the other.
    pub fn read_all(&mut self) -> SoilReport {
        let npk = self.read_npk();
        if let Err(error) = &npk {
            log::warn!("Cannot read NPK: {error}");
        }
        let ec_ph = self.read_ec_ph();
        if let Err(error) = &ec_ph {
            log::warn!("Cannot read EC/pH: {error}");
        }
        SoilReport { npk, ec_ph }
    }
}

/// The outcome of [`SoilSensor::read_all`], one result per group.
#[derive(Debug)]
pub struct SoilReport {
    pub npk: Result<proto::Npk>,
    pub ec_ph: Result<proto::EcPh>,
}

impl SoilReport {
    pub fn nitrogen(&self) -> Option<u16> {
        self.npk.as_ref().ok().map(|npk| npk.nitrogen)
    }

    pub fn phosphorus(&self) -> Option<u16> {
        self.npk.as_ref().ok().map(|npk| npk.phosphorus)
    }

    pub fn potassium(&self) -> Option<u16> {
        self.npk.as_ref().ok().map(|npk| npk.potassium)
    }

    pub fn ec(&self) -> Option<u16> {
        self.ec_ph.as_ref().ok().map(|ec_ph| ec_ph.ec)
    }

    pub fn ph(&self) -> Option<f32> {
        self.ec_ph.as_ref().ok().map(|ec_ph| ec_ph.ph)
    }

    /// All fields that were read successfully, keyed by name.
    pub fn fields(&self) -> Vec<(&'static str, proto::Reading)> {
        let mut fields = Vec::new();
        if let Ok(npk) = &self.npk {
            fields.extend(proto::GroupReading::Npk(*npk).fields());
        }
        if let Ok(ec_ph) = &self.ec_ph {
            fields.extend(proto::GroupReading::EcPh(*ec_ph).fields());
        }
        fields
    }
}

struct OrNa<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for OrNa<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("N/A"),
        }
    }
}

impl fmt::Display for SoilReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Nitrogen (N): {} mg/kg", OrNa(self.nitrogen()))?;
        writeln!(f, "Phosphorus (P): {} mg/kg", OrNa(self.phosphorus()))?;
        writeln!(f, "Potassium (K): {} mg/kg", OrNa(self.potassium()))?;
        writeln!(f, "Conductivity (EC): {} µS/cm", OrNa(self.ec()))?;
        write!(f, "pH: {}", OrNa(self.ph().map(|ph| format!("{ph:.1}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::compute_crc16;
    use crate::transport::{tests::MockChannel, SessionConfig, TransportError};
    use assert_matches::assert_matches;

    fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
        let crc = compute_crc16(&frame);
        frame.extend_from_slice(&crc);
        frame
    }

    fn sensor(replies: Vec<Vec<u8>>) -> (SoilSensor, MockChannel) {
        let channel = MockChannel::with_replies(replies);
        let config = SessionConfig {
            timeout: Duration::from_millis(20),
            settle: Duration::from_millis(1),
            ..Default::default()
        };
        let mut session = Session::new(config);
        session.attach("mock", Box::new(channel.clone())).unwrap();
        (SoilSensor::new(session), channel)
    }

    #[test]
    fn read_nitrogen() {
        let (mut sensor, channel) = sensor(vec![vec![0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xAF]]);
        assert_eq!(sensor.read_nitrogen().unwrap(), 100);
        assert_eq!(
            channel.written.lock().unwrap().as_slice(),
            &[0x01, 0x03, 0x00, 0x1E, 0x00, 0x01, 0xE4, 0x0C]
        );
    }

    #[test]
    fn read_register_single_values() {
        let (mut sensor, _) = sensor(vec![
            with_crc(vec![0x01, 0x03, 0x02, 0x00, 0x44]),
            with_crc(vec![0x01, 0x03, 0x02, 0x01, 0x2C]),
        ]);
        assert_eq!(
            sensor.read_register(proto::Register::Ph).unwrap(),
            proto::Reading::Ph(6.8)
        );
        assert_eq!(
            sensor
                .read_register(proto::Register::ElectricalConductivity)
                .unwrap(),
            proto::Reading::ElectricalConductivity(300)
        );
    }

    #[test]
    fn read_register_rejects_groups() {
        let (mut sensor, channel) = sensor(vec![]);
        assert_matches!(
            sensor.read_register(proto::Register::Npk),
            Err(Error::GroupRegister(proto::Register::Npk))
        );
        assert!(channel.written.lock().unwrap().is_empty());
    }

    #[test]
    fn read_group_npk() {
        let (mut sensor, _) = sensor(vec![with_crc(vec![
            0x01, 0x03, 0x06, 0x00, 0x20, 0x00, 0x10, 0x00, 0x3C,
        ])]);
        let group = sensor.read_group(proto::Group::Npk).unwrap();
        assert_eq!(
            group,
            proto::GroupReading::Npk(proto::Npk {
                nitrogen: 32,
                phosphorus: 16,
                potassium: 60
            })
        );
    }

    #[test]
    fn rejected_response_is_an_error_not_a_value() {
        let (mut sensor, _) = sensor(vec![
            vec![0x02, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xAF],
            with_crc(vec![0x01, 0x04, 0x02, 0x00, 0x64]),
            vec![0x01, 0x03, 0x02, 0x00, 0x64, 0x00, 0x00],
        ]);
        assert_matches!(
            sensor.read_nitrogen(),
            Err(Error::Protocol(proto::Error::DeviceIdMismatch { .. }))
        );
        assert_matches!(
            sensor.read_nitrogen(),
            Err(Error::Protocol(proto::Error::FunctionCodeMismatch(0x04)))
        );
        assert_matches!(
            sensor.read_nitrogen(),
            Err(Error::Protocol(proto::Error::ChecksumMismatch { .. }))
        );
    }

    #[test]
    fn relaxed_crc_accepts_bad_checksum() {
        let channel =
            MockChannel::with_replies([vec![0x01, 0x03, 0x02, 0x00, 0x64, 0x00, 0x00]]);
        let config = SessionConfig {
            settle: Duration::from_millis(1),
            crc_check: proto::CrcCheck::Relaxed,
            ..Default::default()
        };
        let mut session = Session::new(config);
        session.attach("mock", Box::new(channel)).unwrap();
        let mut sensor = SoilSensor::new(session);
        assert_eq!(sensor.read_potassium().unwrap(), 100);
    }

    #[test]
    fn read_all_keeps_npk_when_ec_ph_fails() {
        let (mut sensor, _) = sensor(vec![with_crc(vec![
            0x01, 0x03, 0x06, 0x00, 0x20, 0x00, 0x10, 0x00, 0x3C,
        ])]);
        let report = sensor.read_all();
        assert_eq!(report.nitrogen(), Some(32));
        assert_eq!(report.potassium(), Some(60));
        assert_eq!(report.ph(), None);
        assert_matches!(
            &report.ec_ph,
            Err(Error::Transport(TransportError::Timeout { .. }))
        );
        assert_eq!(report.fields().len(), 3);
        assert_eq!(
            report.to_string(),
            "Nitrogen (N): 32 mg/kg\n\
             Phosphorus (P): 16 mg/kg\n\
             Potassium (K): 60 mg/kg\n\
             Conductivity (EC): N/A µS/cm\n\
             pH: N/A"
        );
    }

    #[test]
    fn read_all_ec_ph() {
        let (mut sensor, _) = sensor(vec![
            with_crc(vec![0x01, 0x03, 0x06, 0, 1, 0, 2, 0, 3]),
            with_crc(vec![0x01, 0x03, 0x08, 0, 0, 0, 0, 0x00, 0x64, 0x00, 0x4A]),
        ]);
        let report = sensor.read_all();
        assert_eq!(report.ec(), Some(100));
        assert_eq!(report.ph(), Some(7.4));
        assert_eq!(report.fields().len(), 5);
    }

    #[test]
    fn closed_sensor() {
        let (mut sensor, _) = sensor(vec![]);
        assert!(sensor.is_connected());
        sensor.close();
        sensor.close();
        assert!(!sensor.is_connected());
        assert_matches!(
            sensor.read_ph(),
            Err(Error::Transport(TransportError::NotOpen))
        );
    }

    #[test]
    fn timeout_override() {
        let (mut sensor, _) = sensor(vec![]);
        assert_eq!(sensor.timeout(), Duration::from_millis(20));
        sensor.set_timeout(Some(Duration::from_millis(5)));
        assert_eq!(sensor.timeout(), Duration::from_millis(5));
    }
}
