//! Frame codec for the soil NPK / EC / pH sensor.
//!
//! The sensor speaks a small subset of Modbus RTU: every exchange is a single
//! "read holding registers" (function code `0x03`) request answered by a
//! fixed-shape response. This module builds the request frames, computes the
//! CRC-16 checksum and validates and decodes response frames. It performs no
//! I/O; see [`crate::transport`] for the serial side.
//!
//! Request frame (8 bytes):
//!
//! ```text
//! [device id][0x03][addr hi][addr lo][count hi][count lo][crc lo][crc hi]
//! ```
//!
//! Response frame (`5 + byte count` bytes):
//!
//! ```text
//! [device id][0x03][byte count][data ...][crc lo][crc hi]
//! ```

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The only function code this device profile uses: read holding registers.
pub const FUNCTION_CODE_READ_HOLDING: u8 = 0x03;
/// Length of every request frame in bytes.
pub const REQUEST_FRAME_LEN: usize = 8;
/// Bytes surrounding the data block of a response: id, function, count and CRC.
pub const RESPONSE_OVERHEAD: usize = 5;

const MODBUS_CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// Errors raised while validating a response frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Response too short: expected at least {expected} bytes, received {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Device id mismatch: expected {expected}, received {actual}")]
    DeviceIdMismatch { expected: u8, actual: u8 },
    #[error("Function code mismatch: expected 0x03, received {0:#04x}")]
    FunctionCodeMismatch(u8),
    #[error("Byte count mismatch: expected {expected}, received {actual}")]
    ByteCountMismatch { expected: u8, actual: u8 },
    #[error("Checksum mismatch: calculated {calculated:02X?}, received {received:02X?}")]
    ChecksumMismatch {
        calculated: [u8; 2],
        received: [u8; 2],
    },
}

/// The Modbus address of the sensor on the RS485 bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceId(u8);

impl DeviceId {
    /// Factory default address of the sensor.
    pub const DEFAULT: DeviceId = DeviceId(0x01);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::ops::Deref for DeviceId {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u8> for DeviceId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Whether the CRC of a response is verified before its data is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CrcCheck {
    /// Reject responses whose trailing CRC does not match.
    #[default]
    Strict,
    /// Only check id, function code, byte count and length.
    Relaxed,
}

/// Baud rates supported by the sensor. The line is always 8N1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BaudRate {
    B1200,
    B2400,
    B4800,
    #[default]
    B9600,
    B19200,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported baud rate {0}, expected one of 1200, 2400, 4800, 9600, 19200")]
pub struct UnsupportedBaudRate(pub u32);

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> u32 {
        match baud_rate {
            BaudRate::B1200 => 1200,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = UnsupportedBaudRate;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1200 => Ok(BaudRate::B1200),
            2400 => Ok(BaudRate::B2400),
            4800 => Ok(BaudRate::B4800),
            9600 => Ok(BaudRate::B9600),
            19200 => Ok(BaudRate::B19200),
            _ => Err(UnsupportedBaudRate(value)),
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// Address, quantity and function code of a register read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub function_code: u8,
    pub address: u16,
    pub quantity: u16,
}

/// The registers (and register groups) exposed by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Register {
    /// Nitrogen content in mg/kg.
    Nitrogen,
    /// Phosphorus content in mg/kg.
    Phosphorus,
    /// Potassium content in mg/kg.
    Potassium,
    /// Electrical conductivity in µS/cm.
    ElectricalConductivity,
    /// pH, transmitted multiplied by ten.
    Ph,
    /// Nitrogen, phosphorus and potassium in one read.
    Npk,
    /// Humidity, temperature, conductivity and pH in one read.
    EcPh,
}

impl Register {
    /// Registers that hold a single value.
    pub const SINGLES: [Register; 5] = [
        Register::Nitrogen,
        Register::Phosphorus,
        Register::Potassium,
        Register::ElectricalConductivity,
        Register::Ph,
    ];

    pub const fn spec(&self) -> RegisterSpec {
        let (address, quantity) = match self {
            Register::Nitrogen => (0x001E, 1),
            Register::Phosphorus => (0x001F, 1),
            Register::Potassium => (0x0020, 1),
            Register::ElectricalConductivity => (0x0002, 1),
            Register::Ph => (0x0003, 1),
            Register::Npk => (0x001E, 3),
            Register::EcPh => (0x0000, 4),
        };
        RegisterSpec {
            function_code: FUNCTION_CODE_READ_HOLDING,
            address,
            quantity,
        }
    }

    /// Number of data bytes the device returns for this register.
    pub const fn byte_count(&self) -> u8 {
        (self.spec().quantity * 2) as u8
    }

    /// Total length of the response frame for this register.
    pub const fn response_len(&self) -> usize {
        RESPONSE_OVERHEAD + self.byte_count() as usize
    }

    pub const fn is_group(&self) -> bool {
        matches!(self, Register::Npk | Register::EcPh)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::Nitrogen => "nitrogen",
            Register::Phosphorus => "phosphorus",
            Register::Potassium => "potassium",
            Register::ElectricalConductivity => "ec",
            Register::Ph => "ph",
            Register::Npk => "npk",
            Register::EcPh => "ec_ph",
        };
        f.write_str(name)
    }
}

/// Computes the Modbus CRC-16 of `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    MODBUS_CRC.checksum(bytes)
}

/// Computes the Modbus CRC-16 of `bytes` in wire order (low byte first).
pub fn compute_crc16(bytes: &[u8]) -> [u8; 2] {
    crc16(bytes).to_le_bytes()
}

/// An encoded request frame, ready to be written to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame([u8; REQUEST_FRAME_LEN]);

impl RequestFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for RequestFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

/// Builds the request frame reading `register` from the device at `device_id`.
pub fn build_request(device_id: DeviceId, register: Register) -> RequestFrame {
    let spec = register.spec();
    let mut frame = [0u8; REQUEST_FRAME_LEN];
    frame[0] = *device_id;
    frame[1] = spec.function_code;
    frame[2..4].copy_from_slice(&spec.address.to_be_bytes());
    frame[4..6].copy_from_slice(&spec.quantity.to_be_bytes());
    let crc = compute_crc16(&frame[..6]);
    frame[6..8].copy_from_slice(&crc);
    RequestFrame(frame)
}

/// Validates a response frame and returns its data block.
///
/// The returned slice is exactly `expected_byte_count` bytes long. Trailing
/// bytes beyond the frame are ignored.
pub fn parse_response(
    bytes: &[u8],
    expected_device_id: DeviceId,
    expected_byte_count: u8,
    crc_check: CrcCheck,
) -> Result<&[u8], Error> {
    let frame_len = RESPONSE_OVERHEAD + expected_byte_count as usize;
    if bytes.len() < frame_len {
        return Err(Error::TooShort {
            expected: frame_len,
            actual: bytes.len(),
        });
    }
    if bytes[0] != *expected_device_id {
        return Err(Error::DeviceIdMismatch {
            expected: *expected_device_id,
            actual: bytes[0],
        });
    }
    if bytes[1] != FUNCTION_CODE_READ_HOLDING {
        return Err(Error::FunctionCodeMismatch(bytes[1]));
    }
    if bytes[2] != expected_byte_count {
        return Err(Error::ByteCountMismatch {
            expected: expected_byte_count,
            actual: bytes[2],
        });
    }
    if crc_check == CrcCheck::Strict {
        let calculated = compute_crc16(&bytes[..frame_len - 2]);
        let received = [bytes[frame_len - 2], bytes[frame_len - 1]];
        if calculated != received {
            return Err(Error::ChecksumMismatch {
                calculated,
                received,
            });
        }
    }
    Ok(&bytes[3..3 + expected_byte_count as usize])
}

/// Decodes a big-endian `u16` from the first two bytes of `slice`.
///
/// # Panics
///
/// Panics if `slice` holds fewer than two bytes. Callers pass slices of data
/// blocks that [`parse_response`] already sized.
pub fn decode_u16_be(slice: &[u8]) -> u16 {
    u16::from_be_bytes([slice[0], slice[1]])
}

/// Scales a raw pH register value; the device transmits pH × 10.
pub fn decode_ph(raw: u16) -> f32 {
    raw as f32 / 10.0
}

/// A decoded single-register measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Reading {
    Nitrogen(u16),
    Phosphorus(u16),
    Potassium(u16),
    ElectricalConductivity(u16),
    Ph(f32),
}

impl Reading {
    /// Decodes the data block of a single-register response.
    ///
    /// Returns `None` for the grouped registers, which carry several values.
    ///
    /// # Panics
    ///
    /// Panics if `data` holds fewer than two bytes.
    pub fn decode_data(register: Register, data: &[u8]) -> Option<Self> {
        let raw = decode_u16_be(&data[0..2]);
        Some(match register {
            Register::Nitrogen => Reading::Nitrogen(raw),
            Register::Phosphorus => Reading::Phosphorus(raw),
            Register::Potassium => Reading::Potassium(raw),
            Register::ElectricalConductivity => Reading::ElectricalConductivity(raw),
            Register::Ph => Reading::Ph(decode_ph(raw)),
            Register::Npk | Register::EcPh => return None,
        })
    }

    /// Unit of the value, empty for pH.
    pub fn unit(&self) -> &'static str {
        match self {
            Reading::Nitrogen(_) | Reading::Phosphorus(_) | Reading::Potassium(_) => "mg/kg",
            Reading::ElectricalConductivity(_) => "µS/cm",
            Reading::Ph(_) => "",
        }
    }

    /// The value as a float, for consumers that treat all fields alike.
    pub fn value(&self) -> f32 {
        match *self {
            Reading::Nitrogen(v)
            | Reading::Phosphorus(v)
            | Reading::Potassium(v)
            | Reading::ElectricalConductivity(v) => v as f32,
            Reading::Ph(v) => v,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Ph(v) => write!(f, "{v:.1}"),
            other => write!(f, "{} {}", other.value(), other.unit()),
        }
    }
}

/// Nitrogen, phosphorus and potassium content in mg/kg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Npk {
    pub nitrogen: u16,
    pub phosphorus: u16,
    pub potassium: u16,
}

impl Npk {
    pub const REGISTER: Register = Register::Npk;

    /// Decodes the grouped block: nitrogen, phosphorus and potassium in order.
    ///
    /// # Panics
    ///
    /// Panics if `data` holds fewer than six bytes.
    pub fn decode_data(data: &[u8]) -> Self {
        Self {
            nitrogen: decode_u16_be(&data[0..2]),
            phosphorus: decode_u16_be(&data[2..4]),
            potassium: decode_u16_be(&data[4..6]),
        }
    }
}

impl fmt::Display for Npk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N={} mg/kg, P={} mg/kg, K={} mg/kg",
            self.nitrogen, self.phosphorus, self.potassium
        )
    }
}

/// Electrical conductivity (µS/cm) and pH.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EcPh {
    pub ec: u16,
    pub ph: f32,
}

impl EcPh {
    pub const REGISTER: Register = Register::EcPh;

    /// Decodes the grouped block. Humidity (offset 0) and temperature
    /// (offset 2) are present on the wire but not part of this profile.
    ///
    /// # Panics
    ///
    /// Panics if `data` holds fewer than eight bytes.
    pub fn decode_data(data: &[u8]) -> Self {
        Self {
            ec: decode_u16_be(&data[4..6]),
            ph: decode_ph(decode_u16_be(&data[6..8])),
        }
    }
}

impl fmt::Display for EcPh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EC={} µS/cm, pH={:.1}", self.ec, self.ph)
    }
}

/// The grouped registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Group {
    Npk,
    EcPh,
}

impl Group {
    pub const fn register(&self) -> Register {
        match self {
            Group::Npk => Register::Npk,
            Group::EcPh => Register::EcPh,
        }
    }
}

/// A decoded grouped read.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GroupReading {
    Npk(Npk),
    EcPh(EcPh),
}

impl GroupReading {
    /// # Panics
    ///
    /// Panics if `data` is shorter than the group's
    /// [`Register::byte_count`].
    pub fn decode_data(group: Group, data: &[u8]) -> Self {
        match group {
            Group::Npk => GroupReading::Npk(Npk::decode_data(data)),
            Group::EcPh => GroupReading::EcPh(EcPh::decode_data(data)),
        }
    }

    /// The values of the group keyed by field name.
    pub fn fields(&self) -> Vec<(&'static str, Reading)> {
        match *self {
            GroupReading::Npk(npk) => vec![
                ("nitrogen", Reading::Nitrogen(npk.nitrogen)),
                ("phosphorus", Reading::Phosphorus(npk.phosphorus)),
                ("potassium", Reading::Potassium(npk.potassium)),
            ],
            GroupReading::EcPh(ec_ph) => vec![
                ("ec", Reading::ElectricalConductivity(ec_ph.ec)),
                ("ph", Reading::Ph(ec_ph.ph)),
            ],
        }
    }
}

/// Formats bytes as space separated upper case hex.
pub(crate) fn write_hex(f: &mut impl fmt::Write, bytes: &[u8]) -> fmt::Result {
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            f.write_char(' ')?;
        }
        write!(f, "{byte:02X}")?;
    }
    Ok(())
}
