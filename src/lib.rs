//! A library for reading soil NPK / EC / pH sensors over RS485.
//!
//! The sensor answers a fixed set of Modbus RTU "read holding registers"
//! requests with nitrogen, phosphorus and potassium content (mg/kg),
//! electrical conductivity (µS/cm) and pH.
//!
//! The crate is layered:
//!
//! 1.  **Frame codec** ([`protocol`]): request frames, CRC-16, response
//!     validation and register decoding. Pure functions, no I/O.
//! 2.  **Transport session** ([`transport`]): owns the serial channel and runs
//!     each exchange as write, settle, read with a timeout. No retries.
//! 3.  **Clients**: [`sync_client::SoilSensor`] (blocking) and
//!     [`sync_safe_client::SafeClient`] (blocking, shareable between threads).
//!
//! ## Quick Start
//!
//! ```no_run
//! use soil_npk_lib::{
//!     protocol::Register,
//!     sync_client::SoilSensor,
//!     transport::SessionConfig,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut sensor = SoilSensor::connect(Some("/dev/ttyUSB0"), SessionConfig::default())?;
//!
//!     let nitrogen = sensor.read_register(Register::Nitrogen)?;
//!     println!("Nitrogen: {nitrogen}");
//!
//!     // A failed group does not hide the other one.
//!     println!("{}", sensor.read_all());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};

#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
#[cfg(feature = "serial")]
pub mod serial_common;

pub mod sync_client;

#[cfg_attr(docsrs, doc(cfg(feature = "safe-client-sync")))]
#[cfg(feature = "safe-client-sync")]
pub mod sync_safe_client;
