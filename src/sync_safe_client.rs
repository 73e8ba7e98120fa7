//! Thread-safe blocking client for the soil sensor.
//!
//! [`SafeClient`] wraps a [`SoilSensor`] in an `Arc<Mutex<_>>`, so clones can
//! be handed to several threads. Every read holds the lock for the whole
//! write → settle → read sequence; exchanges of different callers never
//! interleave on the half-duplex bus.
//!
//! ## Example
//!
//! ```no_run
//! use soil_npk_lib::{
//!     sync_client::SoilSensor, sync_safe_client::SafeClient, transport::SessionConfig,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sensor = SoilSensor::connect(Some("/dev/ttyUSB0"), SessionConfig::default())?;
//!     let client = SafeClient::new(sensor);
//!
//!     let mut worker = client.clone();
//!     let handle = std::thread::spawn(move || worker.read_ph());
//!
//!     let mut client = client;
//!     println!("NPK: {}", client.read_npk()?);
//!     println!("pH: {:.1}", handle.join().unwrap()?);
//!     Ok(())
//! }
//! ```

use crate::{error::Result, protocol as proto, sync_client::SoilSensor, sync_client::SoilReport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Synchronous client that can be shared between threads.
#[derive(Debug, Clone)]
pub struct SafeClient {
    sensor: Arc<Mutex<SoilSensor>>,
}

impl SafeClient {
    /// Creates a new `SafeClient` owning `sensor`.
    pub fn new(sensor: SoilSensor) -> Self {
        Self {
            sensor: Arc::new(Mutex::new(sensor)),
        }
    }

    /// Creates a new `SafeClient` from a shared sensor.
    pub fn from_shared(sensor: Arc<Mutex<SoilSensor>>) -> Self {
        Self { sensor }
    }

    /// Clones the shared sensor.
    pub fn clone_shared(&self) -> Arc<Mutex<SoilSensor>> {
        self.sensor.clone()
    }

    // A panic while holding the lock leaves the sensor usable: the session
    // state is only changed by complete operations.
    fn lock(&self) -> MutexGuard<'_, SoilSensor> {
        self.sensor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected()
    }

    /// Closes the shared session for every clone.
    pub fn close(&mut self) {
        self.lock().close()
    }

    pub fn read_register(&mut self, register: proto::Register) -> Result<proto::Reading> {
        self.lock().read_register(register)
    }

    pub fn read_group(&mut self, group: proto::Group) -> Result<proto::GroupReading> {
        self.lock().read_group(group)
    }

    pub fn read_nitrogen(&mut self) -> Result<u16> {
        self.lock().read_nitrogen()
    }

    pub fn read_phosphorus(&mut self) -> Result<u16> {
        self.lock().read_phosphorus()
    }

    pub fn read_potassium(&mut self) -> Result<u16> {
        self.lock().read_potassium()
    }

    pub fn read_ec(&mut self) -> Result<u16> {
        self.lock().read_ec()
    }

    pub fn read_ph(&mut self) -> Result<f32> {
        self.lock().read_ph()
    }

    pub fn read_npk(&mut self) -> Result<proto::Npk> {
        self.lock().read_npk()
    }

    pub fn read_ec_ph(&mut self) -> Result<proto::EcPh> {
        self.lock().read_ec_ph()
    }

    /// Reads both groups while holding the lock once.
    pub fn read_all(&mut self) -> SoilReport {
        self.lock().read_all()
    }
}
