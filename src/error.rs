//! Errors returned by the sensor clients.
use crate::{protocol as proto, transport::TransportError};

/// Represents all possible errors of a sensor read.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The response arrived but failed validation.
    #[error(transparent)]
    Protocol(#[from] proto::Error),

    /// The exchange with the device failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A grouped register was passed where a single register is expected.
    #[error("Register {0} is a group, read it with read_group")]
    GroupRegister(proto::Register),
}

/// The result type for sensor operations.
pub type Result<T> = std::result::Result<T, Error>;
