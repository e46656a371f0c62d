//! Our error types for the XY PSU poller.

use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Custom error type for Sinilink XY PSU communications.
///
/// None of these are fatal to the driver, it keeps servicing on the next tick.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error")]
    SerialError(I),
    #[error("Frame encoding error: {0}")]
    Codec(#[from] CodecError),
    #[error("Invalid range")]
    InvalidRange,
    /// A prepared frame is still waiting for its transmit opportunity.
    #[error("Transmit slot occupied")]
    TransmitSlotBusy,
    /// A preset read is already in progress.
    #[error("Preset request already pending")]
    PresetBusy,
}
