use ring_device::{NandFlashError, NandFlashErrorKind};
use thiserror::Error;

/// Errors the ring engine can return.
///
/// Not generic over the block device: every device error the ring engine
/// sees is retried locally (rescue, bad-block marking, retry-elsewhere) and
/// never surfaced to the caller, per the propagation policy documented on
/// [`crate::ring`]. There is consequently no variant that carries a device
/// error, and no conversion from [`NandFlashErrorKind`] to construct one.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RingError {
    #[error("invalid ring configuration")]
    InvalidConfig,
    #[error("fewer than len/2 good blocks on media")]
    NotEnoughValidBlocks,
    #[error("ring is out of space")]
    NoSpace,
    #[error("operation not valid in the current ring state")]
    WrongState,
    #[error("other error")]
    Other,
}

impl NandFlashError for RingError {
    fn kind(&self) -> NandFlashErrorKind {
        match self {
            RingError::InvalidConfig => NandFlashErrorKind::Other,
            RingError::NotEnoughValidBlocks => NandFlashErrorKind::Other,
            RingError::NoSpace => NandFlashErrorKind::Other,
            RingError::WrongState => NandFlashErrorKind::Other,
            RingError::Other => NandFlashErrorKind::Other,
        }
    }
}
