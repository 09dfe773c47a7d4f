//! Logging shim: re-exports whichever backend is enabled so the rest of the
//! crate can call `trace!`/`debug!`/`info!`/`warn!`/`error!` unconditionally.
#![allow(unused_macros, unused_imports)]

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("Only one of the `defmt` and `log` features may be enabled at a time");

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug, error, info, trace, warn};

#[cfg(feature = "log")]
pub(crate) use log::{debug, error, info, trace, warn};

#[cfg(not(any(feature = "defmt", feature = "log")))]
mod noop {
    macro_rules! trace {
        ($($x:tt)*) => {};
    }
    macro_rules! debug {
        ($($x:tt)*) => {};
    }
    macro_rules! info {
        ($($x:tt)*) => {};
    }
    macro_rules! warn {
        ($($x:tt)*) => {};
    }
    macro_rules! error {
        ($($x:tt)*) => {};
    }
    pub(crate) use {debug, error, info, trace, warn};
}

#[cfg(not(any(feature = "defmt", feature = "log")))]
pub(crate) use noop::{debug, error, info, trace, warn};
