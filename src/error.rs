use alloc::borrow::Cow;
use core::fmt::{Debug, Display};

/// Error types used throughout the `pseudo_reloc` library.
///
/// None of these are recoverable at process startup: the runtime driver hands
/// them to [`crate::diag::fatal`]. They are still surfaced as values so that the
/// walker can be driven and inspected outside of a real startup sequence.
#[derive(Debug)]
pub enum Error {
    /// The table header carries a protocol version this crate does not know.
    UnknownVersion {
        /// The version word found in the header.
        version: u32,
    },

    /// A v2 record asks for a relocation width that is not supported on this
    /// target.
    UnknownBitSize {
        /// `flags & 0xff` of the offending record.
        bits: u32,
    },

    /// Querying or changing the protection of a memory region failed.
    ///
    /// The message carries the OS error code together with the address and
    /// size involved.
    Protect {
        /// A descriptive message about the protection failure.
        msg: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::UnknownVersion { version } => {
                write!(f, "Unknown pseudo relocation protocol version {version}.")
            }
            Error::UnknownBitSize { bits } => {
                write!(f, "Unknown pseudo relocation bit size {bits}.")
            }
            Error::Protect { msg } => write!(f, "Memory protection error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

/// Creates a protection error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn protect_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Protect { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn unknown_version(version: u32) -> Error {
    Error::UnknownVersion { version }
}

#[cold]
#[inline(never)]
pub(crate) fn unknown_bit_size(bits: u32) -> Error {
    Error::UnknownBitSize { bits }
}
