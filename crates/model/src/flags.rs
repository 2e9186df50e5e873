//! The six communication-object flags, shared by [`crate::appprogram::ComObject`],
//! [`crate::appprogram::ComObjectRef`] and [`crate::types::ComObjectInstanceRef`].

use enumflags2::{bitflags, BitFlags};

/// One of the six KNX communication-object flags.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComObjectFlag {
    /// `ReadFlag`.
    Read,
    /// `WriteFlag`.
    Write,
    /// `CommunicationFlag`.
    Communicate,
    /// `TransmitFlag`.
    Transmit,
    /// `UpdateFlag`.
    Update,
    /// `ReadOnInitFlag`.
    ReadOnInit,
}

/// The flag set of a communication object or instance ref.
pub type ComObjectFlags = BitFlags<ComObjectFlag>;
