//! Error types shared across the debug engine.

use thiserror::Error;

/// A failure on the underlying debug transaction port.
///
/// These originate in the transport or Access Port layer and are not
/// recoverable by this engine; they are propagated as-is.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The target did not acknowledge a transaction.
    #[error("no acknowledge was received from the target")]
    NoAcknowledge,
    /// The target signalled a fault response during the transaction.
    #[error("the target signalled a fault during the transaction")]
    Fault,
    /// A parity or framing error was detected on the wire.
    #[error("a parity error occurred on the wire")]
    Parity,
    /// The backend that would carry this transaction is not compiled in.
    #[error("the requested transport backend is not available in this build")]
    BackendUnavailable,
    /// Any other transport specific error.
    #[error("transport error: {0}")]
    Other(String),
}

/// The error type returned by all fallible operations of the debug engine.
#[derive(Debug, Error)]
pub enum DebugError {
    /// An error occurred on the debug transaction port.
    #[error("an error occurred on the debug transaction port")]
    Link(#[from] LinkError),
    /// A polled status bit never reached the expected value within the
    /// configured bound. The core is unresponsive, locked up, or the write
    /// was discarded because of a missing key.
    #[error("a polled status bit did not reach the expected value in time")]
    ProtocolTimeout,
    /// The DCRSR/DCRDR register transfer handshake did not complete.
    #[error("the core register transfer handshake did not complete")]
    RegisterTimeout,
    /// Every hardware comparator slot is in use. An existing slot must be
    /// cleared before a new one can be set.
    #[error("all hardware comparator slots are in use")]
    NoFreeSlot,
    /// A sub-transfer of a decomposed memory access failed. Sub-transfers
    /// issued before the failing one are not rolled back.
    #[error("memory access failed at address {address:#010x}")]
    MemoryAccessFault {
        /// Address of the failing sub-transfer.
        address: u32,
        /// The underlying transaction failure.
        #[source]
        source: LinkError,
    },
    /// A system reset was requested but never observed in DHCSR.
    #[error("the system reset was requested but not observed")]
    ResetTimeout,
    /// The operation is only defined while the core is halted.
    #[error("the core must be halted for this operation")]
    NotHalted,
    /// Revision 1 of the FPB can only compare addresses in the code region.
    #[error("breakpoint address {0:#010x} is out of range for this FPB revision")]
    UnsupportedBreakpointAddress(u32),
    /// The FPB reports a comparator revision this engine does not know.
    #[error("FPB revision {0} is not supported")]
    UnsupportedFpbRevision(u8),
    /// The given comparator slot does not exist or holds nothing to clear.
    #[error("comparator slot {0} does not exist or is not in use")]
    InvalidSlot(usize),
    /// The DWT generation of this core cannot watch an access of the
    /// requested width.
    #[error("a {0}-byte watchpoint is not supported by this DWT generation")]
    UnsupportedWatchSize(u32),
}
