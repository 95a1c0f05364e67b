//! STM8 bootloader protocol: wire framing and the command engine.

pub mod bootloader;
pub mod frame;

// Re-export for convenience
pub use bootloader::Bootloader;
pub use frame::{Command, ACK, BUSY, NACK, SYNCH};
