//! # stm8bsl
//!
//! A library for programming STM8 microcontrollers through the ROM UART
//! bootloader ("BSL").
//!
//! This crate provides the host side of the STM8 bootloader protocol over
//! an RS-232 or USB-serial link:
//!
//! - Serial transport with exact line-parameter control (baud, data bits,
//!   parity, stop bits, static RTS/DTR levels) and total-read-timeout
//!   semantics
//! - The framed, XOR-checksummed BSL command set (GET, READ, GO, WRITE,
//!   ERASE)
//! - A protocol engine that synchronizes to the target, deduces the flash
//!   density, and reads, writes, and erases device memory
//!
//! Hex-file decoding, the device-specific RAM helper routines, and the
//! "erase, program, verify, jump" orchestration are left to the embedding
//! application; the engine exposes the primitives those flows need.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stm8bsl::{Bootloader, PortSettings, SerialPort};
//!
//! fn main() -> stm8bsl::Result<()> {
//!     let settings = PortSettings::new(115_200);
//!     let port = SerialPort::open("/dev/ttyUSB0", &settings)?;
//!
//!     let mut bsl = Bootloader::new(port);
//!     bsl.sync()?;
//!     let device = bsl.get_info()?;
//!     println!("connected: {device}");
//!
//!     let mut fingerprint = [0u8; 16];
//!     bsl.mem_read(0x8000, &mut fingerprint)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error handling
//!
//! Every operation returns a typed [`Error`]; the engine never terminates
//! the process and never retries beyond the synchronization loop. After a
//! failed transaction the port stays open and the caller decides whether
//! to re-[`sync`](Bootloader::sync) or abandon the session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod port;
pub mod protocol;

// Re-exports for convenience
pub use {
    device::{DensityProbe, DeviceInfo, DENSITY_PROBES, FLASH_BASE, SECTOR_SIZE},
    error::{Error, Result},
    port::{
        list_ports, DataBits, Parity, Port, PortSettings, SerialPort, StopBits,
        SUPPORTED_BAUD_RATES,
    },
    protocol::{
        frame::{checksum, encode_addr, encode_len, Command, ACK, BUSY, NACK, SYNCH},
        Bootloader,
    },
};
