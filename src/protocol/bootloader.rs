//! STM8 ROM bootloader protocol engine.
//!
//! Each public operation is one complete, ACK-gated transaction following
//! the pattern command frame -> ACK -> address frame -> ACK -> payload or
//! data -> ACK. An unexpected byte or a timeout aborts the transaction and
//! surfaces as a typed error; the port stays open but the protocol state of
//! the target is then unknown, and it is up to the caller to [`sync`]
//! again or give up. There is no in-flight recovery: on a half-duplex
//! two-wire link a silent retry can desynchronize both peers without
//! either side noticing.
//!
//! [`sync`]: Bootloader::sync

use std::io::{self, Write as _};
use std::thread;
use std::time::Duration;

use log::{debug, info, trace};

use crate::device::{
    sector_for_addr, DeviceInfo, BSL_OPTION_ADDR, BSL_OPTION_BYTES, DENSITY_PROBES,
};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::{
    encode_addr, encode_len, erase_frame, write_frame, Command, ACK, GET_RESPONSE_LEN,
    MAX_READ_CHUNK, MAX_WRITE_CHUNK, NACK, SYNCH,
};

/// Number of synchronization rounds before giving up.
const SYNC_ATTEMPTS: usize = 15;

/// Settle time between synchronization rounds, absorbing target-side
/// processing delay.
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Settle time after flushing the port in `get_info`.
const IDENTIFY_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Shortened read timeout while probing flash densities, so that negative
/// probes fail quickly.
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Read progress is reported every this many bytes.
const READ_PROGRESS_STEP: usize = 2048;

/// Write progress is reported every this many bytes.
const WRITE_PROGRESS_STEP: usize = 1024;

/// Command codes echoed back in a GET response, in wire order.
const GET_COMMAND_ECHOES: [Command; 5] = [
    Command::Get,
    Command::Read,
    Command::Go,
    Command::Write,
    Command::Erase,
];

/// Driver for a target running the STM8 ROM bootloader.
///
/// Generic over the port type `P` so the engine can be exercised against
/// an in-memory port as well as a real serial line.
///
/// The target must already be in bootloader mode, and [`Bootloader::sync`]
/// must be the first operation on the wire: the ROM deduces the host baud
/// rate from the first synchronization byte it sees.
pub struct Bootloader<P: Port> {
    port: P,
    verbose: bool,
}

impl<P: Port> Bootloader<P> {
    /// Create an engine for an already-opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            verbose: false,
        }
    }

    /// Print transfer progress to stdout.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the engine and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Synchronize the target's baud-rate detection and confirm it listens.
    ///
    /// Sends the synchronization byte up to 15 times and accepts either ACK
    /// or NACK as a reply (NACK means the target was already synchronized).
    /// Any spurious bytes from earlier traffic are discarded first.
    pub fn sync(&mut self) -> Result<()> {
        self.port.clear_buffers()?;

        let mut buf = [0u8; 1];
        let mut last = None;

        for attempt in 1..=SYNC_ATTEMPTS {
            let sent = self.port.send(&[SYNCH])?;
            if sent != 1 {
                return Err(Error::SendShort { expected: 1, sent });
            }

            let got = self.port.receive(&mut buf)?;
            last = (got == 1).then(|| buf[0]);

            match last {
                Some(ACK) => {
                    info!("synchronized (ACK)");
                    return Ok(());
                }
                Some(NACK) => {
                    info!("synchronized (NACK, target was already in sync)");
                    return Ok(());
                }
                Some(other) => {
                    trace!("sync attempt {attempt}: unexpected reply {other:#04x}");
                }
                None => {
                    trace!("sync attempt {attempt}: no reply");
                }
            }

            thread::sleep(SYNC_RETRY_DELAY);
        }

        Err(Error::SyncFailed { last })
    }

    /// Identify the connected device: probe its flash density, then query
    /// the bootloader version with a GET command.
    ///
    /// The probe runs with a shortened read timeout so that negative probes
    /// complete quickly; the previous timeout is restored before the GET
    /// exchange and on every error path.
    pub fn get_info(&mut self) -> Result<DeviceInfo> {
        self.port.clear_buffers()?;
        thread::sleep(IDENTIFY_SETTLE_DELAY);

        let saved_timeout = self.port.timeout();
        self.port.set_timeout(PROBE_TIMEOUT)?;
        let probed = self.probe_density();
        self.port.set_timeout(saved_timeout)?;
        let flash_size_kb = probed?;

        self.send_all(&Command::Get.frame())?;
        let mut reply = [0u8; GET_RESPONSE_LEN];
        self.receive_exact(&mut reply)?;

        if reply[0] != ACK || reply[GET_RESPONSE_LEN - 1] != ACK {
            return Err(Error::ProtocolViolation(format!(
                "GET response not ACK-delimited: {:#04x} .. {:#04x}",
                reply[0],
                reply[GET_RESPONSE_LEN - 1]
            )));
        }
        // Byte count field: version byte plus five command codes.
        if reply[1] != 6 {
            return Err(Error::ProtocolViolation(format!(
                "GET response advertises {} payload bytes",
                reply[1]
            )));
        }
        for (echo, command) in reply[3..8].iter().zip(GET_COMMAND_ECHOES) {
            if *echo != command as u8 {
                return Err(Error::UnexpectedByte {
                    expected: command as u8,
                    got: *echo,
                });
            }
        }

        let device = DeviceInfo {
            flash_size_kb,
            bsl_version: reply[2],
        };
        info!("identified device: {device}");
        Ok(device)
    }

    /// Check whether `addr` is readable on the target.
    ///
    /// Runs the command and address phases of a READ transaction and stops
    /// there: an acknowledged address means the memory exists, a refused
    /// one means it does not. Only a missing ACK on the command phase or a
    /// receive timeout is an error.
    pub fn mem_check(&mut self, addr: u32) -> Result<bool> {
        self.send_all(&Command::Read.frame())?;
        self.expect_ack()?;

        self.send_all(&encode_addr(addr))?;
        let mut reply = [0u8; 1];
        self.receive_exact(&mut reply)?;
        Ok(reply[0] == ACK)
    }

    /// Read `out.len()` bytes of target memory starting at `start`.
    ///
    /// The transfer is chunked into READ transactions of up to 256 bytes;
    /// any missing ACK or short receive aborts the whole operation.
    pub fn mem_read(&mut self, start: u32, out: &mut [u8]) -> Result<()> {
        let total = out.len();
        if total == 0 {
            return Ok(());
        }
        debug!("reading {total} bytes from {start:#06x}");
        if self.verbose {
            print_progress("read", start, 0, total);
        }

        let mut frame = [0u8; MAX_READ_CHUNK + 1];
        let mut offset = 0;
        while offset < total {
            let chunk = (total - offset).min(MAX_READ_CHUNK);
            let addr = start + offset as u32;

            self.command(Command::Read)?;
            self.send_address(addr)?;

            let len_byte = encode_len(chunk);
            self.send_all(&[len_byte, len_byte ^ 0xFF])?;

            // The ACK and the data bytes arrive in one burst.
            self.receive_exact(&mut frame[..=chunk])?;
            if frame[0] != ACK {
                return Err(Error::UnexpectedByte {
                    expected: ACK,
                    got: frame[0],
                });
            }
            out[offset..offset + chunk].copy_from_slice(&frame[1..=chunk]);

            offset += chunk;
            if self.verbose && offset % READ_PROGRESS_STEP == 0 {
                print_progress("read", start, offset, total);
            }
        }

        if self.verbose {
            print_progress("read", start, total, total);
            println!(" done");
        }
        Ok(())
    }

    /// Write `data` to target memory starting at `start`.
    ///
    /// The transfer is chunked into WRITE transactions of up to 128 bytes.
    /// Progress output is a per-call choice because this routine serves both
    /// user-visible flash programming and silent uploads to RAM.
    pub fn mem_write(&mut self, start: u32, data: &[u8], verbose: bool) -> Result<()> {
        let total = data.len();
        if total == 0 {
            return Ok(());
        }
        debug!("writing {total} bytes to {start:#06x}");
        if verbose {
            print_progress("upload", start, 0, total);
        }

        let mut offset = 0;
        while offset < total {
            let chunk = (total - offset).min(MAX_WRITE_CHUNK);
            let addr = start + offset as u32;

            self.command(Command::Write)?;
            self.send_address(addr)?;

            self.send_all(&write_frame(&data[offset..offset + chunk]))?;
            self.expect_ack()?;

            offset += chunk;
            if verbose && offset % WRITE_PROGRESS_STEP == 0 {
                print_progress("upload", start, offset, total);
            }
        }

        if verbose {
            print_progress("upload", start, total, total);
            println!(" done");
        }
        Ok(())
    }

    /// Erase the 1 KiB flash sector containing `addr`.
    pub fn flash_erase(&mut self, addr: u32) -> Result<()> {
        let sector = sector_for_addr(addr);
        debug!("erasing sector {sector:#04x} (address {addr:#06x})");

        self.command(Command::Erase)?;
        self.send_all(&erase_frame(sector))?;
        self.expect_ack()
    }

    /// Jump to `addr` and hand execution over to the code there.
    ///
    /// After the second ACK the target has left the bootloader; no further
    /// protocol messages are defined until it re-enters bootloader mode.
    pub fn jump_to(&mut self, addr: u32) -> Result<()> {
        debug!("jumping to {addr:#06x}");

        self.command(Command::Go)?;
        self.send_address(addr)
    }

    /// Program the option bytes that keep the ROM bootloader reachable
    /// after reset.
    pub fn enable_bootloader(&mut self) -> Result<()> {
        debug!("enabling ROM bootloader via option bytes");
        self.mem_write(BSL_OPTION_ADDR, &BSL_OPTION_BYTES, false)
    }

    /// Probe the density candidates top-down; the shortened probe timeout
    /// is managed by the caller.
    fn probe_density(&mut self) -> Result<u16> {
        for probe in DENSITY_PROBES {
            trace!(
                "probing {:#08x} ({} kB device?)",
                probe.top_addr,
                probe.flash_size_kb
            );
            if self.mem_check(probe.top_addr)? {
                return Ok(probe.flash_size_kb);
            }
        }
        Err(Error::DeviceNotIdentified)
    }

    /// Send a command frame and require its ACK.
    fn command(&mut self, command: Command) -> Result<()> {
        trace!("sending {command:?} command");
        self.send_all(&command.frame())?;
        self.expect_ack()
    }

    /// Send an address frame and require its ACK.
    fn send_address(&mut self, addr: u32) -> Result<()> {
        self.send_all(&encode_addr(addr))?;
        self.expect_ack()
    }

    /// Write a whole frame, failing on a short write.
    fn send_all(&mut self, data: &[u8]) -> Result<()> {
        let sent = self.port.send(data)?;
        if sent != data.len() {
            return Err(Error::SendShort {
                expected: data.len(),
                sent,
            });
        }
        Ok(())
    }

    /// Fill `buf` completely or fail with a timeout error.
    fn receive_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.port.receive(buf)?;
        if got != buf.len() {
            return Err(Error::Timeout {
                wanted: buf.len(),
                got,
            });
        }
        Ok(())
    }

    /// Read one byte from an acknowledge slot and require ACK.
    fn expect_ack(&mut self) -> Result<()> {
        let mut reply = [0u8; 1];
        self.receive_exact(&mut reply)?;
        if reply[0] != ACK {
            return Err(Error::UnexpectedByte {
                expected: ACK,
                got: reply[0],
            });
        }
        Ok(())
    }
}

/// Rewrite the current stdout line with transfer progress.
fn print_progress(operation: &str, start: u32, done: usize, total: usize) {
    if total > 2048 {
        print!(
            "\r  {operation} {:.1}kB of {:.1}kB at {start:#06x} ",
            done as f64 / 1024.0,
            total as f64 / 1024.0
        );
    } else {
        print!("\r  {operation} {done}B of {total}B at {start:#06x} ");
    }
    let _ = io::stdout().flush();
}
