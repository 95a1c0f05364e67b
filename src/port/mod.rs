//! Serial transport abstraction.
//!
//! The bootloader engine talks to the target through the [`Port`] trait,
//! which keeps the protocol layer independent of the actual line driver:
//!
//! ```text
//! +--------------------+
//! |  Bootloader engine |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     Port trait     |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     SerialPort     |
//! |    (serialport)    |
//! +--------------------+
//! ```
//!
//! The contract that matters to the protocol is the timeout model: the
//! configured timeout bounds an entire [`Port::receive`] call, not each
//! byte, and a zero timeout polls the OS buffer without waiting.

pub mod native;

pub use native::SerialPort;

use std::time::Duration;

use crate::error::Result;

/// Baud rates the STM8 ROM bootloader is specified for. The bootloader's
/// autobaud detection works from 4800 Bd upwards; rates outside this set are
/// passed to the OS untouched and may still work.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [
    4800, 9600, 14_400, 19_200, 28_800, 38_400, 57_600, 115_200,
];

/// USB vendor id of FTDI FT232-family USB-RS232 adapters.
const FTDI_VID: u16 = 0x0403;

/// USB vendor id of Prolific PL2303-family USB-RS232 adapters.
const PROLIFIC_VID: u16 = 0x067B;

/// Device-name patterns for adapters the OS reports without USB metadata.
const USB_NAME_PATTERNS: [&str; 3] = ["ttyUSB", "tty.usbserial", "tty.PL2303"];

/// Line parameters applied to an open port.
///
/// The record round-trips: after [`SerialPort::set_settings`] a subsequent
/// [`SerialPort::settings`] returns the same values, within the set of
/// values the OS actually supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    /// Baud rate.
    pub baud_rate: u32,
    /// Total timeout for a single receive call; zero means poll.
    pub timeout: Duration,
    /// Number of data bits per character.
    pub data_bits: DataBits,
    /// Parity mode.
    pub parity: Parity,
    /// Number of stop bits.
    pub stop_bits: StopBits,
    /// Static level driven on the RTS line.
    pub rts: bool,
    /// Static level driven on the DTR line. Some target boards wire DTR to
    /// the reset pin.
    pub dtr: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout: Duration::from_millis(1000),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            rts: false,
            dtr: false,
        }
    }
}

impl PortSettings {
    /// Create settings with the given baud rate and 8-N-1 defaults.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the receive timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the parity mode.
    #[must_use]
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the static RTS level.
    #[must_use]
    pub fn with_rts(mut self, level: bool) -> Self {
        self.rts = level;
        self
    }

    /// Set the static DTR level.
    #[must_use]
    pub fn with_dtr(mut self, level: bool) -> Self {
        self.dtr = level;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 1.5 stop bits. The native backend has no such mode; the port is
    /// configured with 2 stop bits and readback reports what the OS accepted.
    OnePointFive,
    /// 2 stop bits.
    Two,
}

/// Transport seam between the bootloader engine and the serial line.
///
/// Implementations must honour the timeout contract documented on
/// [`Port::receive`]; everything else in the protocol layer builds on it.
pub trait Port: Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current receive timeout.
    fn timeout(&self) -> Duration;

    /// Set the receive timeout. Zero means "return immediately with
    /// whatever is buffered".
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Write `data`, returning the number of bytes the OS accepted. Short
    /// writes are not retried; callers check the count.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes. The configured timeout bounds the whole
    /// call, not each byte; fewer bytes than requested are returned only
    /// when the deadline expires first.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Discard buffered data in both directions.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Release the OS resources. Idempotent on an already-closed port.
    fn close(&mut self) -> Result<()>;
}

/// Whether `baud` is in the bootloader's specified rate set.
#[must_use]
pub fn is_supported_baud(baud: u32) -> bool {
    SUPPORTED_BAUD_RATES.contains(&baud)
}

/// Best-effort enumeration of serial ports that look like USB-RS232
/// adapters (FTDI, Prolific). An empty result is not an error.
///
/// On Windows every `COMx` device is a candidate; on POSIX systems ports are
/// matched by USB vendor id where the OS reports one, falling back to the
/// usual adapter device-name patterns.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .filter(is_adapter_candidate)
        .map(|p| p.port_name)
        .collect())
}

fn is_adapter_candidate(port: &serialport::SerialPortInfo) -> bool {
    if cfg!(windows) {
        return true;
    }
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            matches!(usb.vid, FTDI_VID | PROLIFIC_VID)
        }
        _ => USB_NAME_PATTERNS
            .iter()
            .any(|pattern| port.port_name.contains(pattern)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = PortSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.timeout, Duration::from_millis(1000));
        assert_eq!(settings.data_bits, DataBits::Eight);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert!(!settings.rts);
        assert!(!settings.dtr);
    }

    #[test]
    fn test_settings_builder() {
        let settings = PortSettings::new(57_600)
            .with_timeout(Duration::from_millis(100))
            .with_parity(Parity::Even)
            .with_dtr(true);

        assert_eq!(settings.baud_rate, 57_600);
        assert_eq!(settings.timeout, Duration::from_millis(100));
        assert_eq!(settings.parity, Parity::Even);
        assert!(settings.dtr);
        assert!(!settings.rts);
    }

    #[test]
    fn test_supported_baud_rates() {
        assert!(is_supported_baud(4800));
        assert!(is_supported_baud(115_200));
        assert!(!is_supported_baud(110));
        assert!(!is_supported_baud(921_600));
    }

    #[test]
    fn test_list_ports_does_not_panic() {
        // Enumeration is best-effort; just verify it runs.
        let _ = list_ports();
    }

    #[test]
    fn test_usb_name_patterns_match_unix_adapters() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: serialport::SerialPortType::Unknown,
        };
        assert!(cfg!(windows) || is_adapter_candidate(&info));

        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: serialport::SerialPortType::Unknown,
        };
        assert!(cfg!(windows) || !is_adapter_candidate(&info));
    }
}
