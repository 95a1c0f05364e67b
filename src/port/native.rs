//! Native serial port implementation using the `serialport` crate.
//!
//! The backend already configures the line the way the bootloader needs it
//! (raw mode, no echo, no hardware or software flow control, receiver
//! enabled with modem-control lines ignored) on both the termios and the
//! Win32 COMM APIs. What it does not provide is a *total* read timeout:
//! its per-call timeout restarts with every `read`. [`SerialPort::receive`]
//! adds the deadline loop that turns it into the contract the protocol
//! engine relies on.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::trace;
use serialport::ClearBuffer;

use crate::error::{Error, Result};
use crate::port::{DataBits, Parity, Port, PortSettings, StopBits};

/// An exclusively-owned serial line.
///
/// The handle is created by [`SerialPort::open`], which applies all line
/// parameters before returning. Operations on a closed handle fail with
/// [`Error::NotOpen`]; dropping the handle releases the OS resource.
pub struct SerialPort {
    inner: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    // Shadow of the applied settings. RTS/DTR levels and the total timeout
    // have no OS readback path, so `settings()` reports these from here.
    settings: PortSettings,
}

impl SerialPort {
    /// Open the named port exclusively and apply `settings`.
    pub fn open(name: &str, settings: &PortSettings) -> Result<Self> {
        let inner = serialport::new(name, settings.baud_rate)
            .timeout(settings.timeout)
            .data_bits(settings.data_bits.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|source| Error::OpenFailed {
                port: name.to_string(),
                source,
            })?;

        let mut port = Self {
            inner: Some(inner),
            name: name.to_string(),
            settings: settings.clone(),
        };

        // Modem-control lines are not part of the builder; drive them now.
        port.set_rts(settings.rts)?;
        port.set_dtr(settings.dtr)?;

        Ok(port)
    }

    fn inner_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.inner.as_mut().ok_or(Error::NotOpen)
    }

    /// Read back the current line parameters.
    ///
    /// Baud rate, data bits, parity, and stop bits come from the OS; the
    /// RTS/DTR levels and the timeout are reported from the last applied
    /// values because the backend has no modem-line readback.
    pub fn settings(&self) -> Result<PortSettings> {
        let inner = self.inner.as_ref().ok_or(Error::NotOpen)?;
        Ok(PortSettings {
            baud_rate: inner.baud_rate().map_err(Error::ConfigFailed)?,
            timeout: self.settings.timeout,
            data_bits: inner.data_bits().map_err(Error::ConfigFailed)?.into(),
            parity: inner.parity().map_err(Error::ConfigFailed)?.into(),
            stop_bits: inner.stop_bits().map_err(Error::ConfigFailed)?.into(),
            rts: self.settings.rts,
            dtr: self.settings.dtr,
        })
    }

    /// Apply a complete settings record to the open port.
    pub fn set_settings(&mut self, settings: &PortSettings) -> Result<()> {
        {
            let inner = self.inner_mut()?;
            inner
                .set_baud_rate(settings.baud_rate)
                .map_err(Error::ConfigFailed)?;
            inner
                .set_data_bits(settings.data_bits.into())
                .map_err(Error::ConfigFailed)?;
            inner
                .set_parity(settings.parity.into())
                .map_err(Error::ConfigFailed)?;
            inner
                .set_stop_bits(settings.stop_bits.into())
                .map_err(Error::ConfigFailed)?;
        }
        self.set_rts(settings.rts)?;
        self.set_dtr(settings.dtr)?;
        self.settings = settings.clone();
        Ok(())
    }

    /// Drive the RTS line to a static level.
    pub fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("setting RTS to {level}");
        self.inner_mut()?
            .write_request_to_send(level)
            .map_err(Error::ConfigFailed)?;
        self.settings.rts = level;
        Ok(())
    }

    /// Drive the DTR line to a static level.
    pub fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("setting DTR to {level}");
        self.inner_mut()?
            .write_data_terminal_ready(level)
            .map_err(Error::ConfigFailed)?;
        self.settings.dtr = level;
        Ok(())
    }
}

impl Port for SerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.inner_mut()?
            .set_timeout(timeout)
            .map_err(Error::ConfigFailed)?;
        self.settings.timeout = timeout;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.inner_mut()?
            .set_baud_rate(baud_rate)
            .map_err(Error::ConfigFailed)?;
        self.settings.baud_rate = baud_rate;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let sent = self.inner_mut()?.write(data)?;
        trace!("sent {sent}/{} bytes", data.len());
        Ok(sent)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let timeout = self.settings.timeout;
        let deadline = Instant::now() + timeout;
        let inner = self.inner.as_mut().ok_or(Error::NotOpen)?;
        let mut got = 0;

        // The backend timeout restarts with every read call, so bound each
        // call by the time left until the overall deadline.
        while got < buf.len() {
            let budget = deadline.saturating_duration_since(Instant::now());
            inner.set_timeout(budget).map_err(Error::ConfigFailed)?;

            match inner.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        inner.set_timeout(timeout).map_err(Error::ConfigFailed)?;
        trace!("received {got}/{} bytes", buf.len());
        Ok(got)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.inner_mut()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.flush().map_err(Error::CloseFailed)?;
        }
        Ok(())
    }
}

// Type conversions between our line-parameter enums and serialport's.

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<serialport::DataBits> for DataBits {
    fn from(bits: serialport::DataBits) -> Self {
        match bits {
            serialport::DataBits::Seven => Self::Seven,
            // The transport only ever configures 7 or 8 data bits.
            _ => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<serialport::Parity> for Parity {
    fn from(parity: serialport::Parity) -> Self {
        match parity {
            serialport::Parity::None => Self::None,
            serialport::Parity::Odd => Self::Odd,
            serialport::Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            // Closest mode the backend supports.
            StopBits::OnePointFive | StopBits::Two => Self::Two,
        }
    }
}

impl From<serialport::StopBits> for StopBits {
    fn from(bits: serialport::StopBits) -> Self {
        match bits {
            serialport::StopBits::One => Self::One,
            serialport::StopBits::Two => Self::Two,
        }
    }
}
