// src/io/serial/link.rs
//
// The seam between the serial channel and the operating system.
//
// `SerialLink` is one open handle on a device; `LinkOpener` produces them.
// `SystemOpener` drives real ttys through the serialport crate and termios.

use std::io;
use std::time::Duration;

use super::utils::{BaudRate, LineParams};

/// One open handle on a serial device.
pub trait SerialLink: Send {
    /// Read whatever is available, waiting no longer than the read timeout
    /// the link was opened with. An expired wait is `ErrorKind::TimedOut`;
    /// `Ok(0)` means the device went away.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Single write; may be short.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Apply baud, stop bits, data bits and parity immediately (no flush).
    /// `params.data_bits` is already within 5..=8.
    fn configure(&mut self, baud: BaudRate, params: &LineParams) -> io::Result<()>;

    /// Second handle on the same open device, used by the receiver thread.
    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>>;
}

/// Opens devices for a `SerialChannel`.
pub trait LinkOpener: Send + Sync {
    /// Open `device` read/write at `baud`, flush pending input and disable
    /// local echo.
    fn open(&self, device: &str, baud: BaudRate, read_timeout: Duration) -> io::Result<Box<dyn SerialLink>>;
}

// ============================================================================
// System backend
// ============================================================================

/// Real tty devices.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemOpener;

#[cfg(unix)]
mod system {
    use std::io::{self, Read, Write};
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::time::Duration;

    use serialport::{ClearBuffer, SerialPort, TTYPort};

    use super::{LinkOpener, SerialLink, SystemOpener};
    use crate::io::serial::utils::{
        to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits, BaudRate, LineParams, Parity,
    };

    pub(super) struct SystemLink {
        port: TTYPort,
    }

    impl LinkOpener for SystemOpener {
        fn open(&self, device: &str, baud: BaudRate, read_timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
            let port = serialport::new(device, baud.as_u32())
                .timeout(read_timeout)
                .open_native()?;

            port.clear(ClearBuffer::Input)?;
            update_termios(port.as_raw_fd(), |tio| {
                tio.c_lflag &= !libc::ECHO;
            })?;

            tlog!(
                "[serial] {} opened raw at {} baud (termios speed {:#o}), read timeout {:?}",
                device,
                baud,
                baud.termios_speed(),
                read_timeout
            );
            Ok(Box::new(SystemLink { port }))
        }
    }

    impl SerialLink for SystemLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.port.read(buf)
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.port.write(data)
        }

        fn configure(&mut self, baud: BaudRate, params: &LineParams) -> io::Result<()> {
            self.port.set_baud_rate(baud.as_u32())?;
            self.port.set_stop_bits(to_serialport_stop_bits(params.stop_bits))?;
            self.port.set_data_bits(to_serialport_data_bits(params.data_bits))?;
            self.port.set_parity(to_serialport_parity(params.parity))?;
            set_space_parity(self.port.as_raw_fd(), params.parity == Parity::Space)
        }

        fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
            let port = self.port.try_clone_native()?;
            Ok(Box::new(SystemLink { port }))
        }
    }

    /// Read-modify-write the termios settings of `fd`, applied immediately.
    fn update_termios(fd: RawFd, edit: impl FnOnce(&mut libc::termios)) -> io::Result<()> {
        let mut tio = std::mem::MaybeUninit::<libc::termios>::uninit();
        // SAFETY: `fd` is an open tty owned by the caller and `tio` is valid for writes.
        if unsafe { libc::tcgetattr(fd, tio.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: tcgetattr succeeded, so every field has been written.
        let mut tio = unsafe { tio.assume_init() };
        edit(&mut tio);
        // SAFETY: same fd, fully initialised termios.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn set_space_parity(fd: RawFd, enable: bool) -> io::Result<()> {
        update_termios(fd, |tio| {
            if enable {
                tio.c_cflag |= libc::PARENB | libc::CMSPAR;
                tio.c_cflag &= !libc::PARODD;
            } else {
                tio.c_cflag &= !libc::CMSPAR;
            }
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn set_space_parity(_fd: RawFd, enable: bool) -> io::Result<()> {
        if enable {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Space parity needs CMSPAR, which is only available on Linux",
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(not(unix))]
impl LinkOpener for SystemOpener {
    fn open(&self, device: &str, _baud: BaudRate, _read_timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("Cannot open {}: serial devices are only supported on Unix", device),
        ))
    }
}
