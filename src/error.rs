// src/error.rs
//
// Error taxonomy for the serial channel and the touch calibration store.
//
// Messages say what failed and, where known, why. OS-level failures keep the
// originating `std::io::Error` so callers can reach the errno.

use thiserror::Error;

/// Failure to bring a channel from Closed to Open.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Baud rate {0} is not supported (expected 9600, 19200, 38400, 57600 or 115200)")]
    UnsupportedBaud(u32),

    #[error("Channel is already connected; close it before connecting again")]
    AlreadyConnected,

    #[error("Failed to open {device}: {source}")]
    OpenFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn serial receiver thread: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

impl ConnectError {
    /// Raw OS error number behind an open failure, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            ConnectError::OpenFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Failure to reconfigure the line discipline of an open channel.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Channel is not open")]
    NotOpen,

    #[error("Baud rate {0} is not supported (expected 9600, 19200, 38400, 57600 or 115200)")]
    UnsupportedBaud(u32),

    #[error("Data bits must be between 5 and 8, got {0}")]
    InvalidDataBits(u8),

    #[error("Failed to apply line settings: {0}")]
    Apply(#[source] std::io::Error),
}

/// Failure to write to the device.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Channel is not open")]
    NotOpen,

    #[error("Serial write failed: {0}")]
    OsWriteFailed(#[source] std::io::Error),
}

impl WriteError {
    pub fn errno(&self) -> Option<i32> {
        match self {
            WriteError::OsWriteFailed(e) => e.raw_os_error(),
            WriteError::NotOpen => None,
        }
    }
}

/// `close()` called on a channel that is not Open.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseError {
    #[error("Channel is not open")]
    NotOpen,
}

/// Why the receiver thread gave up. Never returned from a call; recorded on
/// the channel and reported through the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiveFault {
    #[error("Device reported end of file (disconnected)")]
    Disconnected,

    #[error("Serial read failed: {message}")]
    OsReadFailed { errno: Option<i32>, message: String },
}

impl From<std::io::Error> for ReceiveFault {
    fn from(e: std::io::Error) -> Self {
        ReceiveFault::OsReadFailed {
            errno: e.raw_os_error(),
            message: e.to_string(),
        }
    }
}

/// Failure to load, store or derive a touch calibration.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Calibration file not found: {0}")]
    NotFound(String),

    #[error("Calibration file is malformed at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Calibration file I/O failed: {0}")]
    Os(#[source] std::io::Error),

    #[error("Calibration points are degenerate: {0}")]
    Degenerate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_errno() {
        let err = ConnectError::OpenFailed {
            device: "/dev/ttyUSB9".to_string(),
            source: std::io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert_eq!(err.errno(), Some(libc::ENOENT));
        assert!(err.to_string().starts_with("Failed to open /dev/ttyUSB9"));
        assert_eq!(ConnectError::AlreadyConnected.errno(), None);
    }

    #[test]
    fn test_receive_fault_from_io() {
        let fault = ReceiveFault::from(std::io::Error::from_raw_os_error(libc::EIO));
        assert!(matches!(fault, ReceiveFault::OsReadFailed { errno: Some(e), .. } if e == libc::EIO));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ConfigError::InvalidDataBits(9).to_string(),
            "Data bits must be between 5 and 8, got 9"
        );
        assert_eq!(CloseError::NotOpen.to_string(), "Channel is not open");
    }
}
