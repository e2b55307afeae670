// Serial link and touch calibration core for a Raspberry Pi HMI panel.

#[macro_use]
pub mod logging;

pub mod command;
pub mod device_scan;
pub mod error;
pub mod io;
pub mod settings;
pub mod touch;

pub use command::{parse_command, HmiCommand};
pub use error::{CalibrationError, CloseError, ConfigError, ConnectError, ReceiveFault, WriteError};
pub use io::serial::{
    BaudRate, ChannelOptions, ChannelState, ChannelStats, DataBitsPolicy, LineParams, Parity, SerialChannel,
    StopBits,
};
pub use settings::LinkSettings;
