// src/io/serial/utils.rs
//
// Line discipline types and the baud resolver.
// Also converts our types into the serialport crate's equivalents.

use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// The baud rates the HMI link can run at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    /// Map a numeric baud rate onto the supported set.
    /// Returns `None` for anything outside {9600, 19200, 38400, 57600, 115200}.
    pub fn resolve(baud: u32) -> Option<BaudRate> {
        match baud {
            9600 => Some(BaudRate::B9600),
            19200 => Some(BaudRate::B19200),
            38400 => Some(BaudRate::B38400),
            57600 => Some(BaudRate::B57600),
            115200 => Some(BaudRate::B115200),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }

    /// termios speed constant for this rate.
    #[cfg(unix)]
    pub fn termios_speed(self) -> libc::speed_t {
        match self {
            BaudRate::B9600 => libc::B9600,
            BaudRate::B19200 => libc::B19200,
            BaudRate::B38400 => libc::B38400,
            BaudRate::B57600 => libc::B57600,
            BaudRate::B115200 => libc::B115200,
        }
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    /// Parity bit always 0 (mark/space parity, Linux `CMSPAR`).
    Space,
}

impl Parity {
    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Space => 'S',
        }
    }
}

impl std::str::FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            "space" | "s" => Ok(Parity::Space),
            other => Err(format!("Unknown parity '{}' (expected none, odd, even or space)", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl StopBits {
    pub fn from_count(bits: u8) -> Option<StopBits> {
        match bits {
            1 => Some(StopBits::One),
            2 => Some(StopBits::Two),
            _ => None,
        }
    }

    pub fn count(self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

pub const MIN_DATA_BITS: u8 = 5;
pub const MAX_DATA_BITS: u8 = 8;

/// Full line discipline for an open channel.
///
/// `baud` and `data_bits` are kept as plain numbers so a value read from
/// settings or a UI can be handed to `SerialChannel::set_params` as-is;
/// validation happens there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineParams {
    pub baud: u32,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub data_bits: u8,
}

impl Default for LineParams {
    fn default() -> Self {
        Self {
            baud: 115200,
            stop_bits: StopBits::One,
            parity: Parity::None,
            data_bits: 8,
        }
    }
}

impl LineParams {
    /// 8N1 at the given baud.
    pub fn with_baud(baud: u32) -> Self {
        Self { baud, ..Self::default() }
    }

    pub fn data_bits_valid(&self) -> bool {
        (MIN_DATA_BITS..=MAX_DATA_BITS).contains(&self.data_bits)
    }
}

impl std::fmt::Display for LineParams {
    /// `115200 8N1` style summary.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits.count()
        )
    }
}

/// What `set_params` does with a data-bit count outside 5..=8.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataBitsPolicy {
    /// Fail with `ConfigError::InvalidDataBits` and leave the line untouched.
    #[default]
    Reject,
    /// Clamp into 5..=8, log it, and apply.
    Clamp,
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity to serialport's. Space has no serialport equivalent;
/// it maps to None here and the mark/space bit is set separately.
#[cfg(unix)]
pub fn to_serialport_parity(p: Parity) -> serialport::Parity {
    match p {
        Parity::None | Parity::Space => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

/// Convert a validated data bits count to serialport's DataBits type
#[cfg(unix)]
pub fn to_serialport_data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

#[cfg(unix)]
pub fn to_serialport_stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_supported_bauds() {
        for (baud, expected) in [
            (9600, BaudRate::B9600),
            (19200, BaudRate::B19200),
            (38400, BaudRate::B38400),
            (57600, BaudRate::B57600),
            (115200, BaudRate::B115200),
        ] {
            assert_eq!(BaudRate::resolve(baud), Some(expected));
            assert_eq!(expected.as_u32(), baud);
        }
    }

    #[test]
    fn test_resolve_rejects_other_bauds() {
        for baud in [0, 1, 300, 1200, 2400, 4800, 9601, 14400, 230400, 921600, u32::MAX] {
            assert_eq!(BaudRate::resolve(baud), None, "baud {} should be rejected", baud);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_termios_speed() {
        assert_eq!(BaudRate::B9600.termios_speed(), libc::B9600);
        assert_eq!(BaudRate::B115200.termios_speed(), libc::B115200);
    }

    #[test]
    fn test_parity_default_and_parse() {
        assert_eq!(Parity::default(), Parity::None);
        assert_eq!("Space".parse::<Parity>(), Ok(Parity::Space));
        assert_eq!("e".parse::<Parity>(), Ok(Parity::Even));
        assert!("mark".parse::<Parity>().is_err());
    }

    #[test]
    fn test_line_params_display() {
        let params = LineParams {
            baud: 9600,
            stop_bits: StopBits::Two,
            parity: Parity::Even,
            data_bits: 7,
        };
        assert_eq!(params.to_string(), "9600 7E2");
        assert_eq!(LineParams::default().to_string(), "115200 8N1");
    }

    #[test]
    fn test_data_bits_valid() {
        for bits in 5..=8 {
            assert!(LineParams { data_bits: bits, ..LineParams::default() }.data_bits_valid());
        }
        assert!(!LineParams { data_bits: 4, ..LineParams::default() }.data_bits_valid());
        assert!(!LineParams { data_bits: 9, ..LineParams::default() }.data_bits_valid());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Parity::Space).unwrap(), "\"space\"");
        assert_eq!(serde_json::to_string(&StopBits::Two).unwrap(), "\"2\"");
        assert_eq!(
            serde_json::from_str::<DataBitsPolicy>("\"clamp\"").unwrap(),
            DataBitsPolicy::Clamp
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_to_serialport_conversions() {
        assert!(matches!(to_serialport_parity(Parity::Odd), serialport::Parity::Odd));
        assert!(matches!(to_serialport_parity(Parity::Space), serialport::Parity::None));
        assert!(matches!(to_serialport_data_bits(5), serialport::DataBits::Five));
        assert!(matches!(to_serialport_data_bits(8), serialport::DataBits::Eight));
        assert!(matches!(to_serialport_stop_bits(StopBits::Two), serialport::StopBits::Two));
    }
}
