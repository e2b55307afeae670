// src/command.rs
//
// Commands the host sends to the panel, one per line:
//
//     slider 42
//     wake

const DELIMITERS: &[char] = &[' ', ',', '\t', ':'];

/// Range of the panel's brightness slider.
pub const SLIDER_MIN: i32 = 30;
pub const SLIDER_MAX: i32 = 255;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HmiCommand {
    /// Move the slider to a position, always within `SLIDER_MIN..=SLIDER_MAX`.
    Slider(i32),
    /// Turn the backlight back on.
    Wake,
    Unknown(String),
}

/// Parse one received line. Tokens may be separated by spaces, commas, tabs
/// or colons; the keyword is case-sensitive.
///
/// Slider values above `SLIDER_MAX` are ignored (`Unknown`); values below
/// `SLIDER_MIN` are raised to it, as the slider widget itself would.
pub fn parse_command(line: &str) -> HmiCommand {
    let mut tokens = line.split(DELIMITERS).filter(|t| !t.is_empty());

    match tokens.next() {
        Some("slider") => match tokens.next().and_then(|v| v.parse::<i32>().ok()) {
            Some(value) if value <= SLIDER_MAX => HmiCommand::Slider(value.max(SLIDER_MIN)),
            _ => HmiCommand::Unknown(line.to_string()),
        },
        Some("wake") => HmiCommand::Wake,
        _ => HmiCommand::Unknown(line.to_string()),
    }
}
