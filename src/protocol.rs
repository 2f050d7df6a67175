//! Wire protocol for the Lumen lighting node
//!
//! The node speaks a newline-oriented text protocol over TCP. After the
//! two-step handshake it accepts one command line per exchange and
//! answers with a short free-form acknowledgment.

/// Query the node sends first after accepting a connection.
pub const MODE_QUERY: &str = "mode";

/// Reply that claims a persistent (non-oneshot) session.
pub const PERSIST_REPLY: &str = "persist";

/// Second query the node sends, asking the client to name itself.
pub const IDENTIFY_QUERY: &str = "identify";

/// Reply identifying this client as the mobile remote.
pub const MOBILE_REPLY: &str = "mobile";

/// Two-position switch argument used by several commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Switch::On => "on",
            Switch::Off => "off",
        }
    }
}

/// Commands understood by the node's interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Switch the lamp output
    Power(Switch),
    /// Enable or disable clap detection
    Clap(Switch),
    /// Ask the node to listen for the next clap pattern
    Listen,
    /// Fixed RGB color, one byte per channel
    Color { red: u8, green: u8, blue: u8 },
    /// Hand color control back to the node's ambient logic
    ColorAuto,
    /// Fixed brightness level
    Brightness(u8),
    /// Ambient-driven brightness
    BrightnessAuto,
    /// Fixed color temperature level
    Temperature(u8),
    /// Ambient-driven color temperature
    TemperatureAuto,
    /// Enable or disable the motion sensor
    Motion(Switch),
    /// Motion sensitivity level
    MotionLevel(u8),
    /// Escape hatch: send an arbitrary line as-is
    Raw(String),
}

impl Command {
    /// Format the command as the newline-terminated wire line.
    ///
    /// `Raw` lines get a newline appended only when the caller left it
    /// off; everything else is terminated unconditionally.
    pub fn to_line(&self) -> String {
        match self {
            Command::Power(s) => format!("power {}\n", s.as_str()),
            Command::Clap(s) => format!("clap {}\n", s.as_str()),
            Command::Listen => "listen\n".to_string(),
            Command::Color { red, green, blue } => {
                format!("color {} {} {}\n", red, green, blue)
            }
            Command::ColorAuto => "color auto\n".to_string(),
            Command::Brightness(level) => format!("brightness {}\n", level),
            Command::BrightnessAuto => "brightness auto\n".to_string(),
            Command::Temperature(level) => format!("temp {}\n", level),
            Command::TemperatureAuto => "temp auto\n".to_string(),
            Command::Motion(s) => format!("motion {}\n", s.as_str()),
            Command::MotionLevel(level) => format!("motion {}\n", level),
            Command::Raw(line) => {
                if line.ends_with('\n') {
                    line.clone()
                } else {
                    format!("{}\n", line)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_commands() {
        assert_eq!(Command::Power(Switch::On).to_line(), "power on\n");
        assert_eq!(Command::Power(Switch::Off).to_line(), "power off\n");
        assert_eq!(Command::Clap(Switch::On).to_line(), "clap on\n");
        assert_eq!(Command::Motion(Switch::Off).to_line(), "motion off\n");
        assert_eq!(Command::Listen.to_line(), "listen\n");
    }

    #[test]
    fn test_level_commands() {
        assert_eq!(
            Command::Color {
                red: 255,
                green: 0,
                blue: 64
            }
            .to_line(),
            "color 255 0 64\n"
        );
        assert_eq!(Command::Brightness(200).to_line(), "brightness 200\n");
        assert_eq!(Command::Temperature(85).to_line(), "temp 85\n");
        assert_eq!(Command::MotionLevel(128).to_line(), "motion 128\n");
    }

    #[test]
    fn test_auto_commands() {
        assert_eq!(Command::ColorAuto.to_line(), "color auto\n");
        assert_eq!(Command::BrightnessAuto.to_line(), "brightness auto\n");
        assert_eq!(Command::TemperatureAuto.to_line(), "temp auto\n");
    }

    #[test]
    fn test_raw_newline_handling() {
        assert_eq!(Command::Raw("power on".to_string()).to_line(), "power on\n");
        assert_eq!(
            Command::Raw("power on\n".to_string()).to_line(),
            "power on\n"
        );
    }
}
