use serde::{Deserialize, Serialize};

use crate::error::MapStateError;

/// RGBA color of a feature style.
///
/// Serialized as a hex string (`#RRGGBBAA`). Parsing also accepts the short `#RGB` and the
/// opaque `#RRGGBB` forms.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

impl TryFrom<String> for Color {
    type Error = MapStateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from_hex(&value)
            .ok_or_else(|| MapStateError::Decoding(format!("invalid color string {value:?}")))
    }
}

impl From<Color> for String {
    fn from(val: Color) -> Self {
        val.to_hex()
    }
}

impl Color {
    /// Red color: `#FF0000FF`
    pub const RED: Color = Color::rgba(255, 0, 0, 255);
    /// Blue color: `#0000FFFF`
    pub const BLUE: Color = Color::rgba(0, 0, 255, 255);
    /// Black color: `#000000FF`
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    /// Default highlight color: `#00FFFFFF`
    pub const CYAN: Color = Color::rgba(0, 255, 255, 255);

    /// Constructs color from its RGBA channels.
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Converts the color into HEX8 string: `#RRGGBBAA`.
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
    }

    /// Parses a color from `#RGB`, `#RRGGBB` or `#RRGGBBAA` hex string.
    pub fn try_from_hex(hex_string: &str) -> Option<Self> {
        let digits = hex_string.strip_prefix('#')?;
        if !digits.is_ascii() {
            return None;
        }

        let channel = |from: usize, len: usize| -> Option<u8> {
            let value = u8::from_str_radix(&digits[from..from + len], 16).ok()?;
            Some(if len == 1 { value * 17 } else { value })
        };

        match digits.len() {
            3 => Some(Self::rgba(channel(0, 1)?, channel(1, 1)?, channel(2, 1)?, 255)),
            6 => Some(Self::rgba(channel(0, 2)?, channel(2, 2)?, channel(4, 2)?, 255)),
            8 => Some(Self::rgba(
                channel(0, 2)?,
                channel(2, 2)?,
                channel(4, 2)?,
                channel(6, 2)?,
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_forms() {
        assert_eq!(Color::try_from_hex("#FF1000AA"), Some(Color::rgba(255, 16, 0, 170)));
        assert_eq!(Color::try_from_hex("#ff1000"), Some(Color::rgba(255, 16, 0, 255)));
        assert_eq!(Color::try_from_hex("#0F0"), Some(Color::rgba(0, 255, 0, 255)));
        assert_eq!(Color::try_from_hex("FF1000"), None);
        assert_eq!(Color::try_from_hex("#FF10"), None);
        assert_eq!(Color::try_from_hex("#GG0000"), None);
    }

    #[test]
    fn serializes_as_hex_string() {
        let json = serde_json::to_string(&Color::RED).expect("serialize");
        assert_eq!(json, "\"#FF0000FF\"");

        let parsed: Color = serde_json::from_str("\"#00FFFF\"").expect("deserialize");
        assert_eq!(parsed, Color::CYAN);

        assert!(serde_json::from_str::<Color>("\"teal\"").is_err());
    }
}
