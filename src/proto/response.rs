use std::fmt;

use super::{ProtoError, Result};

/// Completion state reported by the laser after a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Pending,
    Done,
}

/// Acquisition state of a power meter channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementStatus {
    Measuring,
    Done,
}

/// IEEE 488.2 `*IDN?` response: manufacturer, model, serial, firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl TryFrom<&str> for Ident {
    type Error = ProtoError;

    fn try_from(value: &str) -> Result<Self> {
        let values: Vec<&str> = value.trim().split(',').map(str::trim).collect();
        if values.len() == 4 {
            Ok(Self {
                manufacturer: String::from(values[0]),
                model: String::from(values[1]),
                serial: String::from(values[2]),
                firmware: String::from(values[3]),
            })
        } else {
            Err(ProtoError::Unexpected {
                command: "*IDN?".into(),
                response: value.to_string(),
            })
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (S/N {}, FW {})",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}

/// Parses a numeric response. Instruments answer in plain or scientific
/// notation; `inf`/`-inf` overflow markers come through as infinities.
pub fn parse_f64(command: &str, response: &str) -> Result<f64> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| ProtoError::Unexpected {
            command: command.to_string(),
            response: response.to_string(),
        })
}

/// Compares a response against a protocol token, ignoring surrounding
/// whitespace.
pub fn is_token(response: &str, token: &str) -> bool {
    response.trim() == token.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_from_idn() {
        let id = Ident::try_from("SANTEC,TSL-550,12345678,0001.0000\n").unwrap();
        assert_eq!(id.manufacturer, "SANTEC");
        assert_eq!(id.model, "TSL-550");
        assert_eq!(id.firmware, "0001.0000");
    }

    #[test]
    fn ident_rejects_short_response() {
        assert!(Ident::try_from("TSL-550").is_err());
    }

    #[test]
    fn parse_scientific_and_overflow() {
        assert_eq!(parse_f64("q", " 1.25E-3 ").unwrap(), 1.25e-3);
        assert!(parse_f64("q", "-inf").unwrap().is_infinite());
        assert!(parse_f64("q", "ERR").is_err());
    }

    #[test]
    fn token_ignores_line_endings() {
        assert!(is_token("1\n", "1"));
        assert!(!is_token("0", "1"));
    }
}
