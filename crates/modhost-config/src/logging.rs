//! Output format for the supervisor's log stream.

use strum::{Display, EnumString};

/// How log events are rendered on stderr.
///
/// Parsed case-insensitively from `--log-format` / `MODHOST_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened.
    Json,
    /// Single-line human-readable events.
    #[default]
    Compact,
}

/// Error returned when `--log-format` names an unknown format.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn parses_ignoring_case_and_displays_snake_case() {
        assert_eq!(LogFormat::from_str("JSON"), Ok(LogFormat::Json));
        assert_eq!(LogFormat::Compact.to_string(), "compact");
        assert!(LogFormat::from_str("pretty").is_err());
    }
}
