//! Subtitle timestamp parsing and formatting.
//!
//! Cue timings use integer milliseconds internally. The textual forms are
//! the SRT timing `HH:MM:SS,mmm` and the WebVTT timing `HH:MM:SS.mmm`;
//! the parser accepts either separator.

/// Parse a subtitle timestamp (`HH:MM:SS,mmm` or `HH:MM:SS.mmm`) to
/// milliseconds.
///
/// Tolerates one- or two-digit hours and 1..=3 millisecond digits
/// (short forms are right-padded, `,5` means 500 ms).
///
/// # Examples
/// ```
/// use subgen_models::timestamp::parse_srt_timestamp;
/// assert_eq!(parse_srt_timestamp("00:01:30,500").unwrap(), 90_500);
/// assert_eq!(parse_srt_timestamp("01:00:00.250").unwrap(), 3_600_250);
/// ```
pub fn parse_srt_timestamp(ts: &str) -> Result<u64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    // Split off milliseconds on either separator.
    let (clock, millis) = match ts.rsplit_once([',', '.']) {
        Some((clock, frac)) => {
            if frac.is_empty() || frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(TimestampError::InvalidValue("milliseconds", frac.to_string()));
            }
            let mut padded = frac.to_string();
            while padded.len() < 3 {
                padded.push('0');
            }
            let millis: u64 = padded
                .parse()
                .map_err(|_| TimestampError::InvalidValue("milliseconds", frac.to_string()))?;
            (clock, millis)
        }
        None => (ts, 0),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    let hours: u64 = parse_component(parts[0], "hours")?;
    let minutes: u64 = parse_component(parts[1], "minutes")?;
    let seconds: u64 = parse_component(parts[2], "seconds")?;

    if minutes > 59 || seconds > 59 {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    Ok(((hours * 3600 + minutes * 60 + seconds) * 1000) + millis)
}

fn parse_component(s: &str, name: &'static str) -> Result<u64, TimestampError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimestampError::InvalidValue(name, s.to_string()));
    }
    s.parse()
        .map_err(|_| TimestampError::InvalidValue(name, s.to_string()))
}

/// Format milliseconds as an SRT timing (`HH:MM:SS,mmm`).
pub fn format_srt_timestamp(ms: u64) -> String {
    format_with_separator(ms, ',')
}

/// Format milliseconds as a WebVTT timing (`HH:MM:SS.mmm`).
pub fn format_vtt_timestamp(ms: u64) -> String {
    format_with_separator(ms, '.')
}

fn format_with_separator(ms: u64, sep: char) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}{sep}{millis:03}")
}

/// Convert fractional seconds to whole milliseconds, rounding half up.
pub fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds * 1000.0).round().max(0.0) as u64
}

/// Timestamp parsing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    /// Timestamp string is empty
    Empty,
    /// Invalid numeric value for a component
    InvalidValue(&'static str, String),
    /// Not an `HH:MM:SS[,.]mmm` form
    InvalidFormat(String),
}

impl std::fmt::Display for TimestampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Timestamp cannot be empty"),
            Self::InvalidValue(component, value) => {
                write!(f, "Invalid {} value: {}", component, value)
            }
            Self::InvalidFormat(ts) => {
                write!(f, "Invalid timestamp format '{}'. Use HH:MM:SS,mmm", ts)
            }
        }
    }
}

impl std::error::Error for TimestampError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        assert_eq!(parse_srt_timestamp("00:00:00,000").unwrap(), 0);
        assert_eq!(parse_srt_timestamp("00:01:00,000").unwrap(), 60_000);
        assert_eq!(parse_srt_timestamp("01:30:45,123").unwrap(), 5_445_123);
    }

    #[test]
    fn test_parse_dot_separator() {
        assert_eq!(parse_srt_timestamp("00:00:30.500").unwrap(), 30_500);
    }

    #[test]
    fn test_parse_short_forms() {
        // Single-digit hour and short millisecond field
        assert_eq!(parse_srt_timestamp("0:00:01,5").unwrap(), 1_500);
        assert_eq!(parse_srt_timestamp("00:00:01,50").unwrap(), 1_500);
        assert_eq!(parse_srt_timestamp("00:00:02").unwrap(), 2_000);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_srt_timestamp(""), Err(TimestampError::Empty)));
        assert!(matches!(
            parse_srt_timestamp("abc"),
            Err(TimestampError::InvalidFormat(_)) | Err(TimestampError::InvalidValue(_, _))
        ));
        assert!(parse_srt_timestamp("00:99:00,000").is_err());
        assert!(parse_srt_timestamp("00:00:00,1234").is_err());
        assert!(parse_srt_timestamp("-1:00:00,000").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        for ms in [0, 1, 999, 1000, 59_999, 60_000, 3_599_999, 3_600_000, 5_445_123] {
            assert_eq!(parse_srt_timestamp(&format_srt_timestamp(ms)).unwrap(), ms);
            assert_eq!(parse_srt_timestamp(&format_vtt_timestamp(ms)).unwrap(), ms);
        }
    }

    #[test]
    fn test_seconds_to_ms() {
        assert_eq!(seconds_to_ms(0.0), 0);
        assert_eq!(seconds_to_ms(1.2345), 1235);
        assert_eq!(seconds_to_ms(-0.5), 0);
    }
}
