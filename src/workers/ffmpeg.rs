//! Parsing of ffmpeg's stats output.
//!
//! A stats line looks like
//! `frame=  100 fps=0.0 q=-1.0 size=     128kB time=00:00:03.00 bitrate= 341.0kbits/s speed=1.01e+03x`.

const TIME_KEY: &str = "time=";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimecodeError {
    #[error("expected HH:MM:SS.ff, got {0:?}")]
    Shape(String),
    #[error("invalid {field} in timecode {input:?}")]
    Field { field: &'static str, input: String },
}

fn field_error(field: &'static str, input: &str) -> TimecodeError {
    TimecodeError::Field {
        field,
        input: input.to_string(),
    }
}

/// Converts a sexagesimal `HH:MM:SS.ff` duration into seconds.
///
/// Hours are limited only by the total fitting in a `u64` of seconds,
/// minutes and seconds must be below 60. A leading `-`
/// is accepted because ffmpeg reports slightly negative times while priming
/// its encoders.
pub fn parse_sexagesimal(input: &str) -> Result<f64, TimecodeError> {
    let trimmed = input.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed),
    };

    let mut fields = body.split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(TimecodeError::Shape(input.to_string()));
    };

    let hours: u64 = hours.parse().map_err(|_| field_error("hours", input))?;
    let minutes: u64 = minutes
        .parse()
        .ok()
        .filter(|m| *m < 60)
        .ok_or_else(|| field_error("minutes", input))?;
    let seconds: f64 = seconds
        .parse()
        .ok()
        .filter(|s: &f64| s.is_finite() && (0.0..60.0).contains(s))
        .ok_or_else(|| field_error("seconds", input))?;

    let whole = hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes * 60))
        .ok_or_else(|| field_error("hours", input))?;

    Ok(sign * (whole as f64 + seconds))
}

/// Text between `time=` and the next field delimiter, if the line has one.
pub fn time_field(line: &str) -> Option<&str> {
    let (start, _) = line
        .match_indices(TIME_KEY)
        .find(|(i, _)| *i == 0 || line[..*i].ends_with(char::is_whitespace))?;

    let rest = line[start + TIME_KEY.len()..].trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Elapsed output time reported by one stats line.
///
/// `None` when the line carries no usable time (no `time=` field, or
/// ffmpeg's `N/A` placeholder). `Some(Err(_))` when the field is malformed.
pub fn parse_progress_line(line: &str) -> Option<Result<f64, TimecodeError>> {
    let value = time_field(line)?;
    if value == "N/A" {
        return None;
    }
    Some(parse_sexagesimal(value))
}

/// Rounds `elapsed / total` to a whole percentage within `0..=100`.
pub fn percent_complete(elapsed: f64, total: f64) -> Option<i32> {
    if !(total > 0.0) {
        return None;
    }
    Some((elapsed / total * 100.0).round().clamp(0.0, 100.0) as i32)
}
