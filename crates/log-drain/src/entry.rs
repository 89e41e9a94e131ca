// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log entries and the parsers that produce them from raw drain lines.
//!
//! Heroku HTTPS drains deliver syslog frames (RFC 5424 header without structured data),
//! optionally prefixed by their octet count:
//!
//! ```text
//! 83 <40>1 2012-11-30T06:45:29+00:00 host app web.3 - State changed from starting to up
//! ```

use chrono::{DateTime, Utc};

use crate::error::ParseError;

/// A single parsed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

/// Turns one raw line (terminator included, when present) into a [`LogEntry`].
///
/// Implementations must be pure: the same input always yields the same result, and a line
/// that does not conform yields an error rather than a partial entry. Any trailing `\n` must be
/// carried over verbatim into the message; the caller trims it.
pub trait EntryParser: Send + Sync {
    fn parse(&self, line: &[u8]) -> Result<LogEntry, ParseError>;
}

/// Parser for logplex syslog frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogplexParser;

impl EntryParser for LogplexParser {
    fn parse(&self, line: &[u8]) -> Result<LogEntry, ParseError> {
        if line.is_empty() || line == b"\n" {
            return Err(ParseError::Empty);
        }

        let mut cursor = Cursor { rest: line };
        cursor.skip_octet_count()?;

        let priority = cursor.priority()?;
        if priority > 191 {
            return Err(ParseError::InvalidPriority(priority.to_string()));
        }

        let version = cursor.token("version")?;
        if version.is_empty()
            || version.len() > 2
            || !version.bytes().all(|b| b.is_ascii_digit())
            || version == "0"
        {
            return Err(ParseError::InvalidVersion(version.to_string()));
        }

        let raw_timestamp = cursor.token("timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
            .map_err(|e| ParseError::InvalidTimestamp {
                value: raw_timestamp.to_string(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        let _hostname = cursor.token("hostname")?;
        let app_name = cursor.token("app name")?;
        let proc_id = cursor.token("proc id")?;
        let _msg_id = cursor.token("msg id")?;
        let msg = String::from_utf8_lossy(cursor.rest);

        Ok(LogEntry {
            timestamp,
            message: format!("{app_name}[{proc_id}]: {msg}"),
        })
    }
}

struct Cursor<'a> {
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn skip_octet_count(&mut self) -> Result<(), ParseError> {
        let digits = self.rest.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return Ok(());
        }
        match self.rest.get(digits) {
            Some(&b' ') => {
                self.rest = &self.rest[digits + 1..];
                Ok(())
            }
            _ => Err(ParseError::InvalidOctetCount),
        }
    }

    fn priority(&mut self) -> Result<u16, ParseError> {
        let Some(rest) = self.rest.strip_prefix(b"<") else {
            return Err(ParseError::InvalidPriority(self.preview()));
        };
        let Some(close) = rest.iter().position(|&b| b == b'>') else {
            return Err(ParseError::InvalidPriority(self.preview()));
        };
        let digits = &rest[..close];
        if digits.is_empty() || digits.len() > 3 || !digits.iter().all(u8::is_ascii_digit) {
            return Err(ParseError::InvalidPriority(
                String::from_utf8_lossy(digits).into_owned(),
            ));
        }
        let priority = digits
            .iter()
            .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
        self.rest = &rest[close + 1..];
        Ok(priority)
    }

    /// Consumes a space-terminated header token and the single space following it.
    fn token(&mut self, field: &'static str) -> Result<&'a str, ParseError> {
        let end = self
            .rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or(ParseError::MissingField(field))?;
        let token = &self.rest[..end];
        if token.is_empty() {
            return Err(ParseError::MissingField(field));
        }
        if !token.is_ascii() {
            return Err(ParseError::NonAscii(field));
        }
        self.rest = &self.rest[end + 1..];
        std::str::from_utf8(token).map_err(|_| ParseError::NonAscii(field))
    }

    fn preview(&self) -> String {
        let end = self.rest.len().min(8);
        String::from_utf8_lossy(&self.rest[..end]).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(line: &str) -> Result<LogEntry, ParseError> {
        LogplexParser.parse(line.as_bytes())
    }

    #[test]
    fn test_parse_router_line() {
        let entry = parse(
            "227 <158>1 2012-11-30T06:45:26+00:00 host heroku router - at=info method=GET path=/ status=200\n",
        )
        .unwrap();
        assert_eq!(
            entry.timestamp,
            Utc.with_ymd_and_hms(2012, 11, 30, 6, 45, 26).unwrap()
        );
        assert_eq!(
            entry.message,
            "heroku[router]: at=info method=GET path=/ status=200\n"
        );
    }

    #[test]
    fn test_parse_without_octet_count_and_terminator() {
        let entry = parse("<40>1 2012-11-30T06:45:29+00:00 host app web.3 - State changed").unwrap();
        assert_eq!(entry.message, "app[web.3]: State changed");
    }

    #[test]
    fn test_timestamp_is_converted_to_utc() {
        let entry = parse("<13>1 2024-03-01T10:00:00.250+02:00 h app web.1 - hi\n").unwrap();
        assert_eq!(
            entry.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
                + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn test_empty_message_is_allowed() {
        let entry = parse("<13>1 2024-03-01T10:00:00Z h app web.1 - \n").unwrap();
        assert_eq!(entry.message, "app[web.1]: \n");
    }

    #[test]
    fn test_invalid_utf8_in_message_is_replaced() {
        let mut line = b"<13>1 2024-03-01T10:00:00Z h app web.1 - bad ".to_vec();
        line.push(0xff);
        let entry = LogplexParser.parse(&line).unwrap();
        assert_eq!(entry.message, "app[web.1]: bad \u{fffd}");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("\n"), Err(ParseError::Empty));
        assert_eq!(
            parse("12x <13>1 2024-03-01T10:00:00Z h a p - m"),
            Err(ParseError::InvalidOctetCount)
        );
        assert!(matches!(
            parse("13 hello world\n"),
            Err(ParseError::InvalidPriority(_))
        ));
        assert!(matches!(
            parse("<1000>1 2024-03-01T10:00:00Z h a p - m"),
            Err(ParseError::InvalidPriority(_))
        ));
        assert!(matches!(
            parse("<13>x 2024-03-01T10:00:00Z h a p - m"),
            Err(ParseError::InvalidVersion(_))
        ));
        assert!(matches!(
            parse("<13>1 yesterday h a p - m"),
            Err(ParseError::InvalidTimestamp { .. })
        ));
        assert_eq!(
            parse("<13>1 2024-03-01T10:00:00Z h app web.1\n"),
            Err(ParseError::MissingField("proc id"))
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let line = "<13>1 2024-03-01T10:00:00Z h app web.1 - same\n";
        assert_eq!(parse(line), parse(line));
    }
}
