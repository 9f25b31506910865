use std::fmt;
use std::io::BufRead;

use crate::descriptor::{dec_i32, hex_u16};
use crate::error::{syntax_error, Result};

const HELP_E: &str =
    "expected `E: <sec>.<usec> <type> <code> <value>`, type and code in hexadecimal";

/// One recorded input event. The type/code/value triple is passed through to the device
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub sec: u64,
    pub usec: u32,
    pub ev_type: u16,
    pub code: u16,
    pub value: i32,
}

impl EventRecord {
    pub fn new(sec: u64, usec: u32, ev_type: u16, code: u16, value: i32) -> Self {
        Self {
            sec,
            usec,
            ev_type,
            code,
            value,
        }
    }

    /// Recorded time in microseconds.
    pub fn timestamp_us(&self) -> i64 {
        i64::try_from(self.sec)
            .unwrap_or(i64::MAX)
            .saturating_mul(1_000_000)
            .saturating_add(i64::from(self.usec))
    }

    /// Parses the fields of an `E:` line, prefix already stripped.
    fn parse_fields(fields: &str, line: usize) -> Result<Self> {
        let fields: Vec<&str> = fields.split_whitespace().collect();
        let [time, ev_type, code, value] = fields[..] else {
            return Err(syntax_error(line, "wrong number of event fields", HELP_E));
        };
        let (sec, usec) = time.split_once('.').unwrap_or((time, "0"));
        let sec: u64 = sec
            .parse()
            .map_err(|_| syntax_error(line, format!("`{time}` is not a timestamp"), HELP_E))?;
        let usec = match usec.parse::<u32>() {
            Ok(usec) if usec < 1_000_000 => usec,
            _ => {
                return Err(syntax_error(
                    line,
                    format!("`{time}` has an invalid microsecond part"),
                    HELP_E,
                ))
            }
        };
        Ok(Self {
            sec,
            usec,
            ev_type: hex_u16(ev_type, line, HELP_E)?,
            code: hex_u16(code, line, HELP_E)?,
            value: dec_i32(value, line, HELP_E)?,
        })
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "E: {}.{:06} {:04x} {:04x} {}",
            self.sec, self.usec, self.ev_type, self.code, self.value
        )
    }
}

/// Lazily yields the `E:` lines of a stream as [`EventRecord`]s, in stream order.
///
/// Every other line is skipped, so a description followed by a recording can be read from the
/// start. Iteration ends at the end of the stream or after the first error.
pub struct EventReader<R> {
    reader: R,
    buf: String,
    line: usize,
    done: bool,
}

impl<R: BufRead> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line: 0,
            done: false,
        }
    }

    /// Number of lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for EventReader<R> {
    type Item = Result<EventRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    if let Some(fields) = self.buf.trim().strip_prefix("E:") {
                        let record = EventRecord::parse_fields(fields, self.line);
                        self.done = record.is_err();
                        return Some(record);
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}
