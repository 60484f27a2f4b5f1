//! Delimited-file reading and field sanitisation shared by all importers.
//!
//! Input arrives as any [`Read`] stream. Comma files use standard CSV quoting;
//! the pipe-delimited state extracts are read with quoting disabled because
//! names in them may contain bare `"` characters.
//!
//! Fields keep their surrounding whitespace; only NUL bytes are removed.
//! [`Row::text`] gives the trimmed value for keys and codes. Lines that are
//! completely empty are not records at all: the `csv` reader skips them and
//! they produce neither a row nor an issue.

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveTime, Utc};
use regex::Regex;

use crate::error::ImportError;
use crate::import::outcome::RowIssue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Pipe,
}

/// One physical record from the input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub line: u64,
    pub fields: Vec<String>,
}

impl Row {
    /// Field at `index` as read, or the empty string when the row is short.
    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    /// Field at `index` with surrounding whitespace removed.
    pub fn text(&self, index: usize) -> &str {
        self.field(index).trim()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A record that could be read, or one that could not be decoded.
#[derive(Debug)]
pub enum Line {
    Row(Row),
    Unreadable(RowIssue),
}

/// Iterator over sanitised records of a delimited stream.
///
/// Decoding problems (bad UTF-8, malformed quoting) surface as
/// [`Line::Unreadable`] so the caller can record them and keep going; I/O
/// failures end the import with an [`ImportError`].
pub struct Rows<R> {
    reader: csv::Reader<R>,
    record: csv::StringRecord,
}

impl<R: Read> Rows<R> {
    pub fn new(input: R, delimiter: Delimiter, has_header: bool) -> Self {
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(has_header).flexible(true);
        match delimiter {
            Delimiter::Comma => {
                builder.delimiter(b',');
            }
            Delimiter::Pipe => {
                builder.delimiter(b'|').quoting(false);
            }
        }

        Self {
            reader: builder.from_reader(input),
            record: csv::StringRecord::new(),
        }
    }
}

impl<R: Read> Iterator for Rows<R> {
    type Item = Result<Line, ImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                let fields = self.record.iter().map(strip_nul).collect();
                Some(Ok(Line::Row(Row { line, fields })))
            }
            Err(err) if err.is_io_error() => Some(Err(ImportError::from(err))),
            Err(err) => {
                let issue = match err.position() {
                    Some(pos) => RowIssue::at(pos.line(), format!("Row skipped: unreadable record ({err})")),
                    None => RowIssue::general(format!("Row skipped: unreadable record ({err})")),
                };
                Some(Ok(Line::Unreadable(issue)))
            }
        }
    }
}

/// Remove NUL bytes, which PostgreSQL text columns reject.
pub fn strip_nul(raw: &str) -> String {
    if raw.contains('\0') {
        raw.replace('\0', "")
    } else {
        raw.to_string()
    }
}

/// Truncate to at most `max_chars` characters (never splitting a code point).
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}

/// Truncated text, or `None` when empty.
pub fn optional_text(value: &str, max_chars: usize) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(truncate_chars(value, max_chars))
    }
}

/// Four-digit-ish numeric field; anything non-numeric becomes `None`.
pub fn parse_birth_year(value: &str) -> Option<i32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<i32>().ok()
}

/// Leading integer of a vote field.
///
/// Leading whitespace and an optional sign are accepted, and parsing stops at
/// the first non-digit, so `""` is 0 and `"1,234"` is 1. Values saturate at
/// the `i32` range. Only a negative count is rejected.
pub fn parse_votes(value: &str) -> Option<i32> {
    let value = value.trim_start();
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };

    let mut votes: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        votes = (votes * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
    }
    if negative {
        votes = -votes;
    }

    if votes < 0 {
        None
    } else {
        Some(votes.min(i64::from(i32::MAX)) as i32)
    }
}

fn parse_compact_date(digits: &str) -> Option<NaiveDate> {
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = digits[0..4].parse::<i32>().ok()?;
    let month = digits[4..6].parse::<u32>().ok()?;
    let day = digits[6..8].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%Y/%m/%d"];

/// Normalise a free-form date string.
///
/// Returns `Ok(None)` for empty input and `Err` with the raw text when the value
/// cannot be understood. Common state-export formats are tried first, then
/// `dateparser` handles anything else (interpreted at UTC midnight so the
/// calendar day never shifts).
pub fn parse_date(value: &str) -> Result<Option<NaiveDate>, String> {
    if value.is_empty() {
        return Ok(None);
    }

    if let Some(date) = parse_compact_date(value) {
        return Ok(Some(date));
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(Some(date));
        }
    }

    match dateparser::parse_with(value, &Utc, NaiveTime::MIN) {
        Ok(dt) => Ok(Some(dt.date_naive())),
        Err(e) => Err(format!("invalid date `{}`: {}", value, e)),
    }
}

fn filename_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{8})").expect("static regex is valid"))
}

/// Final path component of an uploaded filename.
pub fn base_filename(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

/// Election date for a results file.
///
/// A leading `YYYYMMDD` in the file's base name wins; otherwise `today`. A
/// leading eight digits that do not form a calendar date is rejected rather
/// than silently replaced.
pub fn election_date_from_filename(
    filename: &str,
    today: NaiveDate,
) -> Result<NaiveDate, ImportError> {
    let base = base_filename(filename);
    match filename_date_pattern().captures(&base) {
        Some(caps) => {
            let digits = &caps[1];
            parse_compact_date(digits)
                .ok_or_else(|| ImportError::InvalidElectionDate(digits.to_string()))
        }
        None => Ok(today),
    }
}
