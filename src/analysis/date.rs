//! Expiry date extraction from recognized text
//!
//! Finds the first `day [sep] month [sep] year?` sequence in OCR output,
//! fills in or expands the year, and validates the result as a calendar date.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Earliest year accepted by default
pub const DEFAULT_MIN_YEAR: i32 = 2020;
/// Latest year accepted by default
pub const DEFAULT_MAX_YEAR: i32 = 2050;

/// Day and month are two digits, the year two or four. Separators are
/// optional; digit boundaries keep the match from starting or ending inside a
/// longer number.
static DATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?:^|[^0-9])
        (?P<day>0[1-9]|[12][0-9]|3[01])
        \s*[./-]?\s*
        (?P<month>0[1-9]|1[0-2])
        (?:
            \s*[./-]?\s*
            (?P<year>[0-9]{4}|[0-9]{2})
        )?
        (?:[^0-9]|$)
        ",
    )
    .unwrap_or_else(|e| panic!("Failed to compile date pattern: {e}"))
});

static USER_INPUT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([0-9]{1,2})\s*[./-]\s*([0-9]{1,2})\s*[./-]\s*([0-9]{4})\s*$")
        .unwrap_or_else(|e| panic!("Failed to compile input pattern: {e}"))
});

/// Rejected manually entered date
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateInputError {
    #[error("expected a date formatted as dd/mm/yyyy, got {0:?}")]
    Format(String),

    #[error("{day:02}/{month:02}/{year} is not a calendar date")]
    InvalidDate { day: u32, month: u32, year: i32 },

    #[error("year {year} is outside {min}..={max}")]
    OutOfRange { year: i32, min: i32, max: i32 },
}

/// A validated calendar date with its normalized `dd/mm/yyyy` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedDate {
    pub day: u32,
    pub month: u32,
    pub year: i32,
    /// `dd/mm/yyyy`, used for deduplication and display
    pub normalized: String,
}

impl ParsedDate {
    /// Build a date, returning `None` for impossible combinations such as 30/02
    pub fn new(day: u32, month: u32, year: i32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self::from_naive)
    }

    /// Build from a chrono date
    pub fn from_naive(date: NaiveDate) -> Self {
        Self {
            day: date.day(),
            month: date.month(),
            year: date.year(),
            normalized: date.format("%d/%m/%Y").to_string(),
        }
    }

    /// Parse a user-typed `dd/mm/yyyy` date for the manual override path,
    /// accepting years in the default range.
    pub fn from_user_input(input: &str) -> Result<Self, DateInputError> {
        DateExtractor::default().parse_user_input(input)
    }

    /// The date as a chrono value
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl fmt::Display for ParsedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Extracts expiry dates from recognized text
#[derive(Debug, Clone)]
pub struct DateExtractor {
    min_year: i32,
    max_year: i32,
}

impl Default for DateExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_YEAR, DEFAULT_MAX_YEAR)
    }
}

impl DateExtractor {
    /// Create an extractor accepting years in `[min_year, max_year]`
    pub fn new(min_year: i32, max_year: i32) -> Self {
        Self { min_year, max_year }
    }

    /// Parse a user-typed `dd/mm/yyyy` date.
    ///
    /// Single-digit day and month are accepted; the year must be four digits
    /// and inside the extractor's year range.
    pub fn parse_user_input(&self, input: &str) -> Result<ParsedDate, DateInputError> {
        let caps = USER_INPUT_PATTERN
            .captures(input)
            .ok_or_else(|| DateInputError::Format(input.to_string()))?;

        let field = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();
        let day: u32 = field(1).parse().map_err(|_| DateInputError::Format(input.to_string()))?;
        let month: u32 = field(2).parse().map_err(|_| DateInputError::Format(input.to_string()))?;
        let year: i32 = field(3).parse().map_err(|_| DateInputError::Format(input.to_string()))?;

        if !(self.min_year..=self.max_year).contains(&year) {
            return Err(DateInputError::OutOfRange {
                year,
                min: self.min_year,
                max: self.max_year,
            });
        }

        ParsedDate::new(day, month, year).ok_or(DateInputError::InvalidDate { day, month, year })
    }

    /// Extract a date using today's calendar year for year-less matches
    pub fn extract_now(&self, text: &str) -> Option<ParsedDate> {
        self.extract(text, chrono::Local::now().year())
    }

    /// Extract the first date-like sequence from `text`.
    ///
    /// Only the first pattern match is considered. If it carries an
    /// out-of-range year or is not a real calendar date the whole text yields
    /// `None`; later matches are not tried.
    pub fn extract(&self, text: &str, current_year: i32) -> Option<ParsedDate> {
        let caps = DATE_PATTERN.captures(text)?;

        let day: u32 = caps.name("day")?.as_str().parse().ok()?;
        let month: u32 = caps.name("month")?.as_str().parse().ok()?;

        let year = match caps.name("year") {
            None => current_year,
            Some(m) => {
                let digits = m.as_str();
                let value: i32 = digits.parse().ok()?;
                let year = if digits.len() == 2 { 2000 + value } else { value };
                if !(self.min_year..=self.max_year).contains(&year) {
                    debug!(year, min = self.min_year, max = self.max_year, "Rejected date with out-of-range year");
                    return None;
                }
                year
            }
        };

        let parsed = ParsedDate::new(day, month, year);
        if parsed.is_none() {
            debug!(day, month, year, "Rejected impossible calendar date");
        }
        parsed
    }
}
