//! `STAT -l` listing parser.
//!
//! Servers answer `STAT -l` with `ls -l` style lines on the control
//! connection. Three column layouts are accepted, told apart by the number
//! of whitespace-separated metadata tokens in front of the file name:
//!
//! ```text
//! -rw-r--r--  1 root  other  531 Jan 29 03:26 README    (8: owner and group)
//! -rw-r--r--  1 other  531 Jan 29 03:26 README          (7: group only)
//! -rw-r--r--  1  531 Jan 29 03:26 README                (6: neither)
//! ```
//!
//! The month token anchors the layout; everything after the month, day and
//! time-or-year tokens is the file name, spaces included.

use chrono::{Datelike, Local, Month, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use lazy_static::lazy_static;
use regex::Regex;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{FileKind, RemoteFile};

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"\S+").expect("valid token pattern");
    static ref CLOCK: Regex = Regex::new(r"^\d{2}:\d{2}$").expect("valid clock pattern");
}

/// Parse a listing batch against the local calendar date.
pub fn parse_listing<I, S>(lines: I, strict: bool) -> FtpResult<Vec<RemoteFile>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parse_listing_at(lines, Local::now().date_naive(), strict)
}

/// Parse a listing batch. `today` resolves entries that carry a time of
/// day instead of a year.
///
/// With `strict` the first bad line fails the whole batch; otherwise bad
/// lines are logged and skipped.
pub fn parse_listing_at<I, S>(lines: I, today: NaiveDate, strict: bool) -> FtpResult<Vec<RemoteFile>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut files = Vec::new();
    for line in lines {
        let line = line.as_ref();
        if line.trim().is_empty() || line.starts_with("total") {
            continue;
        }
        match parse_entry(line, today) {
            Ok(file) => files.push(file),
            Err(e) => {
                let e = FtpError::listing_parse(format!(
                    "Could not parse directory list entry '{}': {}",
                    line, e.message
                ));
                if strict {
                    return Err(e);
                }
                log::warn!("{}", e.message);
            }
        }
    }
    Ok(files)
}

/// Parse one listing line.
pub fn parse_entry(line: &str, today: NaiveDate) -> FtpResult<RemoteFile> {
    let tokens = tokenize(line);
    let month_idx = find_month_anchor(&tokens)?;

    let (_, permissions) = tokens[0];
    let (_, size_token) = tokens[month_idx - 1];
    let (_, month_token) = tokens[month_idx];
    let (_, day_token) = tokens
        .get(month_idx + 1)
        .copied()
        .ok_or_else(|| FtpError::listing_parse("Missing day token."))?;
    let (_, clock_token) = tokens
        .get(month_idx + 2)
        .copied()
        .ok_or_else(|| FtpError::listing_parse("Missing time or year token."))?;
    let (name_offset, _) = tokens
        .get(month_idx + 3)
        .copied()
        .ok_or_else(|| FtpError::listing_parse("Missing file name."))?;

    let mut name = &line[name_offset..];
    let kind = match name.find(" -> ") {
        Some(pos) => {
            name = &name[..pos];
            FileKind::Link
        }
        None => file_kind(permissions.as_bytes()[0]),
    };

    let size = size_token
        .parse::<u64>()
        .map_err(|_| FtpError::listing_parse(format!("Invalid size '{}'.", size_token)))?;

    Ok(RemoteFile {
        name: name.to_string(),
        kind,
        size,
        modified: assemble_date_time(month_token, day_token, clock_token, today)?,
    })
}

/// Build the modification time from the month, day and time-or-year tokens.
///
/// A bare year means midnight of that date. An `HH:MM` clock means the
/// entry is recent and the year was omitted: take `today`'s year, or the
/// previous one if that would place the date after `today`.
pub fn assemble_date_time(
    month_token: &str,
    day_token: &str,
    clock_token: &str,
    today: NaiveDate,
) -> FtpResult<NaiveDateTime> {
    let month = month_index(month_token)
        .ok_or_else(|| FtpError::listing_parse("Unknown month."))?;
    let day = day_token
        .parse::<u32>()
        .map_err(|_| FtpError::listing_parse(format!("Invalid day '{}'.", day_token)))?;

    let (date, hour, minute) = if !clock_token.contains(':') {
        let year = clock_token
            .parse::<i32>()
            .map_err(|_| FtpError::listing_parse(format!("Invalid year '{}'.", clock_token)))?;
        (NaiveDate::from_ymd_opt(year, month, day), 0, 0)
    } else if CLOCK.is_match(clock_token) {
        let clock = NaiveTime::parse_from_str(clock_token, "%H:%M")
            .map_err(|_| FtpError::listing_parse("Invalid date."))?;
        let date = match NaiveDate::from_ymd_opt(today.year(), month, day) {
            Some(d) if d <= today => Some(d),
            _ => previous_year(today.year() - 1, month, day),
        };
        (date, clock.hour(), clock.minute())
    } else {
        return Err(FtpError::listing_parse("Unknown clock/year format."));
    };

    date.and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| FtpError::listing_parse("Invalid date."))
}

/// The date in `year`, with Feb 29 falling back to Feb 28 when `year` is
/// not a leap year.
fn previous_year(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).or_else(|| {
        if month == 2 && day == 29 {
            NaiveDate::from_ymd_opt(year, 2, 28)
        } else {
            None
        }
    })
}

/// Whitespace-separated tokens with their byte offsets.
fn tokenize(line: &str) -> Vec<(usize, &str)> {
    TOKEN.find_iter(line).map(|m| (m.start(), m.as_str())).collect()
}

/// Index of the month token: 3, 4 or 5 (for 6, 7 or 8 metadata tokens),
/// directly preceded by the numeric size column.
fn find_month_anchor(tokens: &[(usize, &str)]) -> FtpResult<usize> {
    let anchor = (3..=5).find(|&i| {
        i < tokens.len()
            && month_index(tokens[i].1).is_some()
            && is_all_digits(tokens[i - 1].1)
    });
    match anchor {
        Some(i) => Ok(i),
        None if tokens.iter().any(|(_, t)| month_index(t).is_some()) => Err(
            FtpError::listing_parse("Unexpected number of meta-data tokens."),
        ),
        None => Err(FtpError::listing_parse("No month token found.")),
    }
}

/// Three-letter English month abbreviation, `Jan` = 1.
fn month_index(token: &str) -> Option<u32> {
    if token.len() != 3 {
        return None;
    }
    token.parse::<Month>().ok().map(|m| m.number_from_month())
}

fn is_all_digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Type from the first permissions character. `l` maps to a directory
/// because a link is only recognisable as such by its `->` target.
fn file_kind(type_char: u8) -> FileKind {
    match type_char {
        b'-' => FileKind::File,
        b'd' | b'l' => FileKind::Directory,
        _ => FileKind::Other,
    }
}
