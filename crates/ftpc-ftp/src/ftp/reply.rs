//! Single-line server reply interpretation (RFC 959 §4.2).
//!
//! A reply line is `DDD<sp>text` (last line of a reply) or `DDD-<sp>text`
//! (continuation, more lines follow). Anything else is not a reply, which
//! during `STAT -l` means it is a raw listing entry.

use crate::ftp::error::{FtpError, FtpResult};

/// Borrowed view over one line received on the control connection
/// (line terminator already stripped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply<'a> {
    line: &'a str,
    valid: bool,
}

impl<'a> Reply<'a> {
    pub fn new(line: &'a str) -> Self {
        Self {
            line,
            valid: is_valid_format(line.as_bytes()),
        }
    }

    /// The raw line as received.
    pub fn line(&self) -> &'a str {
        self.line
    }

    pub fn is_valid_format(&self) -> bool {
        self.valid
    }

    /// `true` for the final line of a (possibly multi-line) reply.
    pub fn is_end_of_reply(&self) -> bool {
        self.valid && self.line.as_bytes()[3] == b' '
    }

    /// `true` for a `DDD-` continuation line.
    pub fn is_continuation(&self) -> bool {
        self.valid && self.line.as_bytes()[3] == b'-'
    }

    /// Numeric reply code in `1..=699`.
    ///
    /// `000` and `700` to `999` are well-formed but out of range, which is
    /// reported as [`FtpErrorKind::CodeOutOfRange`](crate::ftp::error::FtpErrorKind)
    /// rather than as an invalid reply.
    pub fn code(&self) -> FtpResult<u16> {
        self.require_valid()?;
        let code = self.line[..3]
            .parse::<u16>()
            .map_err(|_| FtpError::invalid_reply(format!("Invalid reply code in: '{}'", self.line)))?;
        if !(1..=699).contains(&code) {
            return Err(FtpError::code_out_of_range(code));
        }
        Ok(code)
    }

    /// 4yz reply.
    pub fn is_transient_negative(&self) -> FtpResult<bool> {
        Ok(self.first_digit()? == b'4')
    }

    /// 5yz reply.
    pub fn is_permanent_negative(&self) -> FtpResult<bool> {
        Ok(self.first_digit()? == b'5')
    }

    /// 4yz or 5yz reply.
    pub fn is_negative(&self) -> FtpResult<bool> {
        Ok(matches!(self.first_digit()?, b'4' | b'5'))
    }

    /// Text after the code and its separator.
    pub fn message(&self) -> FtpResult<&'a str> {
        self.require_valid()?;
        if self.is_continuation() {
            Ok(&self.line[5..])
        } else {
            Ok(&self.line[4..])
        }
    }

    /// Path between the first pair of double quotes, as in
    /// `257 "/home/ftp" is current directory.`
    pub fn quoted_path(&self) -> FtpResult<&'a str> {
        self.require_valid()?;
        let start = self
            .line
            .find('"')
            .ok_or_else(|| FtpError::malformed_path("Invalid path format in PWD reply."))?
            + 1;
        let len = self.line[start..]
            .find('"')
            .ok_or_else(|| FtpError::malformed_path("Invalid path format in PWD reply."))?;
        Ok(&self.line[start..start + len])
    }

    fn first_digit(&self) -> FtpResult<u8> {
        self.require_valid()?;
        Ok(self.line.as_bytes()[0])
    }

    fn require_valid(&self) -> FtpResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(FtpError::invalid_reply("Invalid server reply format."))
        }
    }
}

fn is_valid_format(line: &[u8]) -> bool {
    if line.len() < 4 || !line[..3].iter().all(u8::is_ascii_digit) {
        return false;
    }
    match line[3] {
        b' ' => true,
        b'-' => line.len() >= 5 && line[4] == b' ',
        _ => false,
    }
}
