//! Scans an input string (source file) character by character.

use std::path::Path;

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

pub struct Scanner<'a> {
    buf: &'a [u8],
    pub ofs: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        if !buf.ends_with(b"\0") {
            panic!("Scanner requires nul-terminated buf");
        }
        Scanner { buf, ofs: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.ofs >= self.buf.len() - 1
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        // Safety: the input was validated as UTF-8 before constructing the
        // Scanner, and slices are only taken at character boundaries the
        // parser has walked over.
        unsafe { std::str::from_utf8_unchecked(self.buf.get_unchecked(start..end)) }
    }

    pub fn peek(&self) -> char {
        unsafe { *self.buf.get_unchecked(self.ofs) as char }
    }

    pub fn next(&mut self) {
        if self.ofs == self.buf.len() {
            panic!("scanned past end")
        }
        self.ofs += 1;
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        self.parse_error_at(self.ofs, msg)
    }

    /// An error anchored to an earlier offset, for reporting problems on a
    /// line that has already been consumed.
    pub fn parse_error_at<T, S: Into<String>>(&self, ofs: usize, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs,
        })
    }

    /// Render an error with filename, line number, and a caret pointing at
    /// the offending column.
    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        let mut msg = format!("parse error: {}\n", err.msg);

        let mut line_start = 0;
        let mut line_number = 1;
        for (i, &c) in self.buf.iter().enumerate() {
            if i == err.ofs {
                break;
            }
            if c == b'\n' {
                line_start = i + 1;
                line_number += 1;
            }
        }
        let line_end = self.buf[line_start..]
            .iter()
            .position(|&c| c == b'\n' || c == 0)
            .map(|n| line_start + n)
            .unwrap_or(self.buf.len() - 1);

        let prefix = format!("{}:{}: ", filename.display(), line_number);
        let mut context = self.slice(line_start, line_end);
        let mut col = err.ofs - line_start;
        msg.push_str(&prefix);
        if col > 40 {
            msg.push_str("...");
            context = &context[col - 20..];
            col = 3 + 20;
        }
        if context.len() > 40 {
            msg.push_str(&context[..40]);
            msg.push_str("...");
        } else {
            msg.push_str(context);
        }
        msg.push('\n');
        msg.push_str(&" ".repeat(prefix.len() + col));
        msg.push_str("^\n");
        msg
    }
}
