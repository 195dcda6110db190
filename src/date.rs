//! `YYYYMMDD` date tokens

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A validated export date, kept as the digit strings it was written with.
///
/// Only the shape is checked, not the calendar: the token exists to build
/// directory names, so `20241399` is as good as any other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDate {
    pub yyyy: String,
    pub mm: String,
    pub dd: String,
}

impl ExportDate {
    /// Parse an 8-digit `YYYYMMDD` token.
    pub fn parse(token: &str) -> Result<Self> {
        if token.len() != 8 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidDate(token.to_string()));
        }
        Ok(Self {
            yyyy: token[0..4].to_string(),
            mm: token[4..6].to_string(),
            dd: token[6..8].to_string(),
        })
    }

    /// The original `YYYYMMDD` token.
    pub fn as_token(&self) -> String {
        format!("{}{}{}", self.yyyy, self.mm, self.dd)
    }
}

impl FromStr for ExportDate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ExportDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.yyyy, self.mm, self.dd)
    }
}
