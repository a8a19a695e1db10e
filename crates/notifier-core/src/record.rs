//! Records to notify about and the messages composed from them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::QueryError;

/// One datastore row to notify about today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Given name.
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
}

impl Record {
    /// Create a record from a name pair.
    #[must_use]
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// Name pair joined for display, tolerating a missing half.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (self.first_name.trim(), self.last_name.trim()) {
            (first, "") => first.to_string(),
            ("", last) => last.to_string(),
            (first, last) => format!("{first} {last}"),
        }
    }
}

/// Text bound for one destination chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination chat identifier.
    pub chat_id: String,
    /// Message text.
    pub body: String,
}

impl OutboundMessage {
    /// Compose the birthday greeting for a record.
    #[must_use]
    pub fn greeting(chat_id: impl Into<String>, record: &Record) -> Self {
        Self {
            chat_id: chat_id.into(),
            body: format!("🎉 Happy Birthday, {}! 🎂🥳", record.display_name()),
        }
    }
}

/// Check a calendar month/day pair before it reaches a datastore.
///
/// Checked against a leap year, so February 29 is accepted.
///
/// # Errors
/// Returns `QueryError::InvalidDate` when the pair names no calendar day.
pub fn validate_month_day(month: u32, day: u32) -> Result<(), QueryError> {
    NaiveDate::from_ymd_opt(2000, month, day)
        .map(|_| ())
        .ok_or(QueryError::InvalidDate { month, day })
}
