use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDate;

use super::SyncError;

/// A calendar month selected for ingestion, parsed from `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMonth {
    year: i32,
    month: u32,
    start: NaiveDate,
    end: NaiveDate,
}

impl SyncMonth {
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let invalid = || SyncError::Validation(format!("month must be YYYY-MM, got '{raw}'"));

        let bytes = raw.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return Err(invalid());
        }
        let (year, month) = (&raw[..4], &raw[5..]);
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(SyncError::Validation(format!(
                "month must be between 01 and 12, got '{raw}'"
            )));
        }

        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let end = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(invalid)?;

        Ok(Self {
            year,
            month,
            start,
            end,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First day of the month.
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// First day of the following month (exclusive bound).
    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

impl FromStr for SyncMonth {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for SyncMonth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Mailbox search for voucher-like messages received during `month`.
pub fn build_month_query(month: SyncMonth) -> String {
    format!(
        "after:{} before:{} ( subject:(Notificación de transacción OR \"Notificacion de transaccion\" OR voucher OR comprobante) OR from:(bac OR notificaciones OR no-reply) OR (\"DLC* UBER\" OR \"UBER RIDES\") )",
        month.start().format("%Y/%m/%d"),
        month.end().format("%Y/%m/%d"),
    )
}
