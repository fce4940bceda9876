use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

/// Spanish month abbreviation to month number (1-12). `set` is the Costa
/// Rican spelling of September.
pub fn spanish_month(abbrev: &str) -> Option<u32> {
    let month = match abbrev.to_lowercase().as_str() {
        "ene" => 1,
        "feb" => 2,
        "mar" => 3,
        "abr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "ago" => 8,
        "sep" | "set" => 9,
        "oct" => 10,
        "nov" => 11,
        "dic" => 12,
        _ => return None,
    };
    Some(month)
}

fn fecha_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Fecha:\s*([A-Za-z]{3})\s+(\d{1,2}),\s+(\d{4}),\s*(\d{1,2}):(\d{2})")
            .expect("invalid fecha regex")
    })
}

/// Extract `Fecha: Dic 5, 2025, 14:30` as a UTC timestamp. Impossible
/// calendar values (Feb 30, 25:00) yield `None`.
pub fn find_fecha(text: &str) -> Option<DateTime<Utc>> {
    let caps = fecha_re().captures(text)?;
    let month = spanish_month(caps.get(1)?.as_str())?;
    let day: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year: i32 = caps.get(3)?.as_str().parse().ok()?;
    let hour: u32 = caps.get(4)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(5)?.as_str().parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
}
