//! Amount and currency extraction.
//!
//! Ledger amounts are whole units of the base currency (CRC). Source amounts
//! are parsed into integer cents without touching floating point; USD is
//! converted with a fixed-point rate and rounded half-up at two points: to
//! cents when parsing, then to whole CRC after conversion.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

pub const BASE_CURRENCY: &str = "CRC";

const RATE_SCALE: i128 = 10_000;
const RATE_FRACTION_DIGITS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Crc,
    Usd,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crc => "CRC",
            Self::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRC" => Ok(Self::Crc),
            "USD" => Ok(Self::Usd),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}

/// Units of CRC per USD, stored in ten-thousandths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeRate {
    ten_thousandths: i64,
}

impl ExchangeRate {
    pub fn from_ten_thousandths(ten_thousandths: i64) -> Option<Self> {
        (ten_thousandths > 0).then_some(Self { ten_thousandths })
    }

    /// Convert USD cents to whole CRC, rounding half-up.
    pub fn convert_cents(self, cents: i64) -> Option<i64> {
        let scaled = i128::from(cents) * i128::from(self.ten_thousandths);
        let divisor = 100 * RATE_SCALE;
        let rounded = (scaled + divisor / 2).div_euclid(divisor);
        i64::try_from(rounded).ok()
    }
}

impl FromStr for ExchangeRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
        if whole.is_empty()
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
            || fraction.len() > RATE_FRACTION_DIGITS
        {
            return Err(format!("invalid exchange rate '{raw}'"));
        }

        let whole: i64 = whole
            .parse()
            .map_err(|_| format!("exchange rate out of range: '{raw}'"))?;
        let fraction_scaled: i64 = format!("{fraction:0<width$}", width = RATE_FRACTION_DIGITS)
            .parse()
            .map_err(|_| format!("invalid exchange rate fraction: '{raw}'"))?;

        whole
            .checked_mul(RATE_SCALE as i64)
            .and_then(|v| v.checked_add(fraction_scaled))
            .and_then(Self::from_ten_thousandths)
            .ok_or_else(|| format!("exchange rate must be positive: '{raw}'"))
    }
}

impl Display for ExchangeRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let scale = RATE_SCALE as i64;
        write!(
            f,
            "{}.{:04}",
            self.ten_thousandths / scale,
            self.ten_thousandths % scale
        )
    }
}

/// An amount as written in the message, in minor units of its own currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceAmount {
    pub currency: Currency,
    pub cents: i64,
}

/// An amount ready for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAmount {
    pub amount: i64,
    pub currency: &'static str,
    pub original: Option<SourceAmount>,
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(CRC|USD)\s*\$?\s*(\d[\d,]*(?:\.\d+)?)").expect("valid amount regex")
    })
}

/// Find the first `CRC`/`USD` amount in `text`.
pub fn find_amount(text: &str) -> Option<SourceAmount> {
    let caps = amount_re().captures(text)?;
    let currency = caps.get(1)?.as_str().parse::<Currency>().ok()?;
    let cents = parse_decimal_cents(caps.get(2)?.as_str())?;
    Some(SourceAmount { currency, cents })
}

/// Parse `3,490.00` style numbers into cents. Fractions beyond two digits
/// round half-up.
pub fn parse_decimal_cents(raw: &str) -> Option<i64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let (whole, fraction) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = whole.parse().ok()?;
    let mut digits = fraction.bytes().map(|b| i64::from(b - b'0'));
    let tenths = digits.next().unwrap_or(0);
    let hundredths = digits.next().unwrap_or(0);
    let round_up = digits.next().is_some_and(|d| d >= 5);

    whole
        .checked_mul(100)?
        .checked_add(tenths * 10 + hundredths + i64::from(round_up))
}

/// Express a source amount in the ledger's base currency.
///
/// CRC keeps whole colones (any fraction is dropped); USD is converted with
/// `usd_to_crc` and remembers the original amount.
pub fn to_ledger(source: SourceAmount, usd_to_crc: ExchangeRate) -> Option<LedgerAmount> {
    match source.currency {
        Currency::Crc => Some(LedgerAmount {
            amount: source.cents / 100,
            currency: BASE_CURRENCY,
            original: None,
        }),
        Currency::Usd => Some(LedgerAmount {
            amount: usd_to_crc.convert_cents(source.cents)?,
            currency: BASE_CURRENCY,
            original: Some(source),
        }),
    }
}

pub fn format_cents(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
