//! Loose `Merchant:` / `USD` fallback.
//!
//! This template carries no transaction date, and a voucher is never emitted
//! without one, so the strategy currently always declines. New vendor formats
//! that do carry a date plug in at [`Candidate::into_voucher`].

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::amount::{find_amount, format_cents, to_ledger, Currency, SourceAmount};
use super::{flatten_whitespace, MessageBodies, ParseContext, ParsedVoucher};

fn merchant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Merchant:\s*([^|]+?)\s*(?:\||$)").expect("invalid merchant regex"))
}

/// Fields recognized before the date requirement is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub merchant: String,
    pub amount: SourceAmount,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl Candidate {
    pub fn into_voucher(self, context: &ParseContext) -> Option<ParsedVoucher> {
        let occurred_at = self.occurred_at?;
        let ledger = to_ledger(self.amount, context.usd_to_crc)?;

        let mut meta = BTreeMap::new();
        if let Some(original) = ledger.original {
            meta.insert("originalCurrency".to_string(), original.currency.as_str().to_string());
            meta.insert("originalAmount".to_string(), format_cents(original.cents));
        }

        Some(ParsedVoucher {
            merchant: self.merchant,
            occurred_at,
            amount: ledger.amount,
            currency: ledger.currency.to_string(),
            meta,
        })
    }
}

pub fn candidate(bodies: &MessageBodies) -> Option<Candidate> {
    let text = flatten_whitespace(bodies.text.as_deref()?);
    if text.is_empty() {
        return None;
    }

    let merchant = merchant_re()
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty())?;
    let amount = find_amount(&text).filter(|amount| amount.currency == Currency::Usd)?;

    Some(Candidate {
        merchant,
        amount,
        occurred_at: None,
    })
}

pub fn parse(bodies: &MessageBodies, context: &ParseContext) -> Option<ParsedVoucher> {
    candidate(bodies)?.into_voucher(context)
}
