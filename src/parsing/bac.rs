//! BAC transaction notification template.
//!
//! The notification lays out label/value pairs such as
//! `Comercio: DLC* UBER RIDES`, `Fecha: Ene 30, 2026, 15:06` and
//! `Monto: CRC 3,490.00`. Merchant, date and amount are all required; a
//! partial match declines instead of guessing.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use super::amount::{find_amount, format_cents, to_ledger};
use super::dates::find_fecha;
use super::{flatten_whitespace, html_body_text, MessageBodies, ParseContext, ParsedVoucher};

fn comercio_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Comercio:\s*([\p{L}\p{N}*._\- \t]+)").expect("invalid comercio regex")
    })
}

fn autorizacion_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Autorizaci[oó]n:\s*([0-9]+)").expect("invalid autorizacion regex")
    })
}

fn referencia_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Referencia:\s*([0-9]+)").expect("invalid referencia regex"))
}

pub fn parse(bodies: &MessageBodies, context: &ParseContext) -> Option<ParsedVoucher> {
    if let Some(html) = bodies.html.as_deref() {
        if let Some(voucher) = extract(&html_body_text(html), context) {
            return Some(voucher);
        }
    }

    // Plaintext is only trusted when it carries a full date; without one the
    // message is skipped rather than imported with a guessed timestamp.
    let text = flatten_whitespace(bodies.text.as_deref()?);
    extract(&text, context)
}

fn extract(text: &str, context: &ParseContext) -> Option<ParsedVoucher> {
    let merchant = find_merchant(text)?;
    let occurred_at = find_fecha(text)?;
    let ledger = to_ledger(find_amount(text)?, context.usd_to_crc)?;

    let mut meta = BTreeMap::new();
    if let Some(authorization) = capture(autorizacion_re(), text) {
        meta.insert("authorization".to_string(), authorization);
    }
    if let Some(reference) = capture(referencia_re(), text) {
        meta.insert("reference".to_string(), reference);
    }
    if let Some(original) = ledger.original {
        meta.insert(
            "originalCurrency".to_string(),
            original.currency.as_str().to_string(),
        );
        meta.insert("originalAmount".to_string(), format_cents(original.cents));
    }

    Some(ParsedVoucher {
        merchant,
        occurred_at,
        amount: ledger.amount,
        currency: ledger.currency.to_string(),
        meta,
    })
}

/// The merchant value ends at a line break or at the next label. When the
/// capture runs straight into another `Label:`, the trailing word is that
/// label's name and is dropped.
fn find_merchant(text: &str) -> Option<String> {
    let caps = comercio_re().captures(text)?;
    let value = caps.get(1)?;
    let mut merchant = value.as_str().trim();

    if text[value.end()..].starts_with(':') {
        merchant = merchant
            .rsplit_once(char::is_whitespace)
            .map(|(head, _)| head.trim_end())
            .unwrap_or("");
    }

    (!merchant.is_empty()).then(|| merchant.to_string())
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
