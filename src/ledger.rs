//! Voucher fingerprinting and idempotent persistence.
//!
//! The fingerprint is the only identity of a voucher: two messages with the
//! same normalized merchant, amount and currency inside the same minute are the
//! same transaction, whatever their message ids.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::db::models::{Transaction, GMAIL_SOURCE};
use crate::db::{Database, DbError, InsertOutcome};
use crate::normalize::normalize_merchant;
use crate::parsing::ParsedVoucher;

/// Where a voucher came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMessageMeta {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
}

/// `YYYY-MM-DDTHH:MM:00.000Z`: seconds and sub-seconds zeroed.
pub fn minute_key(occurred_at: DateTime<Utc>) -> String {
    occurred_at.format("%Y-%m-%dT%H:%M:00.000Z").to_string()
}

/// Hex SHA-256 of `merchant|amount|currency|minute`.
pub fn fingerprint(
    merchant_normalized: &str,
    amount: i64,
    currency: &str,
    occurred_at: DateTime<Utc>,
) -> String {
    let key = format!(
        "{merchant_normalized}|{amount}|{currency}|{}",
        minute_key(occurred_at)
    );
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn build_transaction(
    user_id: &str,
    voucher: &ParsedVoucher,
    category_id: &str,
    source: &SourceMessageMeta,
) -> Transaction {
    let merchant_normalized = normalize_merchant(&voucher.merchant);
    let fingerprint = fingerprint(
        &merchant_normalized,
        voucher.amount,
        &voucher.currency,
        voucher.occurred_at,
    );

    Transaction {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        category_id: category_id.to_string(),
        source: GMAIL_SOURCE.to_string(),
        external_message_id: source.message_id.clone(),
        external_thread_id: source.thread_id.clone(),
        email_subject: source.subject.clone(),
        email_from: source.from.clone(),
        occurred_at: voucher
            .occurred_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        amount: voucher.amount,
        currency: voucher.currency.clone(),
        merchant_raw: voucher.merchant.clone(),
        merchant_normalized,
        fingerprint,
        meta: (!voucher.meta.is_empty()).then(|| voucher.meta.clone()),
        created_at: None,
    }
}

/// Insert the voucher unless its fingerprint is already stored for the user.
/// A fingerprint collision is reported as [`InsertOutcome::Duplicate`]; every
/// other storage failure is an error.
pub fn persist(
    db: &Database,
    user_id: &str,
    voucher: &ParsedVoucher,
    category_id: &str,
    source: &SourceMessageMeta,
) -> Result<InsertOutcome, DbError> {
    let transaction = build_transaction(user_id, voucher, category_id, source);
    let outcome = db.insert_transaction(&transaction)?;
    debug!(
        user_id,
        message_id = %source.message_id,
        fingerprint = %transaction.fingerprint,
        ?outcome,
        "voucher persisted"
    );
    Ok(outcome)
}
