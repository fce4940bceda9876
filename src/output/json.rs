use anyhow::Result;
use serde_json::json;

use crate::db::SpendSummary;
use crate::output::{RuleItem, TransactionItem, UserItem};
use crate::sync::UserSyncReport;

pub fn format_sync_reports(month: &str, reports: &[UserSyncReport]) -> Result<String> {
    Ok(serde_json::to_string_pretty(&json!({
        "ok": true,
        "month": month,
        "results": reports,
    }))?)
}

pub fn format_transactions(items: &[TransactionItem]) -> Result<String> {
    Ok(serde_json::to_string_pretty(items)?)
}

pub fn format_rules(items: &[RuleItem]) -> Result<String> {
    Ok(serde_json::to_string_pretty(items)?)
}

pub fn format_users(items: &[UserItem]) -> Result<String> {
    Ok(serde_json::to_string_pretty(items)?)
}

pub fn format_summary(month: &str, summary: &SpendSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(&json!({
        "month": month,
        "currency": "CRC",
        "total": summary.total,
        "transactionsCount": summary.transactions_count,
        "spendByCategory": summary.spend_by_category,
    }))?)
}
