pub mod json;
pub mod table;

use anyhow::Result;
use serde::Serialize;

use crate::db::models::{MerchantRule, Transaction, User};
use crate::db::SpendSummary;
use crate::sync::UserSyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionItem {
    #[serde(flatten)]
    pub transaction: Transaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleItem {
    #[serde(flatten)]
    pub rule: MerchantRule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserItem {
    #[serde(flatten)]
    pub user: User,
    pub transactions: i64,
}

pub fn format_sync_reports(
    format: OutputFormat,
    month: &str,
    reports: &[UserSyncReport],
) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_sync_reports(month, reports)),
        OutputFormat::Json => json::format_sync_reports(month, reports),
    }
}

pub fn format_transactions(format: OutputFormat, items: &[TransactionItem]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_transactions(items)),
        OutputFormat::Json => json::format_transactions(items),
    }
}

pub fn format_rules(format: OutputFormat, items: &[RuleItem]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_rules(items)),
        OutputFormat::Json => json::format_rules(items),
    }
}

pub fn format_users(format: OutputFormat, items: &[UserItem]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_users(items)),
        OutputFormat::Json => json::format_users(items),
    }
}

pub fn format_summary(format: OutputFormat, month: &str, summary: &SpendSummary) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_summary(month, summary)),
        OutputFormat::Json => json::format_summary(month, summary),
    }
}
