use std::collections::BTreeMap;

use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

pub const OTHERS_CATEGORY: &str = "Others";
pub const GMAIL_SOURCE: &str = "gmail";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub created_at: Option<String>,
}

/// OAuth token set for one user. `expires_at` is unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub user_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MerchantRule {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub pattern: String,
    pub category_id: String,
    pub priority: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub category_id: String,
    pub source: String,
    pub external_message_id: String,
    pub external_thread_id: Option<String>,
    pub email_subject: Option<String>,
    pub email_from: Option<String>,
    pub occurred_at: String,
    pub amount: i64,
    pub currency: String,
    pub merchant_raw: String,
    pub merchant_normalized: String,
    pub fingerprint: String,
    pub meta: Option<BTreeMap<String, String>>,
    pub created_at: Option<String>,
}

fn parse_meta(raw: Option<String>) -> Option<BTreeMap<String, String>> {
    raw.and_then(|s| serde_json::from_str::<BTreeMap<String, String>>(&s).ok())
}

impl User {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl Credential {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            provider: row.get("provider")?,
            access_token: row.get("access_token")?,
            refresh_token: row.get("refresh_token")?,
            expires_at: row.get("expires_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl Category {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
        })
    }
}

impl MerchantRule {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            pattern: row.get("pattern")?,
            category_id: row.get("category_id")?,
            priority: row.get("priority")?,
            is_active: row.get("is_active")?,
        })
    }
}

impl Transaction {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            category_id: row.get("category_id")?,
            source: row.get("source")?,
            external_message_id: row.get("external_message_id")?,
            external_thread_id: row.get("external_thread_id")?,
            email_subject: row.get("email_subject")?,
            email_from: row.get("email_from")?,
            occurred_at: row.get("occurred_at")?,
            amount: row.get("amount")?,
            currency: row.get("currency")?,
            merchant_raw: row.get("merchant_raw")?,
            merchant_normalized: row.get("merchant_normalized")?,
            fingerprint: row.get("fingerprint")?,
            meta: parse_meta(row.get("meta_json")?),
            created_at: row.get("created_at")?,
        })
    }
}
