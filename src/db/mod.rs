use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{ffi, params, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use self::models::{Category, Credential, MerchantRule, Transaction, User};

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),
}

pub mod migrations;
pub mod models;
pub mod schema;

/// Outcome of an insert guarded by a storage-level unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Duplicate,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilters {
    pub user_id: String,
    /// Inclusive lower bound on `occurred_at` (RFC 3339).
    pub occurred_from: Option<String>,
    /// Exclusive upper bound on `occurred_at` (RFC 3339).
    pub occurred_until: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserTransactionCount {
    pub user_id: String,
    pub count: i64,
}

/// Spend in one category over a summary window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySpend {
    pub category: String,
    pub total: i64,
    pub transactions: i64,
}

/// Totals for one user over `[from, until)`, largest category first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendSummary {
    pub total: i64,
    pub transactions_count: i64,
    pub spend_by_category: Vec<CategorySpend>,
}

/// SQLite-backed store. The connection sits behind a mutex so the handle can
/// be shared across tasks; the guard is never held across an await point.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, DbError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&conn).map_err(|e| DbError::Config(format!("migration failed: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn default_db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DbError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".vouch").join("vouch.db"))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn
            .lock()
            .map_err(|_| DbError::Config("database connection lock poisoned".to_string()))
    }

    pub fn insert_user(&self, email: &str) -> Result<User, DbError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, email) VALUES (?, ?)",
            params![id, email.trim()],
        )?;
        let user = conn.query_row(
            "SELECT id, email, created_at FROM users WHERE id = ?",
            [id.as_str()],
            User::from_row,
        )?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>, DbError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, created_at FROM users WHERE id = ? OR email = ? LIMIT 1",
                params![id, id],
                User::from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>, DbError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, email, created_at FROM users ORDER BY created_at ASC, id ASC")?;
        let users = stmt
            .query_map([], User::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn upsert_credential(&self, credential: &Credential) -> Result<(), DbError> {
        self.conn()?.execute(
            r#"
            INSERT INTO credentials (user_id, provider, access_token, refresh_token, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(user_id) DO UPDATE SET
                provider = excluded.provider,
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, credentials.refresh_token),
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![
                credential.user_id,
                credential.provider,
                credential.access_token,
                credential.refresh_token,
                credential.expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_credential(&self, user_id: &str) -> Result<Option<Credential>, DbError> {
        let conn = self.conn()?;
        let credential = conn
            .query_row(
                r#"
                SELECT user_id, provider, access_token, refresh_token, expires_at, updated_at
                FROM credentials
                WHERE user_id = ?
                "#,
                [user_id],
                Credential::from_row,
            )
            .optional()?;
        Ok(credential)
    }

    /// Stores a refreshed access token. The refresh token is left untouched.
    pub fn update_access_token(
        &self,
        user_id: &str,
        access_token: &str,
        expires_at: i64,
    ) -> Result<(), DbError> {
        let updated = self.conn()?.execute(
            r#"
            UPDATE credentials
            SET access_token = ?, expires_at = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
            WHERE user_id = ?
            "#,
            params![access_token, expires_at, user_id],
        )?;
        if updated == 0 {
            return Err(DbError::Config(format!(
                "no credential row to update for user {user_id}"
            )));
        }
        Ok(())
    }

    /// Get-or-create keyed on `(user_id, name)`. Safe under concurrent callers
    /// because the unique index arbitrates the insert.
    pub fn ensure_category(&self, user_id: &str, name: &str) -> Result<Category, DbError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO categories (id, user_id, name)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, name) DO NOTHING
            "#,
            params![Uuid::new_v4().to_string(), user_id, name],
        )?;
        let category = conn.query_row(
            "SELECT id, user_id, name FROM categories WHERE user_id = ? AND name = ?",
            params![user_id, name],
            Category::from_row,
        )?;
        Ok(category)
    }

    pub fn list_categories(&self, user_id: &str) -> Result<Vec<Category>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, user_id, name FROM categories WHERE user_id = ? ORDER BY name ASC")?;
        let categories = stmt
            .query_map([user_id], Category::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    pub fn insert_rule(&self, rule: &MerchantRule) -> Result<(), DbError> {
        self.conn()?.execute(
            r#"
            INSERT INTO merchant_rules (id, user_id, name, pattern, category_id, priority, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                rule.id,
                rule.user_id,
                rule.name,
                rule.pattern,
                rule.category_id,
                rule.priority,
                rule.is_active,
            ],
        )?;
        Ok(())
    }

    /// Active rules in evaluation order: ascending priority, then name.
    pub fn active_rules(&self, user_id: &str) -> Result<Vec<MerchantRule>, DbError> {
        self.query_rules(
            r#"
            SELECT id, user_id, name, pattern, category_id, priority, is_active
            FROM merchant_rules
            WHERE user_id = ? AND is_active = 1
            ORDER BY priority ASC, name ASC
            "#,
            user_id,
        )
    }

    pub fn list_rules(&self, user_id: &str) -> Result<Vec<MerchantRule>, DbError> {
        self.query_rules(
            r#"
            SELECT id, user_id, name, pattern, category_id, priority, is_active
            FROM merchant_rules
            WHERE user_id = ?
            ORDER BY priority ASC, name ASC
            "#,
            user_id,
        )
    }

    fn query_rules(&self, sql: &str, user_id: &str) -> Result<Vec<MerchantRule>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rules = stmt
            .query_map([user_id], MerchantRule::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Inserts a transaction, reporting a `(user_id, fingerprint)` collision as
    /// [`InsertOutcome::Duplicate`]. Every other failure is returned as an error.
    pub fn insert_transaction(&self, txn: &Transaction) -> Result<InsertOutcome, DbError> {
        let meta_json = txn.meta.as_ref().map(serde_json::to_string).transpose()?;

        let result = self.conn()?.execute(
            r#"
            INSERT INTO transactions (
                id, user_id, category_id, source, external_message_id, external_thread_id,
                email_subject, email_from, occurred_at, amount, currency, merchant_raw,
                merchant_normalized, fingerprint, meta_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                txn.id,
                txn.user_id,
                txn.category_id,
                txn.source,
                txn.external_message_id,
                txn.external_thread_id,
                txn.email_subject,
                txn.email_from,
                txn.occurred_at,
                txn.amount,
                txn.currency,
                txn.merchant_raw,
                txn.merchant_normalized,
                txn.fingerprint,
                meta_json,
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(error) if is_fingerprint_conflict(&error) => Ok(InsertOutcome::Duplicate),
            Err(error) => Err(error.into()),
        }
    }

    pub fn list_transactions(&self, filters: &TransactionFilters) -> Result<Vec<Transaction>, DbError> {
        let mut sql = String::from(
            r#"
            SELECT id, user_id, category_id, source, external_message_id, external_thread_id,
                   email_subject, email_from, occurred_at, amount, currency, merchant_raw,
                   merchant_normalized, fingerprint, meta_json, created_at
            FROM transactions
            WHERE user_id = ?
            "#,
        );
        let mut params_vec: Vec<Box<dyn ToSql>> = vec![Box::new(filters.user_id.clone())];

        if let Some(from) = &filters.occurred_from {
            sql.push_str(" AND occurred_at >= ?");
            params_vec.push(Box::new(from.clone()));
        }
        if let Some(until) = &filters.occurred_until {
            sql.push_str(" AND occurred_at < ?");
            params_vec.push(Box::new(until.clone()));
        }

        let limit = if filters.limit == 0 { 50 } else { filters.limit };
        sql.push_str(" ORDER BY occurred_at DESC, id ASC LIMIT ?");
        params_vec.push(Box::new(limit as i64));

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|v| v.as_ref()).collect();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let results = stmt
            .query_map(params_refs.as_slice(), Transaction::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// Ledger amounts are already in CRC, so the totals need no conversion.
    pub fn month_summary(
        &self,
        user_id: &str,
        occurred_from: &str,
        occurred_until: &str,
    ) -> Result<SpendSummary, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT COALESCE(c.name, 'Uncategorized') AS category,
                   SUM(t.amount) AS total,
                   COUNT(*) AS transactions
            FROM transactions t
            LEFT JOIN categories c ON c.id = t.category_id
            WHERE t.user_id = ? AND t.occurred_at >= ? AND t.occurred_at < ?
            GROUP BY t.category_id
            ORDER BY total DESC, category ASC
            "#,
        )?;
        let spend_by_category = stmt
            .query_map(params![user_id, occurred_from, occurred_until], |row| {
                Ok(CategorySpend {
                    category: row.get(0)?,
                    total: row.get(1)?,
                    transactions: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(SpendSummary {
            total: spend_by_category.iter().map(|spend| spend.total).sum(),
            transactions_count: spend_by_category.iter().map(|spend| spend.transactions).sum(),
            spend_by_category,
        })
    }

    pub fn transaction_counts(&self) -> Result<Vec<UserTransactionCount>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, COUNT(*) AS count FROM transactions GROUP BY user_id ORDER BY count DESC",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(UserTransactionCount {
                    user_id: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}

fn is_fingerprint_conflict(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(failure, Some(message)) => {
            failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                && message.contains("transactions.fingerprint")
        }
        _ => false,
    }
}
