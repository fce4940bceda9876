//! Per-user, per-month ingestion loop.
//!
//! For every user the orchestrator searches the mailbox for the month, pages
//! through the results under a page cap and runs each message through
//! extraction, parsing, categorization and persistence. Work is sequential:
//! one user, one page, one message at a time.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::categorize::{categorize_with, RuleSet};
use crate::config::{DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE};
use crate::db::models::User;
use crate::db::{Database, DbError, InsertOutcome};
use crate::gmail::credentials::CredentialError;
use crate::gmail::types::GmailMessageStub;
use crate::gmail::{mime, MessageSource, SourceApiError};
use crate::ledger::{self, SourceMessageMeta};
use crate::normalize::normalize_merchant;
use crate::parsing::VoucherParser;

pub mod month;

pub use self::month::{build_month_query, SyncMonth};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("credential error: {0}")]
    Credential(CredentialError),

    #[error("source api error: {0}")]
    SourceApi(SourceApiError),

    #[error("persistence error: {0}")]
    Persistence(#[from] DbError),
}

impl From<CredentialError> for SyncError {
    fn from(error: CredentialError) -> Self {
        Self::Credential(error)
    }
}

impl From<SourceApiError> for SyncError {
    fn from(error: SourceApiError) -> Self {
        match error {
            SourceApiError::Credential(error) => Self::Credential(error),
            other => Self::SourceApi(other),
        }
    }
}

/// Counts for one user. `error` is set when that user's sync was aborted;
/// the counts then cover the work done before the abort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSyncReport {
    pub user_id: String,
    pub imported: u32,
    pub skipped: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UserSyncReport {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub page_size: u32,
    /// Hard bound on result pages per user. Reaching it is not an error.
    pub max_pages: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Imported,
    Duplicate,
    Declined,
    /// The message could not be fetched or decoded on its own.
    Unavailable,
}

pub struct SyncOrchestrator {
    db: Arc<Database>,
    source: Arc<dyn MessageSource>,
    parser: VoucherParser,
    options: SyncOptions,
}

impl SyncOrchestrator {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn MessageSource>,
        parser: VoucherParser,
        options: SyncOptions,
    ) -> Self {
        Self {
            db,
            source,
            parser,
            options,
        }
    }

    /// Sync `month` for every user, or only `only_user` (id or email).
    ///
    /// Input is validated before any mailbox call. A user whose sync fails
    /// gets an error in their report and the remaining users still run.
    pub async fn run(
        &self,
        month: &str,
        only_user: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserSyncReport>, SyncError> {
        let month = SyncMonth::parse(month)?;
        let users = self.select_users(only_user)?;
        info!(month = %month, users = users.len(), "starting voucher sync");

        let mut reports = Vec::with_capacity(users.len());
        for user in users {
            if cancel.is_cancelled() {
                info!(month = %month, "sync cancelled before remaining users");
                break;
            }
            reports.push(self.sync_user(&user.id, month, cancel).await);
        }
        Ok(reports)
    }

    fn select_users(&self, only_user: Option<&str>) -> Result<Vec<User>, SyncError> {
        match only_user {
            Some(key) => self
                .db
                .get_user(key)?
                .map(|user| vec![user])
                .ok_or_else(|| SyncError::Validation(format!("unknown user '{key}'"))),
            None => Ok(self.db.list_users()?),
        }
    }

    pub async fn sync_user(
        &self,
        user_id: &str,
        month: SyncMonth,
        cancel: &CancellationToken,
    ) -> UserSyncReport {
        let mut report = UserSyncReport::new(user_id);
        match self.sync_user_pages(user_id, month, cancel, &mut report).await {
            Ok(()) => info!(
                user_id,
                month = %month,
                imported = report.imported,
                skipped = report.skipped,
                "user sync finished"
            ),
            Err(err) => {
                error!(
                    user_id,
                    month = %month,
                    imported = report.imported,
                    skipped = report.skipped,
                    "user sync aborted: {err}"
                );
                report.error = Some(err.to_string());
            }
        }
        report
    }

    async fn sync_user_pages(
        &self,
        user_id: &str,
        month: SyncMonth,
        cancel: &CancellationToken,
        report: &mut UserSyncReport,
    ) -> Result<(), SyncError> {
        let rules = RuleSet::load(&self.db, user_id)?;
        let query = build_month_query(month);
        let mut page_token: Option<String> = None;

        for page in 1..=self.options.max_pages {
            if cancel.is_cancelled() {
                info!(user_id, page, "sync cancelled at page boundary");
                return Ok(());
            }

            let listing = self
                .source
                .list_messages(user_id, &query, self.options.page_size, page_token.as_deref())
                .await?;
            info!(user_id, page, messages = listing.messages.len(), "processing result page");

            for stub in &listing.messages {
                if cancel.is_cancelled() {
                    info!(user_id, page, "sync cancelled at message boundary");
                    return Ok(());
                }

                match self.process_message(user_id, stub, &rules).await {
                    Ok(MessageOutcome::Imported) => report.imported += 1,
                    Ok(
                        MessageOutcome::Duplicate
                        | MessageOutcome::Declined
                        | MessageOutcome::Unavailable,
                    ) => report.skipped += 1,
                    Err(SyncError::Persistence(err)) => {
                        warn!(user_id, message_id = %stub.id, "skipping message after storage failure: {err}");
                        report.skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }

            match listing.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(()),
            }
        }

        info!(
            user_id,
            max_pages = self.options.max_pages,
            "page cap reached, stopping early"
        );
        Ok(())
    }

    async fn process_message(
        &self,
        user_id: &str,
        stub: &GmailMessageStub,
        rules: &RuleSet,
    ) -> Result<MessageOutcome, SyncError> {
        let message = match self.source.get_message_full(user_id, &stub.id).await {
            Ok(message) => message,
            Err(err) if is_message_level_failure(&err) => {
                warn!(user_id, message_id = %stub.id, "skipping message that could not be fetched: {err}");
                return Ok(MessageOutcome::Unavailable);
            }
            Err(err) => return Err(err.into()),
        };
        let headers = mime::extract_headers(&message);
        let bodies = mime::find_bodies(&message);

        let Some(voucher) = self.parser.parse(&bodies) else {
            debug!(user_id, message_id = %stub.id, "no voucher recognized, skipping");
            return Ok(MessageOutcome::Declined);
        };

        let merchant_normalized = normalize_merchant(&voucher.merchant);
        let category_id = categorize_with(&self.db, rules, user_id, &merchant_normalized)?;
        let source = SourceMessageMeta {
            message_id: stub.id.clone(),
            thread_id: stub.thread_id.clone().or_else(|| message.thread_id.clone()),
            subject: headers.get("subject").cloned(),
            from: headers.get("from").cloned(),
        };

        let outcome = match ledger::persist(&self.db, user_id, &voucher, &category_id, &source)? {
            InsertOutcome::Created => MessageOutcome::Imported,
            InsertOutcome::Duplicate => MessageOutcome::Duplicate,
        };
        Ok(outcome)
    }
}

/// Fetch failures that concern one message only: it vanished between list
/// and get, or its payload did not decode. Anything else (credentials,
/// throttling, server errors) aborts the user's sync.
fn is_message_level_failure(error: &SourceApiError) -> bool {
    match error {
        SourceApiError::Decode(_) => true,
        SourceApiError::Status { status, .. } => matches!(status, 404 | 410),
        _ => false,
    }
}
