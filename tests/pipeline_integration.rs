use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vouch::db::models::{Credential, MerchantRule, OTHERS_CATEGORY};
use vouch::db::{Database, TransactionFilters};
use vouch::gmail::types::{GmailBody, GmailHeader, GmailMessage, GmailMessageStub, GmailPayload};
use vouch::gmail::{MessagePage, MessageSource, SourceApiError};
use vouch::parsing::VoucherParser;
use vouch::sync::{SyncOptions, SyncOrchestrator};

fn temp_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("vouch-pipeline-it-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("create temp test root");
    root
}

/// Single-page mailbox keyed by message id.
struct StaticMailbox {
    messages: Vec<GmailMessage>,
}

#[async_trait]
impl MessageSource for StaticMailbox {
    async fn list_messages(
        &self,
        _user_id: &str,
        _query: &str,
        _page_size: u32,
        _page_token: Option<&str>,
    ) -> Result<MessagePage, SourceApiError> {
        Ok(MessagePage {
            messages: self
                .messages
                .iter()
                .map(|message| GmailMessageStub {
                    id: message.id.clone(),
                    thread_id: message.thread_id.clone(),
                })
                .collect(),
            next_page_token: None,
        })
    }

    async fn get_message_full(
        &self,
        _user_id: &str,
        message_id: &str,
    ) -> Result<GmailMessage, SourceApiError> {
        self.messages
            .iter()
            .find(|message| message.id == message_id)
            .cloned()
            .ok_or_else(|| SourceApiError::Status {
                status: 404,
                body: format!("message {message_id} not found"),
            })
    }
}

fn message(id: &str, mime_type: &str, body: &str) -> GmailMessage {
    GmailMessage {
        id: id.to_string(),
        thread_id: Some(format!("thread-{id}")),
        snippet: None,
        payload: Some(GmailPayload {
            mime_type: Some("multipart/alternative".to_string()),
            headers: Some(vec![
                GmailHeader {
                    name: "Subject".to_string(),
                    value: "Notificación de transacción".to_string(),
                },
                GmailHeader {
                    name: "From".to_string(),
                    value: "BAC Credomatic <notificacion@notificacionesbaccr.com>".to_string(),
                },
            ]),
            parts: Some(vec![GmailPayload {
                mime_type: Some(mime_type.to_string()),
                body: Some(GmailBody {
                    size: Some(body.len() as u64),
                    data: Some(URL_SAFE_NO_PAD.encode(body)),
                    attachment_id: None,
                }),
                ..GmailPayload::default()
            }]),
            ..GmailPayload::default()
        }),
        internal_date: None,
    }
}

fn html_voucher(id: &str, merchant: &str, fecha: &str, amount: &str) -> GmailMessage {
    let html = format!(
        "<html><body><table>\
         <tr><td>Comercio:</td><td>{merchant}</td></tr>\
         <tr><td>Fecha:</td><td>{fecha}</td></tr>\
         <tr><td>Monto:</td><td>{amount}</td></tr>\
         <tr><td>Autorización:</td><td>004512</td></tr>\
         </table></body></html>"
    );
    message(id, "text/html", &html)
}

fn mailbox() -> Arc<StaticMailbox> {
    Arc::new(StaticMailbox {
        messages: vec![
            html_voucher("m1", "DLC* UBER RIDES", "Dic 5, 2025, 14:30", "CRC 3,490.00"),
            // Same charge delivered twice within the minute.
            html_voucher("m2", "DLC*  UBER RIDES", "Dic 5, 2025, 14:30", "CRC 3,490.00"),
            message(
                "m3",
                "text/plain",
                "Comercio: NETFLIX.COM\nFecha: Dic 12, 2025, 09:00\nMonto: USD 12.34\n",
            ),
            message("m4", "text/plain", "Promociones del mes: Comercio: TIENDA sin monto"),
        ],
    })
}

fn orchestrator(db: Arc<Database>) -> SyncOrchestrator {
    SyncOrchestrator::new(
        db,
        mailbox(),
        VoucherParser::new("505.00".parse().expect("rate")),
        SyncOptions::default(),
    )
}

fn register_user(db: &Database) -> String {
    let user = db.insert_user("ana@example.com").expect("insert user");
    db.upsert_credential(&Credential {
        user_id: user.id.clone(),
        provider: "google".to_string(),
        access_token: "token".to_string(),
        refresh_token: Some("refresh".to_string()),
        expires_at: Some(chrono::Utc::now().timestamp() + 3600),
        updated_at: None,
    })
    .expect("store credential");

    let transport = db.ensure_category(&user.id, "Transport").expect("category");
    db.insert_rule(&MerchantRule {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        name: "Rides".to_string(),
        pattern: "uber".to_string(),
        category_id: transport.id,
        priority: 10,
        is_active: true,
    })
    .expect("insert rule");
    user.id
}

#[tokio::test]
async fn month_sync_imports_vouchers_once_across_reopened_database() {
    let root = temp_root();
    let db_path = root.join("vouch.db");

    let user_id = {
        let db = Arc::new(Database::open(&db_path).expect("open db"));
        let user_id = register_user(&db);

        let reports = orchestrator(db.clone())
            .run("2025-12", None, &CancellationToken::new())
            .await
            .expect("sync");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].user_id, user_id);
        assert_eq!(reports[0].imported, 2);
        assert_eq!(reports[0].skipped, 2);
        assert!(reports[0].error.is_none());
        user_id
    };

    let db = Arc::new(Database::open(&db_path).expect("reopen db"));
    let reports = orchestrator(db.clone())
        .run("2025-12", Some("ana@example.com"), &CancellationToken::new())
        .await
        .expect("rerun");
    assert_eq!(reports[0].imported, 0);
    assert_eq!(reports[0].skipped, 4);

    let categories: HashMap<String, String> = db
        .list_categories(&user_id)
        .expect("categories")
        .into_iter()
        .map(|category| (category.id, category.name))
        .collect();

    let transactions = db
        .list_transactions(&TransactionFilters {
            user_id: user_id.clone(),
            occurred_from: Some("2025-12-01T00:00:00Z".to_string()),
            occurred_until: Some("2026-01-01T00:00:00Z".to_string()),
            limit: 10,
        })
        .expect("list transactions");
    assert_eq!(transactions.len(), 2);

    // Newest first.
    let netflix = &transactions[0];
    assert_eq!(netflix.merchant_normalized, "NETFLIX.COM");
    assert_eq!(netflix.amount, 6232);
    assert_eq!(netflix.currency, "CRC");
    assert_eq!(netflix.occurred_at, "2025-12-12T09:00:00Z");
    assert_eq!(categories[&netflix.category_id], OTHERS_CATEGORY);
    let meta = netflix.meta.as_ref().expect("conversion meta");
    assert_eq!(meta.get("originalCurrency").map(String::as_str), Some("USD"));

    let uber = &transactions[1];
    assert_eq!(uber.merchant_raw, "DLC* UBER RIDES");
    assert_eq!(uber.merchant_normalized, "DLC UBER RIDES");
    assert_eq!(uber.amount, 3490);
    assert_eq!(uber.external_message_id, "m1");
    assert_eq!(uber.external_thread_id.as_deref(), Some("thread-m1"));
    assert_eq!(uber.email_subject.as_deref(), Some("Notificación de transacción"));
    assert_eq!(categories[&uber.category_id], "Transport");

    let counts = db.transaction_counts().expect("counts");
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].count, 2);

    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn november_window_finds_nothing_for_december_charges() {
    let db = Arc::new(Database::open_in_memory().expect("open db"));
    let user_id = register_user(&db);

    orchestrator(db.clone())
        .run("2025-12", None, &CancellationToken::new())
        .await
        .expect("sync");

    let november = db
        .list_transactions(&TransactionFilters {
            user_id,
            occurred_from: Some("2025-11-01T00:00:00Z".to_string()),
            occurred_until: Some("2025-12-01T00:00:00Z".to_string()),
            limit: 10,
        })
        .expect("list transactions");
    assert!(november.is_empty());
}
