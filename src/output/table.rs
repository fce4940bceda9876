use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::SpendSummary;
use crate::output::{RuleItem, TransactionItem, UserItem};
use crate::sync::UserSyncReport;

const USER_WIDTH: usize = 36;
const DATE_WIDTH: usize = 16;
const MERCHANT_WIDTH: usize = 32;
const AMOUNT_WIDTH: usize = 14;
const CATEGORY_WIDTH: usize = 18;
const PATTERN_WIDTH: usize = 32;

pub fn format_sync_reports(month: &str, reports: &[UserSyncReport]) -> String {
    if reports.is_empty() {
        return format!("No users to sync for {month}.");
    }

    let mut out = String::new();
    out.push_str(&format!("Sync {month}\n\n"));
    out.push_str(&format!(
        "{:<user$}  {:>8}  {:>8}  {}\n",
        "User",
        "Imported",
        "Skipped",
        "Status",
        user = USER_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(USER_WIDTH),
        "-".repeat(8),
        "-".repeat(8),
        "-".repeat(6)
    ));

    for report in reports {
        let status = match &report.error {
            Some(error) => format!("aborted: {error}"),
            None => "ok".to_string(),
        };
        out.push_str(&format!(
            "{:<user$}  {:>8}  {:>8}  {}\n",
            truncate_for_width(&report.user_id, USER_WIDTH),
            report.imported,
            report.skipped,
            status,
            user = USER_WIDTH
        ));
    }

    let imported: u32 = reports.iter().map(|r| r.imported).sum();
    let skipped: u32 = reports.iter().map(|r| r.skipped).sum();
    out.push_str(&format!("\nTotal: {imported} imported, {skipped} skipped\n"));
    out
}

pub fn format_transactions(items: &[TransactionItem]) -> String {
    if items.is_empty() {
        return "No transactions found.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<date$}  {:<merchant$}  {:>amount$}  {:<category$}\n",
        "Date",
        "Merchant",
        "Amount",
        "Category",
        date = DATE_WIDTH,
        merchant = MERCHANT_WIDTH,
        amount = AMOUNT_WIDTH,
        category = CATEGORY_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(DATE_WIDTH),
        "-".repeat(MERCHANT_WIDTH),
        "-".repeat(AMOUNT_WIDTH),
        "-".repeat(CATEGORY_WIDTH)
    ));

    for item in items {
        let txn = &item.transaction;
        let date: String = txn.occurred_at.replace('T', " ").chars().take(DATE_WIDTH).collect();
        let amount = format!("{} {}", group_thousands(txn.amount), txn.currency);
        out.push_str(&format!(
            "{:<date$}  {:<merchant$}  {:>amount$}  {:<category$}\n",
            date,
            truncate_for_width(&txn.merchant_raw, MERCHANT_WIDTH),
            amount,
            truncate_for_width(item.category.as_deref().unwrap_or("-"), CATEGORY_WIDTH),
            date = DATE_WIDTH,
            merchant = MERCHANT_WIDTH,
            amount = AMOUNT_WIDTH,
            category = CATEGORY_WIDTH
        ));
    }

    out
}

pub fn format_rules(items: &[RuleItem]) -> String {
    if items.is_empty() {
        return "No merchant rules defined.".to_string();
    }

    let mut out = String::new();
    out.push_str("Priority  Name                  Pattern                           Category            Active\n");
    out.push_str("--------  --------------------  --------------------------------  ------------------  ------\n");
    for item in items {
        out.push_str(&format!(
            "{:>8}  {:<20}  {:<pattern$}  {:<category$}  {}\n",
            item.rule.priority,
            truncate_for_width(&item.rule.name, 20),
            truncate_for_width(&item.rule.pattern, PATTERN_WIDTH),
            truncate_for_width(item.category.as_deref().unwrap_or("-"), CATEGORY_WIDTH),
            if item.rule.is_active { "yes" } else { "no" },
            pattern = PATTERN_WIDTH,
            category = CATEGORY_WIDTH
        ));
    }
    out
}

pub fn format_users(items: &[UserItem]) -> String {
    if items.is_empty() {
        return "No users registered.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<user$}  {:<32}  {:>12}\n",
        "ID",
        "Email",
        "Transactions",
        user = USER_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}\n",
        "-".repeat(USER_WIDTH),
        "-".repeat(32),
        "-".repeat(12)
    ));
    for item in items {
        out.push_str(&format!(
            "{:<user$}  {:<32}  {:>12}\n",
            item.user.id,
            truncate_for_width(&item.user.email, 32),
            item.transactions,
            user = USER_WIDTH
        ));
    }
    out
}

pub fn format_summary(month: &str, summary: &SpendSummary) -> String {
    if summary.spend_by_category.is_empty() {
        return format!("No transactions in {month}.");
    }

    let mut out = String::new();
    out.push_str(&format!("Spend {month} (CRC)\n\n"));
    out.push_str(&format!(
        "{:<category$}  {:>12}  {:>amount$}\n",
        "Category",
        "Transactions",
        "Amount",
        category = CATEGORY_WIDTH,
        amount = AMOUNT_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}\n",
        "-".repeat(CATEGORY_WIDTH),
        "-".repeat(12),
        "-".repeat(AMOUNT_WIDTH)
    ));
    for spend in &summary.spend_by_category {
        out.push_str(&format!(
            "{:<category$}  {:>12}  {:>amount$}\n",
            truncate_for_width(&spend.category, CATEGORY_WIDTH),
            spend.transactions,
            group_thousands(spend.total),
            category = CATEGORY_WIDTH,
            amount = AMOUNT_WIDTH
        ));
    }
    out.push_str(&format!(
        "\nTotal: {} CRC across {} transactions\n",
        group_thousands(summary.total),
        summary.transactions_count
    ));
    out
}

/// `1234567` -> `1,234,567`.
fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}
