//! Voucher extraction from message bodies.
//!
//! Parsing is an ordered chain of pure strategies. The first strategy that
//! returns a voucher wins; when every strategy declines the message is
//! skipped. Declining is a normal outcome, not an error.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use self::amount::ExchangeRate;

pub mod amount;
pub mod bac;
pub mod dates;
pub mod generic;

/// Best-available bodies of one message. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBodies {
    pub html: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVoucher {
    pub merchant: String,
    pub occurred_at: DateTime<Utc>,
    /// Whole units of `currency`.
    pub amount: i64,
    pub currency: String,
    pub meta: BTreeMap<String, String>,
}

/// Inputs shared by every strategy. Injected so strategies stay pure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseContext {
    pub usd_to_crc: ExchangeRate,
}

pub type ParseStrategy = fn(&MessageBodies, &ParseContext) -> Option<ParsedVoucher>;

#[derive(Debug, Clone)]
pub struct VoucherParser {
    strategies: Vec<(&'static str, ParseStrategy)>,
    context: ParseContext,
}

impl VoucherParser {
    /// The default chain: the BAC notification template, then the generic
    /// fallback.
    pub fn new(usd_to_crc: ExchangeRate) -> Self {
        Self::with_strategies(
            ParseContext { usd_to_crc },
            vec![("bac", bac::parse), ("generic", generic::parse)],
        )
    }

    pub fn with_strategies(
        context: ParseContext,
        strategies: Vec<(&'static str, ParseStrategy)>,
    ) -> Self {
        Self {
            strategies,
            context,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|(name, _)| *name).collect()
    }

    pub fn parse(&self, bodies: &MessageBodies) -> Option<ParsedVoucher> {
        for (name, strategy) in &self.strategies {
            if let Some(voucher) = strategy(bodies, &self.context) {
                debug!(strategy = name, merchant = %voucher.merchant, "voucher parsed");
                return Some(voucher);
            }
        }
        None
    }
}

/// Render the text of an HTML document's `<body>`.
///
/// Block-level elements and table cells start new lines while inline markup
/// (`<strong>`, `<span>`, `<a>`, ...) stays on the line it appears in. Each
/// line has its whitespace collapsed and empty lines are dropped. Script and
/// style contents are skipped.
pub fn html_body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next());
    let root = body.unwrap_or_else(|| document.root_element());

    let mut rendered = String::new();
    render_text(root, &mut rendered);

    rendered
        .lines()
        .map(flatten_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            // Source line breaks inside a text run are layout, not content.
            out.extend(text.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }));
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };

        let name = child.value().name();
        if matches!(name, "script" | "style" | "head" | "template") {
            continue;
        }
        let block = is_block_element(name);
        if block {
            out.push('\n');
        }
        render_text(child, out);
        if block {
            out.push('\n');
        }
    }
}

fn is_block_element(name: &str) -> bool {
    matches!(
        name,
        "address"
            | "article"
            | "aside"
            | "blockquote"
            | "br"
            | "caption"
            | "center"
            | "dd"
            | "div"
            | "dl"
            | "dt"
            | "fieldset"
            | "figure"
            | "footer"
            | "form"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "header"
            | "hr"
            | "li"
            | "main"
            | "nav"
            | "ol"
            | "p"
            | "pre"
            | "section"
            | "table"
            | "tbody"
            | "td"
            | "tfoot"
            | "th"
            | "thead"
            | "tr"
            | "ul"
    )
}

pub fn flatten_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
