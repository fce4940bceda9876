//! Rule-based category assignment.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::db::models::{MerchantRule, OTHERS_CATEGORY};
use crate::db::{Database, DbError};

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule_id: String,
    pub name: String,
    pub category_id: String,
    pub priority: i64,
    regex: Regex,
}

/// A user's active rules, compiled once and kept in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn load(db: &Database, user_id: &str) -> Result<Self, DbError> {
        Ok(Self::compile(db.active_rules(user_id)?))
    }

    /// Compiles rules in the given order. A pattern that fails to compile is
    /// logged and left out; it never blocks the remaining rules.
    pub fn compile(rules: Vec<MerchantRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                let compiled = RegexBuilder::new(&rule.pattern).case_insensitive(true).build();
                match compiled {
                    Ok(regex) => Some(CompiledRule {
                        rule_id: rule.id,
                        name: rule.name,
                        category_id: rule.category_id,
                        priority: rule.priority,
                        regex,
                    }),
                    Err(error) => {
                        warn!(
                            rule_id = %rule.id,
                            rule = %rule.name,
                            pattern = %rule.pattern,
                            "skipping merchant rule with invalid pattern: {error}"
                        );
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    /// First match in priority order.
    pub fn first_match(&self, merchant_normalized: &str) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(merchant_normalized))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Category for a merchant under a preloaded rule set, falling back to the
/// user's `Others` category (created on first use).
pub fn categorize_with(
    db: &Database,
    rules: &RuleSet,
    user_id: &str,
    merchant_normalized: &str,
) -> Result<String, DbError> {
    if let Some(rule) = rules.first_match(merchant_normalized) {
        return Ok(rule.category_id.clone());
    }
    Ok(db.ensure_category(user_id, OTHERS_CATEGORY)?.id)
}

pub fn categorize(db: &Database, user_id: &str, merchant_normalized: &str) -> Result<String, DbError> {
    let rules = RuleSet::load(db, user_id)?;
    categorize_with(db, &rules, user_id, merchant_normalized)
}
