//! Merchant name canonicalization.
//!
//! The canonical form is the comparison key for categorization rules and the
//! merchant component of the voucher fingerprint, so it must stay stable.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub fn strip_diacritics(raw: &str) -> String {
    raw.nfd().filter(|ch| !is_combining_mark(*ch)).collect()
}

/// Canonicalize a free-text merchant name.
///
/// Diacritics are removed, the text is upper-cased, `* _ # |` become spaces,
/// anything other than letters, digits, whitespace, `.` and `-` is dropped, and
/// whitespace runs collapse to one space.
pub fn normalize_merchant(raw: &str) -> String {
    let upper = strip_diacritics(raw).to_uppercase();

    let cleaned: String = upper
        .chars()
        .filter_map(|ch| match ch {
            '*' | '_' | '#' | '|' => Some(' '),
            c if c.is_alphanumeric() || c.is_whitespace() || c == '.' || c == '-' => Some(c),
            _ => None,
        })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::{normalize_merchant, strip_diacritics};

    #[test]
    fn strips_accents_and_uppercases() {
        assert_eq!(normalize_merchant("Panadería Él Túnel"), "PANADERIA EL TUNEL");
        assert_eq!(strip_diacritics("Autorización"), "Autorizacion");
    }

    #[test]
    fn separators_become_single_spaces() {
        assert_eq!(normalize_merchant("DLC* UBER   RIDES"), "DLC UBER RIDES");
        assert_eq!(normalize_merchant("PAYPAL #SPOTIFY|P1"), "PAYPAL SPOTIFY P1");
        assert_eq!(normalize_merchant("AUTO_MERCADO  ESCAZU"), "AUTO MERCADO ESCAZU");
    }

    #[test]
    fn drops_disallowed_punctuation_but_keeps_dot_and_dash() {
        assert_eq!(normalize_merchant("AMZN Mktp (US), Inc."), "AMZN MKTP US INC.");
        assert_eq!(normalize_merchant("7-ELEVEN @ SAN JOSÉ!"), "7-ELEVEN SAN JOSE");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_merchant("  Café   Britt* Tienda ");
        assert_eq!(once, "CAFE BRITT TIENDA");
        assert_eq!(normalize_merchant(&once), once);
    }

    #[test]
    fn empty_and_symbol_only_inputs_normalize_to_empty() {
        assert_eq!(normalize_merchant(""), "");
        assert_eq!(normalize_merchant("***"), "");
    }
}
