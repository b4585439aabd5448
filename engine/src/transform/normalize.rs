//! Column name normalization.
//!
//! The default strategy first applies the configured character translation
//! map, then converts to snake_case:
//!
//! | input          | output              |
//! |----------------|---------------------|
//! | `CustomerID`   | `customer_id`       |
//! | `HTMLLink`     | `html_link`         |
//! | `Profit&Loss`  | `profit_and_loss`   |
//! | `First Name`   | `first_name`        |
//! | `__batch_id`   | `__batch_id`        |

use std::collections::{BTreeMap, HashMap};

use crate::config::Config;
use crate::error::{EtlResult, SchemaError};
use crate::frame::{Field, Frame, Schema};

/// Replace every occurrence of the map's keys, longest key first. Inserted
/// replacements are not translated again.
pub fn character_translation(name: &str, map: &BTreeMap<String, String>) -> String {
    let mut keys: Vec<(&str, &str)> = map
        .iter()
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    'scan: while let Some(c) = rest.chars().next() {
        for (from, to) in &keys {
            if let Some(tail) = rest.strip_prefix(from) {
                out.push_str(to);
                rest = tail;
                continue 'scan;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Convert PascalCase, camelCase, spaced or hyphenated names to snake_case.
///
/// A leading run of underscores is kept as is. Whitespace, hyphens and
/// underscores in the remainder collapse to a single underscore, and
/// trailing separators are dropped.
pub fn to_snake_case(name: &str) -> String {
    let trimmed = name.trim();
    let body = trimmed.trim_start_matches('_');
    let prefix = &trimmed[..trimmed.len() - body.len()];

    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(trimmed.len() + 4);
    out.push_str(prefix);
    let mut pending_separator = false;
    let mut at_word_start = true;

    for (i, &c) in chars.iter().enumerate() {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_separator = !at_word_start || pending_separator;
            at_word_start = true;
            continue;
        }
        if c.is_uppercase() && !at_word_start {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() && next_lower || prev.is_uppercase() && next_lower {
                pending_separator = true;
            }
        }
        if pending_separator {
            out.push('_');
            pending_separator = false;
        }
        out.extend(c.to_lowercase());
        at_word_start = false;
    }
    out
}

/// Rename every column of `frame` through `strategy`.
///
/// Fails with [`SchemaError::DuplicateColumn`] when two names map to the
/// same result.
pub fn normalize_column_names<F>(frame: Frame, strategy: F) -> EtlResult<Frame>
where
    F: Fn(&str) -> String,
{
    let schema = frame.schema();
    let mut renames: HashMap<String, String> = HashMap::with_capacity(schema.len());
    let mut seen: HashMap<String, String> = HashMap::with_capacity(schema.len());
    let mut fields = Vec::with_capacity(schema.len());

    for field in schema.fields() {
        let normalized = strategy(&field.name);
        if let Some(first) = seen.insert(normalized.clone(), field.name.clone()) {
            return Err(SchemaError::DuplicateColumn {
                first,
                second: field.name.clone(),
                normalized,
            }
            .into());
        }
        renames.insert(field.name.clone(), normalized.clone());
        fields.push(Field::new(normalized, field.data_type));
    }

    let output = Schema::new(fields)?;
    frame.map(output, "normalize_column_names", move |df| {
        Ok(df.rename_columns(|name| renames.get(name).cloned().unwrap_or_else(|| name.to_string()))?)
    })
}

/// [`normalize_column_names`] with the configured default strategy.
pub fn normalize_column_names_default(frame: Frame, config: &Config) -> EtlResult<Frame> {
    normalize_column_names(frame, |name| config.normalize_column_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_default_config;
    use crate::frame::{Column, DataFrame};
    use proptest::prelude::*;

    #[test]
    fn test_to_snake_case() {
        let cases = [
            ("CustomerID", "customer_id"),
            ("HTMLLink", "html_link"),
            ("FirstName", "first_name"),
            ("firstName", "first_name"),
            ("ID", "id"),
            ("batch_id", "batch_id"),
            ("__batch_id", "__batch_id"),
            ("First  Name", "first_name"),
            ("first-name", "first_name"),
            ("Address2Line", "address2_line"),
            ("already__snake", "already_snake"),
            ("Trailing ", "trailing"),
        ];
        for (input, expected) in cases {
            assert_eq!(to_snake_case(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_character_translation() {
        let map = get_default_config().character_translation_map;
        assert_eq!(character_translation("Profit&Loss", &map), "Profit_and_Loss");
        assert_eq!(character_translation("Størrelse", &map), "Stoerrelse");
        assert_eq!(character_translation("Amount (USD)", &map), "Amount _USD_");
    }

    #[test]
    fn test_longest_key_wins() {
        let map: BTreeMap<String, String> = [("a", "1"), ("ab", "2")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(character_translation("abc a", &map), "2c 1");
    }

    #[test]
    fn test_default_strategy_end_to_end() {
        let config = get_default_config();
        assert_eq!(config.normalize_column_name("Profit&Loss"), "profit_and_loss");
        assert_eq!(config.normalize_column_name("Amount (USD)"), "amount_usd");
        assert_eq!(config.normalize_column_name("Sales%"), "sales_percent");
        assert_eq!(config.normalize_column_name("Profit/Loss"), "profit_or_loss");
        assert_eq!(config.normalize_column_name("Profit*Loss"), "profit_times_loss");
        assert_eq!(config.normalize_column_name("Profit\\Loss"), "profit_or_loss");
        assert_eq!(
            config.normalize_column_name("Growth% &   Loss + EBIDTA"),
            "growth_percent_and_loss_plus_ebidta"
        );
    }

    #[test]
    fn test_normalize_frame() {
        let df = DataFrame::new(vec![
            Column::int64("CustomerID", [1]),
            Column::utf8("FirstName", ["a"]),
        ])
        .unwrap();
        let out = normalize_column_names_default(df.into(), &get_default_config())
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(out.column_names(), vec!["customer_id", "first_name"]);
    }

    #[test]
    fn test_collision_rejected() {
        let df = DataFrame::new(vec![
            Column::int64("FirstName", [1]),
            Column::int64("first_name", [2]),
        ])
        .unwrap();
        let err = normalize_column_names_default(df.into(), &get_default_config()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::EtlError::Schema(SchemaError::DuplicateColumn { ref normalized, .. })
                if normalized == "first_name"
        ));
    }

    proptest! {
        #[test]
        fn prop_default_normalization_is_idempotent(name in "[A-Za-z0-9 _&%#()*/\\\\-]{0,24}") {
            let config = get_default_config();
            let once = config.normalize_column_name(&name);
            prop_assert_eq!(config.normalize_column_name(&once), once.clone());
        }
    }
}
