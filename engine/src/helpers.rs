//! Small SQL text helpers.

/// Default identifier quote character.
pub const DEFAULT_QUOTE: char = '"';

/// Wrap `name` in `quote_char`, stripping any quotes it already carries.
///
/// ```rust,ignore
/// assert_eq!(quote_identifier("my_object", '"'), "\"my_object\"");
/// assert_eq!(quote_identifier("'''my_object'''", '\''), "'my_object'");
/// ```
pub fn quote_identifier(name: &str, quote_char: char) -> String {
    let bare = name.trim_matches(quote_char);
    format!("{quote_char}{bare}{quote_char}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("my_object", DEFAULT_QUOTE), "\"my_object\"");
        assert_eq!(quote_identifier("my_object", '\''), "'my_object'");
        assert_eq!(quote_identifier("\"my_object\"", DEFAULT_QUOTE), "\"my_object\"");
        assert_eq!(quote_identifier("'''my_object'''", '\''), "'my_object'");
        assert_eq!(quote_identifier("", DEFAULT_QUOTE), "\"\"");
    }
}
