//! Exact-then-fuzzy search patterns

/// Build the fuzzy `LIKE` pattern for a query: `%` around every
/// non-whitespace character, so `"pcm"` becomes `"%p%c%m%"`.
///
/// An empty or all-whitespace query yields `"%"`, which matches everything.
/// `%`, `_` and `\` in the query are escaped with `\`; callers write
/// `ILIKE $1 ESCAPE '\'`.
pub fn fuzzy_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() * 3 + 1);
    pattern.push('%');
    for c in query.chars().filter(|c| !c.is_whitespace()) {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
        pattern.push('%');
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_between_every_char() {
        assert_eq!(fuzzy_pattern("ABC"), "%A%B%C%");
    }

    #[test]
    fn test_whitespace_is_dropped() {
        assert_eq!(fuzzy_pattern(" am ox "), "%a%m%o%x%");
    }

    #[test]
    fn test_empty_query_matches_all() {
        assert_eq!(fuzzy_pattern(""), "%");
        assert_eq!(fuzzy_pattern("   "), "%");
    }

    #[test]
    fn test_wildcards_are_escaped() {
        assert_eq!(fuzzy_pattern("%"), r"%\%%");
        assert_eq!(fuzzy_pattern("a_b"), r"%a%\_%b%");
        assert_eq!(fuzzy_pattern(r"\"), r"%\\%");
    }

    #[test]
    fn test_multibyte_chars() {
        assert_eq!(fuzzy_pattern("obé"), "%o%b%é%");
    }
}
