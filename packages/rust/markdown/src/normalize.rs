use unicode_normalization::UnicodeNormalization;

/// Deterministic text normalization: decompose (NFD), drop non-ASCII code
/// points (which strips accents), lower-case, collapse whitespace runs.
pub fn normalize_text(text: &str) -> String {
    let ascii: String = text.nfd().filter(char::is_ascii).collect();
    ascii
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize_text("Crème Brûlée"), "creme brulee");
        assert_eq!(normalize_text("ÉCOLE Normale"), "ecole normale");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize_text("  a\n\n b\t\tc  "), "a b c");
    }

    #[test]
    fn drops_non_latin_scripts() {
        assert_eq!(normalize_text("graph 图 neural"), "graph neural");
    }

    #[test]
    fn is_idempotent() {
        let once = normalize_text("Ångström  Units");
        assert_eq!(normalize_text(&once), once);
    }
}
