macro_rules! regex {
    ($pattern: expr) => {{
        use once_cell::sync::OnceCell;
        use regex::Regex;
        static CELL: OnceCell<Regex> = OnceCell::new();
        CELL.get_or_init(|| Regex::new($pattern).unwrap())
    }};
}

/// Trims the string and collapses every run of whitespace into one space.
pub fn merge_blank(s: &str) -> String {
    regex!(r"\s+").replace_all(s.trim(), " ").to_string()
}

#[test]
fn merge_blank_test() {
    assert_eq!(merge_blank("  general \t chat\n"), "general chat");
    assert_eq!(merge_blank("   "), "");
    assert_eq!(merge_blank("plain"), "plain");
}
