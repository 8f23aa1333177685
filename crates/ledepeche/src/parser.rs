//! Number-list parsing
//!
//! *L'Analyse* (The Parse) - Raw operator text to an ordered list of destinations.

/// Split raw operator input into destination entries.
///
/// Entries are separated by commas. When the whole input is exactly one
/// character long, it is split on line breaks instead (after folding `\r\n`
/// and `\r` into `\n`). Multi-line input longer than one character is *not*
/// split on newlines; the result is a single entry.
///
/// No trimming or filtering happens here; see [`prepare_destinations`].
pub fn parse_numbers(raw: &str) -> Vec<String> {
    if raw.chars().count() == 1 {
        return raw
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .split('\n')
            .map(str::to_string)
            .collect();
    }

    raw.split(',').map(str::to_string).collect()
}

/// Turn parsed entries into dialable destinations.
///
/// Trims each entry, drops blanks, and adds a leading `+` unless present.
/// Order is preserved and duplicates are kept.
pub fn prepare_destinations<I, S>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .filter_map(|entry| {
            let trimmed = entry.as_ref().trim();
            if trimmed.is_empty() {
                None
            } else if trimmed.starts_with('+') {
                Some(trimmed.to_string())
            } else {
                Some(format!("+{}", trimmed))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1,2,3", &["1", "2", "3"])]
    #[case("1\n2\n3", &["1\n2\n3"])]
    #[case("5", &["5"])]
    #[case("15551234567", &["15551234567"])]
    #[case("1,,2", &["1", "", "2"])]
    #[case(" 1, 2 ", &[" 1", " 2 "])]
    #[case("", &[""])]
    fn test_parse_numbers(#[case] raw: &str, #[case] expected: &[&str]) {
        assert_eq!(parse_numbers(raw), expected);
    }

    #[rstest]
    #[case("\n", &["", ""])]
    #[case("\r", &["", ""])]
    #[case(",", &[","])]
    fn test_parse_single_character_takes_newline_path(#[case] raw: &str, #[case] expected: &[&str]) {
        assert_eq!(parse_numbers(raw), expected);
    }

    #[test]
    fn test_parse_single_multibyte_character() {
        assert_eq!(parse_numbers("é"), vec!["é".to_string()]);
    }

    #[test]
    fn test_prepare_destinations_prefixes_and_filters() {
        let prepared = prepare_destinations(vec!["15551230001", " ", "+15551230002", " 15551230003 "]);
        assert_eq!(prepared, vec!["+15551230001", "+15551230002", "+15551230003"]);
    }

    #[test]
    fn test_prepare_destinations_keeps_duplicates_in_order() {
        let prepared = prepare_destinations(parse_numbers("2,1,2"));
        assert_eq!(prepared, vec!["+2", "+1", "+2"]);
    }

    #[test]
    fn test_prepare_destinations_all_blank() {
        assert!(prepare_destinations(parse_numbers(" , ,")).is_empty());
    }
}
