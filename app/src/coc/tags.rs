use crate::error::{BotError, Result};

const TAG_CHARACTERS: &str = "0289PYLQGRJCUV";

/// Normalizes user input into a `#`-prefixed tag.
///
/// The game never uses the letter `O` in tags, so it is read as zero.
pub fn normalize_tag(input: &str) -> Result<String> {
    let body: String = input
        .trim()
        .trim_start_matches('#')
        .to_uppercase()
        .chars()
        .map(|c| if c == 'O' { '0' } else { c })
        .collect();

    if body.len() < 3 || body.len() > 12 || !body.chars().all(|c| TAG_CHARACTERS.contains(c)) {
        return Err(BotError::InvalidTag(input.trim().to_string()));
    }

    Ok(format!("#{body}"))
}

pub fn is_tag(input: &str) -> bool {
    normalize_tag(input).is_ok()
}

/// Encodes a normalized tag for use in an API path.
pub fn encode_tag(tag: &str) -> String {
    tag.replace('#', "%23")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_prefix_and_letter_o() {
        assert_eq!(normalize_tag("2pp").unwrap(), "#2PP");
        assert_eq!(normalize_tag("  #8qu8j9lp ").unwrap(), "#8QU8J9LP");
        assert_eq!(normalize_tag("#o2yl").unwrap(), "#02YL");
    }

    #[test]
    fn rejects_foreign_characters() {
        assert!(matches!(normalize_tag("#ABC"), Err(BotError::InvalidTag(t)) if t == "#ABC"));
        assert!(!is_tag("my clan"));
        assert!(!is_tag("#2"));
    }

    #[test]
    fn encodes_hash_for_paths() {
        assert_eq!(encode_tag("#2PP"), "%232PP");
    }
}
