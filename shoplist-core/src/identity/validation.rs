//! Display-name validation.
//!
//! Rules are checked in order and the first failure wins:
//! 1. not empty
//! 2. trimmed length >= 2
//! 3. trimmed length <= 50
//! 4. only letters, digits, Latin diacritics, space, `-`, `_`, `.`
//! 5. no reserved word anywhere in the name (case-insensitive)

use thiserror::Error;

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 50;

/// Words that may not appear anywhere in a display name.
pub const RESERVED_WORDS: [&str; 5] = ["admin", "system", "null", "undefined", "anonymous"];

/// The rule a rejected value broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameRule {
    #[error("must not be empty")]
    Empty,

    #[error("must be at least {min} characters")]
    TooShort { min: usize },

    #[error("must be at most {max} characters")]
    TooLong { max: usize },

    #[error("may only contain letters, digits, spaces, '-', '_' and '.'")]
    InvalidCharacters,

    #[error("must not contain the reserved word '{0}'")]
    Reserved(String),
}

/// Structured rejection of user-supplied data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field} '{value}': {rule}")]
pub struct ValidationError {
    pub field: String,
    pub value: String,
    pub rule: NameRule,
}

impl ValidationError {
    fn name(value: &str, rule: NameRule) -> Self {
        Self {
            field: "name".to_string(),
            value: value.to_string(),
            rule,
        }
    }
}

/// Validates a display name, returning the trimmed name on success.
pub fn validate_user_name(input: &str) -> Result<String, ValidationError> {
    if input.is_empty() {
        return Err(ValidationError::name(input, NameRule::Empty));
    }

    let trimmed = input.trim();
    let len = trimmed.chars().count();
    if len < NAME_MIN_CHARS {
        return Err(ValidationError::name(
            input,
            NameRule::TooShort {
                min: NAME_MIN_CHARS,
            },
        ));
    }
    if len > NAME_MAX_CHARS {
        return Err(ValidationError::name(
            input,
            NameRule::TooLong {
                max: NAME_MAX_CHARS,
            },
        ));
    }

    if !trimmed.chars().all(is_allowed_char) {
        return Err(ValidationError::name(input, NameRule::InvalidCharacters));
    }

    let lower = trimmed.to_lowercase();
    if let Some(word) = RESERVED_WORDS.iter().find(|w| lower.contains(*w)) {
        return Err(ValidationError::name(
            input,
            NameRule::Reserved(word.to_string()),
        ));
    }

    Ok(trimmed.to_string())
}

/// ASCII alphanumerics, Latin-1 Supplement and Latin Extended-A letters,
/// space, hyphen, underscore, period.
fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, ' ' | '-' | '_' | '.')
        || (('\u{00C0}'..='\u{017F}').contains(&c) && c != '\u{00D7}' && c != '\u{00F7}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_boundaries() {
        assert_eq!(
            validate_user_name("a").unwrap_err().rule,
            NameRule::TooShort { min: 2 }
        );
        assert!(validate_user_name("ab").is_ok());
        assert!(validate_user_name(&"a".repeat(50)).is_ok());
        assert_eq!(
            validate_user_name(&"a".repeat(51)).unwrap_err().rule,
            NameRule::TooLong { max: 50 }
        );
    }

    #[test]
    fn test_length_counts_trimmed_chars() {
        assert!(validate_user_name("  a  ").is_err());
        assert_eq!(validate_user_name("  Jo  ").unwrap(), "Jo");
        // 50 multi-byte characters are still 50 characters.
        assert!(validate_user_name(&"é".repeat(50)).is_ok());
    }

    #[test]
    fn test_empty() {
        assert_eq!(validate_user_name("").unwrap_err().rule, NameRule::Empty);
        assert_eq!(
            validate_user_name("   ").unwrap_err().rule,
            NameRule::TooShort { min: 2 }
        );
    }

    #[test]
    fn test_allowed_characters() {
        assert!(validate_user_name("Jan-Piet_2.0").is_ok());
        assert!(validate_user_name("Zoë Ångström").is_ok());
        assert!(validate_user_name("Łukasz").is_ok());
        for bad in ["<script>", "a@b", "名前", "ab×cd", "tab\there"] {
            assert_eq!(
                validate_user_name(bad).unwrap_err().rule,
                NameRule::InvalidCharacters,
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_reserved_words_case_insensitive() {
        for bad in ["admin", "Admin2", "SysTem", "my null", "undefinedX", "Anonymous"] {
            assert!(
                matches!(
                    validate_user_name(bad).unwrap_err().rule,
                    NameRule::Reserved(_)
                ),
                "{}",
                bad
            );
        }
        assert_eq!(
            validate_user_name("Admin2").unwrap_err().rule,
            NameRule::Reserved("admin".to_string())
        );
    }

    #[test]
    fn test_first_failure_wins() {
        // Too long and containing a reserved word: length is checked first.
        let name = format!("admin{}", "x".repeat(60));
        assert_eq!(
            validate_user_name(&name).unwrap_err().rule,
            NameRule::TooLong { max: 50 }
        );
        // Bad characters are reported before reserved words.
        assert_eq!(
            validate_user_name("admin!").unwrap_err().rule,
            NameRule::InvalidCharacters
        );
    }

    #[test]
    fn test_error_message() {
        let err = validate_user_name("a").unwrap_err();
        assert_eq!(err.field, "name");
        assert_eq!(
            err.to_string(),
            "Invalid name 'a': must be at least 2 characters"
        );
    }
}
