use std::sync::LazyLock;

use regex::Regex;
use validator::ValidationError;

use crate::{error::AppError, utils::html::clean_html};

static USERNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]{3,30}$").expect("username pattern compiles")
});

/// Usernames are 3-30 characters of ASCII letters, digits and underscores.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        let mut err = ValidationError::new("username_format");
        err.message = Some(
            "Username must be 3-30 characters of letters, digits or underscores.".into(),
        );
        Err(err)
    }
}

/// Trims and sanitizes user text, rejecting it when nothing is left or it is
/// longer than `max_chars`.
pub fn normalize_content(raw: &str, field: &str, max_chars: usize) -> Result<String, AppError> {
    let cleaned = clean_html(raw.trim());
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(AppError::BadRequest(format!("{} must not be empty", field)));
    }
    if cleaned.chars().count() > max_chars {
        return Err(AppError::BadRequest(format!(
            "{} must be at most {} characters",
            field, max_chars
        )));
    }

    Ok(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob_99").is_ok());
        assert!(validate_username("yo").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("dash-name").is_err());
        assert!(validate_username(&"a".repeat(31)).is_err());
    }

    #[test]
    fn content_is_trimmed_and_must_survive_sanitizing() {
        assert!(matches!(
            normalize_content("  hello world \n", "Content", 10),
            Err(AppError::BadRequest(msg)) if msg.contains("at most")
        ));
        assert_eq!(normalize_content("  hello \n", "Content", 10).unwrap(), "hello");
        assert!(matches!(
            normalize_content("   ", "Content", 10),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            normalize_content("<script>x</script>", "Content", 10),
            Err(AppError::BadRequest(_))
        ));
    }
}
