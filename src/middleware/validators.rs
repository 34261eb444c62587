//! Field rules shared by the input payloads, plus the reserved owner-name list
//! the binder checks owner names against.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use validator::ValidationError;

/// Names that can never be registered as users or organizations
static DEFAULT_RESERVED_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "about", "account", "admin", "administrator", "api", "app", "auth", "blog", "categories",
        "collections", "config", "dashboard", "download", "downloads", "help", "licenses", "login",
        "logout", "me", "models", "new", "organizations", "profile", "register", "root", "search",
        "settings", "signup", "static", "subt", "support", "system", "users", "worlds", "www",
    ]
});

fn rule(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

pub fn no_forward_slash(value: &str) -> Result<(), ValidationError> {
    if value.contains('/') {
        return Err(rule("noforwardslash", "must not contain '/'"));
    }
    Ok(())
}

pub fn no_percent(value: &str) -> Result<(), ValidationError> {
    if value.contains('%') {
        return Err(rule("nopercent", "must not contain '%'"));
    }
    Ok(())
}

/// Letters, digits, underscore, dash and whitespace
pub fn alphanum_space(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c.is_whitespace());
    if !valid {
        return Err(rule(
            "alphanumspace",
            "may only contain letters, digits, '_', '-' and spaces",
        ));
    }
    Ok(())
}

pub fn alphanum(value: &str) -> Result<(), ValidationError> {
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(rule("alphanum", "may only contain letters and digits"));
    }
    Ok(())
}

/// Lowercase words separated by single dashes, e.g. `ground-vehicles`
pub fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .split('-')
            .all(|word| !word.is_empty() && word.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()))
}

/// Split a comma separated form value into trimmed, non-empty entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Owner names that may not be used for new users or organizations
#[derive(Debug, Clone)]
pub struct ReservedNames {
    names: HashSet<String>,
}

impl ReservedNames {
    pub fn builtin() -> Self {
        Self::from_names(DEFAULT_RESERVED_NAMES.iter().map(|s| s.to_string()))
    }

    /// Load a JSON array of names, e.g. `["admin", "root"]`
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let names: Vec<String> = serde_json::from_str(&data)?;
        Ok(Self::from_names(names))
    }

    pub fn from_names(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().map(|n| n.to_lowercase()).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_slash_and_percent() {
        assert!(no_forward_slash("my model").is_ok());
        assert!(no_forward_slash("my/model").is_err());
        assert!(no_percent("100%").is_err());
    }

    #[test]
    fn alphanum_space_accepts_dash_underscore_space() {
        assert!(alphanum_space("Team Alpha_2-b").is_ok());
        assert!(alphanum_space("team!").is_err());
        assert!(alphanum_space("").is_err());
    }

    #[test]
    fn slugs() {
        assert!(is_slug("ground-vehicles"));
        assert!(is_slug("drones2"));
        assert!(!is_slug("Ground Vehicles"));
        assert!(!is_slug("double--dash"));
        assert!(!is_slug("-leading"));
    }

    #[test]
    fn reserved_names_are_case_insensitive() {
        let reserved = ReservedNames::builtin();
        assert!(reserved.contains("Admin"));
        assert!(!reserved.contains("openrobotics"));
    }

    #[test]
    fn reserved_names_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.json");
        std::fs::write(&path, r#"["forbidden", "Nope"]"#).unwrap();
        let reserved = ReservedNames::load(&path).unwrap();
        assert!(reserved.contains("nope"));
        assert!(!reserved.contains("admin"));
    }
}
