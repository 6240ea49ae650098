//! Repository URL validation and cache key derivation

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Error, Result};

/// Check that `raw` is an http(s) URL on `allowed_host` naming `owner/repo`.
pub fn validate(raw: &str, allowed_host: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|err| Error::Validation(format!("{raw}: {err}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "{raw}: scheme must be http or https"
        )));
    }

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let allowed = allowed_host.to_ascii_lowercase();
    if host != allowed && !host.ends_with(&format!(".{allowed}")) {
        return Err(Error::Validation(format!(
            "{raw}: host must be {allowed_host}"
        )));
    }

    let segments = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).count())
        .unwrap_or(0);
    if segments < 2 {
        return Err(Error::Validation(format!(
            "{raw}: expected an owner/repo path"
        )));
    }

    Ok(url)
}

/// Last path segment without a trailing `.git`.
pub fn display_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// Keep `[A-Za-z0-9_-]`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// First 8 hex chars of SHA-256 over the full URL.
pub fn short_hash(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..8].to_string()
}

/// Directory name of the cache slot for `raw`.
pub fn cache_key(raw: &str) -> String {
    format!("{}-{}", sanitize_name(&display_name(raw)), short_hash(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_owner_repo_urls() {
        assert!(validate("https://github.com/acme/widgets", "github.com").is_ok());
        assert!(validate("http://GitHub.com/acme/widgets.git", "github.com").is_ok());
        assert!(validate("https://www.github.com/acme/widgets/", "github.com").is_ok());
    }

    #[test]
    fn rejects_bad_urls() {
        for raw in [
            "ftp://github.com/acme/widgets",
            "https://gitlab.com/acme/widgets",
            "https://github.com.attacker.example/acme/widgets",
            "https://notgithub.com/acme/widgets",
            "https://github.com/acme",
            "https://github.com/",
            "not a url",
            "",
        ] {
            let err = validate(raw, "github.com").unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{raw} accepted");
        }
    }

    #[test]
    fn honors_configured_host() {
        assert!(validate("https://gitlab.com/acme/widgets", "gitlab.com").is_ok());
        assert!(validate("https://github.com/acme/widgets", "gitlab.com").is_err());
    }

    #[test]
    fn display_name_strips_suffixes() {
        assert_eq!(display_name("https://github.com/acme/widgets"), "widgets");
        assert_eq!(display_name("https://github.com/acme/widgets.git"), "widgets");
        assert_eq!(display_name("https://github.com/acme/widgets/"), "widgets");
    }

    #[test]
    fn cache_key_is_stable_and_url_specific() {
        let key = cache_key("https://github.com/acme/widgets");
        let (name, hash) = key.rsplit_once('-').unwrap();
        assert_eq!(name, "widgets");
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        assert_eq!(key, cache_key("https://github.com/acme/widgets"));
        assert_ne!(key, cache_key("https://github.com/other/widgets"));
    }

    #[test]
    fn sanitize_drops_unsafe_chars() {
        assert_eq!(sanitize_name("wid gets.rs"), "widgetsrs");
        assert_eq!(sanitize_name("a_b-c"), "a_b-c");
    }
}
