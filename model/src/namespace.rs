use std::sync::LazyLock;

use regex::Regex;

use crate::Error;

/// The namespace used when a resource omits one (`spec.md` §3).
pub const DEFAULT_NAMESPACE: &str = "default";

static NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,62}[a-z0-9])?$").unwrap());

/// Validates a namespace string, returning the normalized (never empty)
/// namespace. An absent namespace normalizes to [`DEFAULT_NAMESPACE`].
pub fn normalize(namespace: Option<&str>) -> Result<String, Error> {
    match namespace {
        None => Ok(DEFAULT_NAMESPACE.to_string()),
        Some(ns) if ns.is_empty() => Ok(DEFAULT_NAMESPACE.to_string()),
        Some(ns) if NAMESPACE_RE.is_match(ns) => Ok(ns.to_string()),
        Some(ns) => Err(Error::InvalidNamespace(ns.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_namespace_defaults() {
        assert_eq!(normalize(None).unwrap(), "default");
        assert_eq!(normalize(Some("")).unwrap(), "default");
    }

    #[test]
    fn rejects_bad_namespace() {
        assert!(normalize(Some("Has Spaces")).is_err());
        assert!(normalize(Some("-leading-dash")).is_err());
    }

    #[test]
    fn accepts_kebab_namespace() {
        assert_eq!(normalize(Some("team-a")).unwrap(), "team-a");
    }
}
