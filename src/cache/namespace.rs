//! Namespace names and the set the running version recognizes.

use std::fmt;

use thiserror::Error;

const MAX_NAME_LEN: usize = 128;

pub(crate) const DEFAULT_STATIC_PREFIX: &str = "shelfcache-static";
pub(crate) const DEFAULT_VERSION: &str = "v1";
pub(crate) const DEFAULT_STATIC_NAMESPACE: &str = "shelfcache-static-v1";
pub(crate) const DEFAULT_CHAPTER_NAMESPACE: &str = "shelfcache-chapters";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    #[error("namespace name must not be empty")]
    Empty,
    #[error("namespace name `{0}` is longer than 128 bytes")]
    TooLong(String),
    #[error("namespace name `{0}` may only contain ASCII letters, digits, `.`, `_` and `-`")]
    InvalidCharacters(String),
    #[error("namespace name `{0}` must not start with `.`")]
    Hidden(String),
    #[error("static and chapter namespaces must differ (both are `{0}`)")]
    Collision(String),
}

/// A validated namespace name. Names double as directory names for the disk
/// store, hence the restricted alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceName(String);

impl NamespaceName {
    pub fn new(name: impl Into<String>) -> Result<Self, NamespaceError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NamespaceError::TooLong(name));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(NamespaceError::InvalidCharacters(name));
        }
        if name.starts_with('.') {
            return Err(NamespaceError::Hidden(name));
        }
        Ok(Self(name))
    }

    /// Build the version-tagged name `{prefix}-{version}`.
    pub fn versioned(prefix: &str, version: &str) -> Result<Self, NamespaceError> {
        Self::new(format!("{prefix}-{version}"))
    }

    /// For compile-time names already known to be valid.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::new(name).is_ok(), "invalid namespace literal `{name}`");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two namespaces owned by the running version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    static_assets: NamespaceName,
    chapters: NamespaceName,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            static_assets: NamespaceName::from_static(DEFAULT_STATIC_NAMESPACE),
            chapters: NamespaceName::from_static(DEFAULT_CHAPTER_NAMESPACE),
        }
    }
}

impl Namespaces {
    pub fn new(
        static_assets: NamespaceName,
        chapters: NamespaceName,
    ) -> Result<Self, NamespaceError> {
        if static_assets == chapters {
            return Err(NamespaceError::Collision(chapters.0));
        }
        Ok(Self {
            static_assets,
            chapters,
        })
    }

    pub fn static_assets(&self) -> &NamespaceName {
        &self.static_assets
    }

    pub fn chapters(&self) -> &NamespaceName {
        &self.chapters
    }

    /// Recognized names in fallback lookup order.
    pub fn recognized(&self) -> [&NamespaceName; 2] {
        [&self.static_assets, &self.chapters]
    }

    pub fn is_recognized(&self, name: &NamespaceName) -> bool {
        self.recognized().contains(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_name() {
        let name = NamespaceName::versioned("shelfcache-static", "v2").expect("valid name");
        assert_eq!(name.as_str(), "shelfcache-static-v2");
    }

    #[test]
    fn default_static_name_matches_prefix_and_version() {
        let expected =
            NamespaceName::versioned(DEFAULT_STATIC_PREFIX, DEFAULT_VERSION).expect("valid name");
        assert_eq!(Namespaces::default().static_assets(), &expected);
    }

    #[test]
    fn rejects_unsafe_names() {
        assert_eq!(NamespaceName::new(""), Err(NamespaceError::Empty));
        assert!(matches!(
            NamespaceName::new("../etc"),
            Err(NamespaceError::InvalidCharacters(_))
        ));
        assert!(matches!(
            NamespaceName::new(".."),
            Err(NamespaceError::Hidden(_))
        ));
        assert!(matches!(
            NamespaceName::new("a".repeat(129)),
            Err(NamespaceError::TooLong(_))
        ));
    }

    #[test]
    fn recognizes_only_current_pair() {
        let namespaces = Namespaces::new(
            NamespaceName::new("static-v2").expect("valid"),
            NamespaceName::new("chapters").expect("valid"),
        )
        .expect("distinct names");

        assert!(namespaces.is_recognized(&NamespaceName::new("static-v2").expect("valid")));
        assert!(namespaces.is_recognized(&NamespaceName::new("chapters").expect("valid")));
        assert!(!namespaces.is_recognized(&NamespaceName::new("static-v1").expect("valid")));
    }

    #[test]
    fn rejects_collision() {
        let name = NamespaceName::new("same").expect("valid");
        assert!(matches!(
            Namespaces::new(name.clone(), name),
            Err(NamespaceError::Collision(_))
        ));
    }
}
