//! Maps an intercepted request path to the caching strategy that owns it.

use serde::Serialize;

pub const DEFAULT_CHAPTER_MARKER: &str = "getBookContent";
pub const DEFAULT_API_PREFIX: &str = "/api/";

/// Strategy class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    ChapterContent,
    Api,
    Static,
}

impl RequestClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestClass::ChapterContent => "chapter_content",
            RequestClass::Api => "api",
            RequestClass::Static => "static",
        }
    }
}

/// Path patterns used by [`ClassifierRules::classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRules {
    /// Path segment that marks chapter content, wherever it appears.
    pub chapter_marker: String,
    /// Path prefixes served by the live API.
    pub api_prefixes: Vec<String>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            chapter_marker: DEFAULT_CHAPTER_MARKER.to_string(),
            api_prefixes: vec![DEFAULT_API_PREFIX.to_string()],
        }
    }
}

impl ClassifierRules {
    /// Classify a request path. First match wins, most specific first:
    /// chapter marker, then API prefix, then the static fallback.
    ///
    /// Chapter content is usually reachable under an API prefix too, so the
    /// marker check must run before the prefix check.
    pub fn classify(&self, path: &str) -> RequestClass {
        let path = path.split_once('?').map_or(path, |(path, _)| path);

        if path
            .split('/')
            .any(|segment| segment == self.chapter_marker)
        {
            return RequestClass::ChapterContent;
        }

        if self
            .api_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return RequestClass::Api;
        }

        RequestClass::Static
    }
}
