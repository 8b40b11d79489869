//! Resource classification
//!
//! Coarse classification of requested resources, derived from the target
//! path. The resource type selects the cache TTL, the scheduling
//! priority and the per-request timeout, so markup loads ahead of images
//! and media downloads get a longer deadline than API calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource type derived from the target path's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Html,
    Css,
    Script,
    Image,
    Font,
    Media,
    Api,
    Document,
    Other,
}

impl ResourceType {
    /// Classify a target URL by its path
    ///
    /// Falls back to treating the whole string as a path when it is not
    /// an absolute URL. Query strings and fragments never affect the
    /// classification.
    pub fn from_url(target: &str) -> Self {
        match url::Url::parse(target) {
            Ok(parsed) => Self::from_path(parsed.path()),
            Err(_) => {
                let path = target
                    .split(['?', '#'])
                    .next()
                    .unwrap_or(target);
                Self::from_path(path)
            }
        }
    }

    /// Classify a bare path
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/api/") || path.contains("/api/") || path == "/api" {
            return Self::Api;
        }

        let last_segment = path.rsplit('/').next().unwrap_or(path);
        let extension = match last_segment.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
            // Extensionless paths are navigations
            _ => return Self::Html,
        };

        match extension.as_str() {
            "html" | "htm" | "xhtml" => Self::Html,
            "css" => Self::Css,
            "js" | "mjs" | "cjs" => Self::Script,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif" | "bmp" => Self::Image,
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Self::Font,
            "mp4" | "webm" | "mkv" | "mov" | "mp3" | "ogg" | "oga" | "wav" | "m4a" | "flac"
            | "m3u8" | "ts" => Self::Media,
            "json" | "xml" | "graphql" => Self::Api,
            "pdf" | "txt" | "md" | "doc" | "docx" | "xls" | "xlsx" | "csv" => Self::Document,
            _ => Self::Other,
        }
    }

    /// Cache TTL for this resource type
    ///
    /// Static assets keep long TTLs; markup and API payloads go stale
    /// quickly.
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Html => Duration::from_secs(10 * 60),
            Self::Css => Duration::from_secs(24 * 60 * 60),
            Self::Script => Duration::from_secs(24 * 60 * 60),
            Self::Image => Duration::from_secs(7 * 24 * 60 * 60),
            Self::Font => Duration::from_secs(30 * 24 * 60 * 60),
            Self::Media => Duration::from_secs(24 * 60 * 60),
            Self::Api => Duration::from_secs(60),
            Self::Document => Duration::from_secs(60 * 60),
            Self::Other => Duration::from_secs(30 * 60),
        }
    }

    /// Scheduling priority, higher is more urgent
    pub fn priority(&self) -> u8 {
        match self {
            Self::Html => 100,
            Self::Css => 90,
            Self::Script => 80,
            Self::Api => 70,
            Self::Font => 60,
            Self::Image => 50,
            Self::Media => 40,
            Self::Document => 30,
            Self::Other => 20,
        }
    }

    /// Request deadline for this resource type
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Html => Duration::from_secs(15),
            Self::Css | Self::Script => Duration::from_secs(15),
            Self::Api => Duration::from_secs(10),
            Self::Font => Duration::from_secs(20),
            Self::Image | Self::Document | Self::Other => Duration::from_secs(30),
            Self::Media => Duration::from_secs(60),
        }
    }

    /// Whether successful responses of this type are cached
    pub fn always_cache(&self) -> bool {
        matches!(
            self,
            Self::Css | Self::Script | Self::Image | Self::Font | Self::Media | Self::Document
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Script => "script",
            Self::Image => "image",
            Self::Font => "font",
            Self::Media => "media",
            Self::Api => "api",
            Self::Document => "document",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_by_extension() {
        assert_eq!(ResourceType::from_url("https://x.test/a.css"), ResourceType::Css);
        assert_eq!(ResourceType::from_url("https://x.test/app.js"), ResourceType::Script);
        assert_eq!(ResourceType::from_url("https://x.test/logo.png"), ResourceType::Image);
        assert_eq!(ResourceType::from_url("https://x.test/f.woff2"), ResourceType::Font);
        assert_eq!(ResourceType::from_url("https://x.test/clip.mp4"), ResourceType::Media);
        assert_eq!(ResourceType::from_url("https://x.test/doc.pdf"), ResourceType::Document);
        assert_eq!(ResourceType::from_url("https://x.test/index.html"), ResourceType::Html);
        assert_eq!(ResourceType::from_url("https://x.test/blob.wasm"), ResourceType::Other);
    }

    #[test]
    fn test_api_paths() {
        assert_eq!(ResourceType::from_url("https://x.test/api/users"), ResourceType::Api);
        assert_eq!(ResourceType::from_url("https://x.test/v1/api/users.html"), ResourceType::Api);
        assert_eq!(ResourceType::from_url("https://x.test/data.json"), ResourceType::Api);
    }

    #[test]
    fn test_extensionless_is_markup() {
        assert_eq!(ResourceType::from_url("https://x.test/"), ResourceType::Html);
        assert_eq!(ResourceType::from_url("https://x.test/page"), ResourceType::Html);
        assert_eq!(ResourceType::from_url("https://x.test/a/b/c"), ResourceType::Html);
    }

    #[test]
    fn test_query_does_not_affect_classification() {
        assert_eq!(
            ResourceType::from_url("https://x.test/a.css?v=1.2.3"),
            ResourceType::Css
        );
        assert_eq!(
            ResourceType::from_url("https://x.test/page#section.js"),
            ResourceType::Html
        );
    }

    #[test]
    fn test_priority_ordering() {
        let order = [
            ResourceType::Html,
            ResourceType::Css,
            ResourceType::Script,
            ResourceType::Api,
            ResourceType::Font,
            ResourceType::Image,
            ResourceType::Media,
            ResourceType::Other,
        ];
        for pair in order.windows(2) {
            assert!(
                pair[0].priority() > pair[1].priority(),
                "{} should outrank {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_media_has_longest_timeout() {
        assert!(ResourceType::Media.timeout() > ResourceType::Api.timeout());
        assert!(ResourceType::Media.timeout() > ResourceType::Html.timeout());
    }

    #[test]
    fn test_always_cache_set() {
        assert!(ResourceType::Css.always_cache());
        assert!(ResourceType::Font.always_cache());
        assert!(!ResourceType::Html.always_cache());
        assert!(!ResourceType::Api.always_cache());
    }
}
