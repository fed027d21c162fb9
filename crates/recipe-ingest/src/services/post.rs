//! Helpers over scraped posts.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::{MediaKind, MediaRef, RawPost, ServiceError};

fn hashtag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#(\w+)").expect("hashtag pattern is valid"))
}

/// Lowercased hashtags from a caption, de-duplicated in first-seen order.
pub fn extract_hashtags(caption: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    hashtag_pattern()
        .captures_iter(caption)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Picks the media the extractor should look at: the first video, otherwise
/// the first image.
pub fn select_media(post: &RawPost) -> Result<&MediaRef, ServiceError> {
    post.media
        .iter()
        .find(|m| m.kind == MediaKind::Video)
        .or_else(|| post.media.iter().find(|m| m.kind == MediaKind::Image))
        .ok_or(ServiceError::NoMedia)
}
