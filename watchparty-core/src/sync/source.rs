//! Content references

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Identifies what a room is watching
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Player-specific content identifier (e.g. a video id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// Page URL the content is watched at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl SourceRef {
    pub fn content(content_id: impl Into<String>) -> Self {
        Self {
            content_id: Some(content_id.into()),
            source_url: None,
        }
    }

    pub fn url(source_url: impl Into<String>) -> Self {
        Self {
            content_id: None,
            source_url: Some(source_url.into()),
        }
    }

    /// Build from a room's source string. Video links are reduced to their
    /// id; anything else is kept as both id and URL.
    pub fn from_room_source(source: &str) -> Self {
        let source = source.trim();
        match extract_video_id(source) {
            Some(id) if id == source => Self::content(id),
            Some(id) => Self {
                content_id: Some(id),
                source_url: Some(source.to_string()),
            },
            None => Self {
                content_id: Some(source.to_string()),
                source_url: Some(source.to_string()),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content_id.is_none() && self.source_url.is_none()
    }
}

fn is_video_id(value: &str) -> bool {
    value.len() == 11
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Extract an 11-character video id from a bare id, a `youtu.be/<id>`
/// link or a `youtube.com/...?v=<id>` link
pub fn extract_video_id(input: &str) -> Option<String> {
    let value = input.trim();
    if value.is_empty() {
        return None;
    }
    if is_video_id(value) {
        return Some(value.to_string());
    }

    let url = Url::parse(value).ok()?;
    let host = url.host_str()?;

    let candidate = if host.contains("youtu.be") {
        url.path_segments()?.find(|s| !s.is_empty())?.to_string()
    } else if host.contains("youtube.com") {
        url.query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, v)| v.into_owned())?
    } else {
        return None;
    };

    is_video_id(&candidate).then_some(candidate)
}
