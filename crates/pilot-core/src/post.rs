use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::post_date_serde;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Instagram,
    TikTok,
    LinkedIn,
    Twitter,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Instagram,
        Platform::TikTok,
        Platform::LinkedIn,
        Platform::Twitter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Instagram => "Instagram",
            Platform::TikTok => "TikTok",
            Platform::LinkedIn => "LinkedIn",
            Platform::Twitter => "Twitter",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                anyhow!("unknown platform: {s} (expected instagram, tiktok, linkedin or twitter)")
            })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single piece of content bound to one platform.
///
/// Posts arrive from a [`crate::provider::PostProvider`] and are only ever
/// borrowed by the calendar code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: String,

    pub platform: Platform,

    pub content: String,

    pub caption: String,

    #[serde(rename = "scheduledAt", alias = "scheduled_at", with = "post_date_serde")]
    pub scheduled_at: DateTime<Utc>,

    pub status: PostStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Post {
    pub fn new(
        id: impl Into<String>,
        platform: Platform,
        content: impl Into<String>,
        caption: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        status: PostStatus,
    ) -> Self {
        Self {
            id: id.into(),
            platform,
            content: content.into(),
            caption: caption.into(),
            scheduled_at,
            status,
            image: None,
        }
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_at > now
    }
}
