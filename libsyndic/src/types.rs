//! Core types for Syndic

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyndicError};

/// External platforms a distribution can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Meta,
    X,
    LinkedIn,
    Instagram,
    TikTok,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::X => "x",
            Self::LinkedIn => "linkedin",
            Self::Instagram => "instagram",
            Self::TikTok => "tiktok",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "meta" | "facebook" => Some(Self::Meta),
            "x" | "twitter" => Some(Self::X),
            "linkedin" => Some(Self::LinkedIn),
            "instagram" => Some(Self::Instagram),
            "tiktok" => Some(Self::TikTok),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = SyndicError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| SyndicError::Validation(format!("unknown platform: {}", s)))
    }
}

/// Lifecycle status of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Generated,
    PendingApproval,
    Approved,
    Rejected,
    Scheduled,
    Published,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generated => "generated",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Scheduled => "scheduled",
            Self::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "generated" => Some(Self::Generated),
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "scheduled" => Some(Self::Scheduled),
            "published" => Some(Self::Published),
            _ => None,
        }
    }

    /// Rejected and Published content items accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Published)
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a single distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Pending,
    InFlight,
    Published,
    Failed,
    Cancelled,
}

impl DistributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "published" => Some(Self::Published),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable timing and retry configuration attached to a distribution.
///
/// Validated once at creation; a reschedule computes new fire times through
/// the retry policy instead of mutating the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishingWindow {
    /// Target publish instant (Unix seconds, UTC)
    pub publish_at: i64,
    /// Fixed delay between retries; None selects the default backoff
    pub retry_interval_secs: Option<i64>,
    /// Maximum number of retries after the initial attempt
    pub max_retry_count: u32,
}

impl PublishingWindow {
    /// Build a window, rejecting non-future publish times and non-positive
    /// retry intervals.
    pub fn new(
        publish_at: i64,
        retry_interval_secs: Option<i64>,
        max_retry_count: u32,
        now: i64,
    ) -> Result<Self> {
        if publish_at <= now {
            return Err(SyndicError::Validation(
                "publish time must be strictly in the future".to_string(),
            ));
        }
        if let Some(interval) = retry_interval_secs {
            if interval <= 0 {
                return Err(SyndicError::Validation(
                    "retry interval must be positive".to_string(),
                ));
            }
        }
        Ok(Self {
            publish_at,
            retry_interval_secs,
            max_retry_count,
        })
    }
}

/// A unit of content authored by a user for a team.
///
/// Never deleted, only soft-marked. Status changes go through the
/// state machine in [`crate::state`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub team_id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    pub status: ContentStatus,
    pub review_note: Option<String>,
    pub deleted: bool,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContentItem {
    pub fn new(team_id: String, author_id: String, title: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            team_id,
            author_id,
            title,
            body: String::new(),
            status: ContentStatus::Draft,
            review_note: None,
            deleted: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One scheduled release of a content item to one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDistribution {
    pub id: String,
    pub content_id: String,
    pub platform: Platform,
    pub window: PublishingWindow,
    /// Publish attempts made so far, including the one in flight
    pub attempt_count: u32,
    pub status: DistributionStatus,
    /// When the next attempt fires; starts at `window.publish_at`
    pub next_attempt_at: i64,
    /// Set when the current attempt entered InFlight
    pub started_at: Option<i64>,
    pub published_at: Option<i64>,
    pub external_post_id: Option<String>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContentDistribution {
    pub fn new(content_id: String, platform: Platform, window: PublishingWindow) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            content_id,
            platform,
            window,
            attempt_count: 0,
            status: DistributionStatus::Pending,
            next_attempt_at: window.publish_at,
            started_at: None,
            published_at: None,
            external_post_id: None,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-team, per-platform stored OAuth credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAccount {
    pub team_id: String,
    pub platform: Platform,
    pub account_name: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix seconds); None means no known expiry
    pub expires_at: Option<i64>,
    pub revoked: bool,
    pub updated_at: i64,
}

impl PlatformAccount {
    /// True when an access token is present, not revoked, and not due to
    /// expire within `margin_secs` of `now`.
    pub fn token_is_fresh(&self, now: i64, margin_secs: i64) -> bool {
        if self.revoked || self.access_token.is_none() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at - margin_secs > now,
            None => true,
        }
    }
}

/// Abstract request handed to a publisher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialMediaPostRequest {
    pub title: String,
    pub body: String,
    pub caption: Option<String>,
    pub hashtags: Vec<String>,
    pub media_urls: Vec<String>,
    pub team_id: String,
    pub access_token: String,
}

impl SocialMediaPostRequest {
    /// Single text rendering used by platforms without structured fields:
    /// title, body, then hashtags on their own line.
    pub fn compose_message(&self) -> String {
        let mut message = String::new();
        if !self.title.is_empty() {
            message.push_str(&self.title);
            message.push_str("\n\n");
        }
        message.push_str(&self.body);
        if !self.hashtags.is_empty() {
            message.push('\n');
            for tag in &self.hashtags {
                let tag = tag.trim_start_matches('#');
                message.push_str(&format!(" #{}", tag));
            }
        }
        message.trim().to_string()
    }
}

/// Outcome of one publish attempt.
///
/// The `retryable` flag is the single piece of information the scheduler
/// acts on for failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReport {
    pub success: bool,
    pub external_post_id: Option<String>,
    pub error_message: Option<String>,
    pub retryable: bool,
}

impl PublishReport {
    pub fn success(external_post_id: String) -> Self {
        Self {
            success: true,
            external_post_id: Some(external_post_id),
            error_message: None,
            retryable: false,
        }
    }

    pub fn failure(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            external_post_id: None,
            error_message: Some(message.into()),
            retryable,
        }
    }
}

/// One row of the operator-facing scheduled content listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledContentRow {
    pub distribution_id: String,
    pub content_id: String,
    pub title: String,
    pub platform: Platform,
    pub status: DistributionStatus,
    pub publish_at: i64,
    pub published_at: Option<i64>,
    pub failure_reason: Option<String>,
}
