//! Publisher implementations for supported platforms
//!
//! Each platform implements [`Publisher`]. The scheduler never names a
//! platform directly; it looks publishers up in the [`PublisherRegistry`] by
//! the distribution's platform, so adding a platform means adding a module
//! here and a registration line in the daemon.

pub mod linkedin;
pub mod meta;
pub mod mock;
pub mod x;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::Config;
use crate::error::{Result, SyndicError};
use crate::types::{Platform, PublishReport, SocialMediaPostRequest};

/// A client that can deliver a post to one external platform.
///
/// `publish` never returns Err: every outcome, including network trouble, is
/// folded into the [`PublishReport`] so the retry policy sees a uniform shape.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> Platform;

    async fn publish(&self, request: &SocialMediaPostRequest) -> PublishReport;
}

/// Platform -> publisher lookup table
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher, replacing any earlier one for the same platform.
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(publisher.platform(), publisher);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn Publisher>> {
        self.publishers.get(&platform).cloned().ok_or_else(|| {
            SyndicError::UnsupportedPlatform(format!("no publisher registered for {}", platform))
        })
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.publishers.contains_key(&platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.publishers.keys().copied().collect()
    }

    /// Every registered publisher, for fan-out operations
    pub fn all(&self) -> Vec<Arc<dyn Publisher>> {
        self.publishers.values().cloned().collect()
    }
}

/// Build a registry from the enabled platform sections of a config.
///
/// Sections that are enabled but incomplete, or name a platform with no
/// publisher implementation, are skipped with a warning.
pub fn registry_from_config(config: &Config) -> PublisherRegistry {
    let mut registry = PublisherRegistry::new();
    for (platform, api) in config.enabled_platforms() {
        match platform {
            Platform::Meta => {
                registry.register(Arc::new(meta::MetaPublisher::new(api.api_base.clone())));
            }
            Platform::X => {
                registry.register(Arc::new(x::XPublisher::new(api.api_base.clone())));
            }
            Platform::LinkedIn => match &api.author_urn {
                Some(urn) => {
                    registry.register(Arc::new(linkedin::LinkedInPublisher::new(
                        api.api_base.clone(),
                        urn.clone(),
                    )));
                }
                None => warn!("linkedin enabled but author_urn is missing; skipping"),
            },
            other => warn!("no publisher implementation for {}; skipping", other),
        }
    }
    registry
}

/// Rate limits and server-side errors are worth retrying; everything else a
/// platform rejects (bad token, malformed post) will not get better on its own.
pub(crate) fn retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Map an HTTP response to a failure report using a platform-supplied body
/// excerpt.
pub(crate) fn failure_from_status(
    platform: Platform,
    status: reqwest::StatusCode,
    body_excerpt: &str,
) -> PublishReport {
    PublishReport::failure(
        format!("{} returned {}: {}", platform, status, body_excerpt),
        retryable_status(status),
    )
}

/// Transport-level failures (DNS, connect, timeout) are always retryable.
pub(crate) fn failure_from_transport(platform: Platform, err: &reqwest::Error) -> PublishReport {
    PublishReport::failure(format!("{} request failed: {}", platform, err), true)
}

/// First few hundred bytes of an error body, for the failure reason
pub(crate) async fn body_excerpt(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(text) => text.chars().take(300).collect(),
        Err(_) => String::from("(unreadable body)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockPublisher;

    #[test]
    fn registry_returns_registered_publisher() {
        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(MockPublisher::always_succeeding(Platform::Meta)));

        assert!(registry.supports(Platform::Meta));
        assert_eq!(registry.get(Platform::Meta).unwrap().platform(), Platform::Meta);
    }

    #[test]
    fn unknown_platform_is_an_error() {
        let registry = PublisherRegistry::new();
        assert!(matches!(
            registry.get(Platform::TikTok),
            Err(SyndicError::UnsupportedPlatform(_))
        ));
        assert!(!registry.supports(Platform::TikTok));
    }

    #[test]
    fn all_returns_every_registered_publisher() {
        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(MockPublisher::always_succeeding(Platform::Meta)));
        registry.register(Arc::new(MockPublisher::always_succeeding(Platform::X)));

        let mut platforms: Vec<Platform> =
            registry.all().iter().map(|p| p.platform()).collect();
        platforms.sort_by_key(|p| p.as_str());
        assert_eq!(platforms, vec![Platform::Meta, Platform::X]);
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!retryable_status(StatusCode::FORBIDDEN));
        assert!(!retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn failure_report_carries_platform_and_status() {
        let report = failure_from_status(
            Platform::X,
            reqwest::StatusCode::UNAUTHORIZED,
            "invalid token",
        );
        assert!(!report.success);
        assert!(!report.retryable);
        let message = report.error_message.unwrap();
        assert!(message.contains("x"));
        assert!(message.contains("401"));
        assert!(message.contains("invalid token"));
    }
}
