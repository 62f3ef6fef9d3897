//! Meta (Facebook Pages) publisher
//!
//! Posts through the Graph API feed edge. The composed message carries title,
//! body, and hashtags; the first media URL rides along as a link attachment.

use async_trait::async_trait;
use tracing::debug;

use crate::platforms::{body_excerpt, failure_from_status, failure_from_transport, Publisher};
use crate::types::{Platform, PublishReport, SocialMediaPostRequest};

pub struct MetaPublisher {
    client: reqwest::Client,
    api_base: String,
}

#[derive(serde::Deserialize)]
struct FeedResponse {
    id: String,
}

impl MetaPublisher {
    pub fn new(api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Publisher for MetaPublisher {
    fn platform(&self) -> Platform {
        Platform::Meta
    }

    async fn publish(&self, request: &SocialMediaPostRequest) -> PublishReport {
        let url = format!("{}/me/feed", self.api_base);
        let message = request.compose_message();

        let mut form = vec![
            ("message", message.as_str()),
            ("access_token", request.access_token.as_str()),
        ];
        if let Some(link) = request.media_urls.first() {
            form.push(("link", link.as_str()));
        }

        let response = match self.client.post(&url).form(&form).send().await {
            Ok(response) => response,
            Err(e) => return failure_from_transport(Platform::Meta, &e),
        };

        let status = response.status();
        if !status.is_success() {
            return failure_from_status(Platform::Meta, status, &body_excerpt(response).await);
        }

        match response.json::<FeedResponse>().await {
            Ok(body) => {
                debug!(post_id = %body.id, "published to meta");
                PublishReport::success(body.id)
            }
            Err(e) => PublishReport::failure(
                format!("meta returned an unparseable response: {}", e),
                true,
            ),
        }
    }
}
