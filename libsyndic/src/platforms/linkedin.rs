//! LinkedIn publisher using the UGC posts endpoint

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::platforms::{body_excerpt, failure_from_status, failure_from_transport, Publisher};
use crate::types::{Platform, PublishReport, SocialMediaPostRequest};

pub struct LinkedInPublisher {
    client: reqwest::Client,
    api_base: String,
    /// URN of the organization the posts are authored as
    author_urn: String,
}

#[derive(serde::Deserialize)]
struct UgcResponse {
    id: String,
}

impl LinkedInPublisher {
    pub fn new(api_base: String, author_urn: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            author_urn,
        }
    }
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    async fn publish(&self, request: &SocialMediaPostRequest) -> PublishReport {
        let url = format!("{}/v2/ugcPosts", self.api_base);
        let body = json!({
            "author": self.author_urn,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": request.compose_message() },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
            }
        });

        let response = match self
            .client
            .post(&url)
            .bearer_auth(&request.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return failure_from_transport(Platform::LinkedIn, &e),
        };

        let status = response.status();
        if !status.is_success() {
            return failure_from_status(Platform::LinkedIn, status, &body_excerpt(response).await);
        }

        match response.json::<UgcResponse>().await {
            Ok(parsed) => {
                debug!(post_urn = %parsed.id, "published to linkedin");
                PublishReport::success(parsed.id)
            }
            Err(e) => PublishReport::failure(
                format!("linkedin returned an unparseable response: {}", e),
                true,
            ),
        }
    }
}
