//! X (Twitter) publisher using the v2 tweet endpoint

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::platforms::{body_excerpt, failure_from_status, failure_from_transport, Publisher};
use crate::types::{Platform, PublishReport, SocialMediaPostRequest};

pub struct XPublisher {
    client: reqwest::Client,
    api_base: String,
}

#[derive(serde::Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(serde::Deserialize)]
struct TweetData {
    id: String,
}

impl XPublisher {
    pub fn new(api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Publisher for XPublisher {
    fn platform(&self) -> Platform {
        Platform::X
    }

    async fn publish(&self, request: &SocialMediaPostRequest) -> PublishReport {
        let url = format!("{}/2/tweets", self.api_base);

        let response = match self
            .client
            .post(&url)
            .bearer_auth(&request.access_token)
            .json(&json!({ "text": request.compose_message() }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return failure_from_transport(Platform::X, &e),
        };

        let status = response.status();
        if !status.is_success() {
            return failure_from_status(Platform::X, status, &body_excerpt(response).await);
        }

        match response.json::<TweetResponse>().await {
            Ok(body) => {
                debug!(tweet_id = %body.data.id, "published to x");
                PublishReport::success(body.data.id)
            }
            Err(e) => {
                PublishReport::failure(format!("x returned an unparseable response: {}", e), true)
            }
        }
    }
}
