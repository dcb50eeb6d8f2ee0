//! Real `reqwest`-based `BroadcastClient` against the YouTube Live Streaming
//! API. Three-step broadcast provisioning per §4.6: create broadcast, patch
//! category, create+bind stream.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BroadcastClient, BroadcastMetadataPatch, BroadcastStatus, CreatedBroadcast, StreamPrivacy};
use crate::config::YoutubeOAuthConfig;
use crate::{Error, Result};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const SPORTS_CATEGORY_ID: &str = "17";

/// Holds the OAuth triple plus the current access token, refreshed lazily.
struct TokenState {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    access_token: Option<String>,
}

pub struct YoutubeBroadcastClient {
    http: reqwest::Client,
    tokens: RwLock<TokenState>,
}

impl YoutubeBroadcastClient {
    pub fn new(oauth: YoutubeOAuthConfig) -> Result<Self> {
        let client_id = oauth
            .client_id
            .ok_or_else(|| Error::config("YOUTUBE_CLIENT_ID must be set"))?;
        let client_secret = oauth
            .client_secret
            .ok_or_else(|| Error::config("YOUTUBE_CLIENT_SECRET must be set"))?;
        let refresh_token = oauth
            .refresh_token
            .ok_or_else(|| Error::config("YOUTUBE_REFRESH_TOKEN must be set"))?;

        Ok(Self {
            http: Self::build_http_client(),
            tokens: RwLock::new(TokenState {
                client_id,
                client_secret,
                refresh_token,
                access_token: None,
            }),
        })
    }

    fn build_http_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|error| {
                warn!(error = %error, "failed to build a tuned reqwest client, falling back to defaults");
                reqwest::Client::new()
            })
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.tokens.read().access_token.clone() {
            return Ok(token);
        }
        self.refresh_access_token().await
    }

    async fn refresh_access_token(&self) -> Result<String> {
        let (client_id, client_secret, refresh_token) = {
            let guard = self.tokens.read();
            (
                guard.client_id.clone(),
                guard.client_secret.clone(),
                guard.refresh_token.clone(),
            )
        };

        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| Error::Other(format!("YouTube API error: token refresh failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Other(format!(
                "YouTube API error: token refresh returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("YouTube API error: malformed token response: {e}")))?;

        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("YouTube API error: token response missing access_token".to_string()))?
            .to_string();

        self.tokens.write().access_token = Some(access_token.clone());
        Ok(access_token)
    }

    async fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.access_token().await?;
        Ok(builder.bearer_auth(token))
    }
}

#[async_trait]
impl BroadcastClient for YoutubeBroadcastClient {
    async fn create_live_broadcast(
        &self,
        title: &str,
        description: &str,
        privacy: StreamPrivacy,
    ) -> Result<CreatedBroadcast> {
        let scheduled_start_time = Utc::now() + ChronoDuration::seconds(60);

        // Step 1: create the broadcast.
        let create_body = json!({
            "snippet": {
                "title": title,
                "description": description,
                "scheduledStartTime": scheduled_start_time.to_rfc3339(),
            },
            "status": {
                "privacyStatus": privacy.as_str(),
                "selfDeclaredMadeForKids": false,
            },
            "contentDetails": {
                "enableDvr": true,
                "enableAutoStart": false,
                "enableAutoStop": false,
                "recordFromStart": true,
            },
        });

        let req = self
            .http
            .post(format!(
                "{API_BASE}/liveBroadcasts?part=snippet,status,contentDetails"
            ))
            .json(&create_body);
        let req = self.authorized(req).await?;
        let broadcast: serde_json::Value = send_json(req).await?;

        let broadcast_id = broadcast["id"]
            .as_str()
            .ok_or_else(|| Error::Other("YouTube API error: broadcast response missing id".to_string()))?
            .to_string();
        let channel_id = broadcast["snippet"]["channelId"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        // Step 2: patch with category (Sports).
        let patch_body = json!({
            "id": broadcast_id,
            "snippet": {
                "title": title,
                "description": description,
                "categoryId": SPORTS_CATEGORY_ID,
            },
        });
        let req = self
            .http
            .put(format!("{API_BASE}/liveBroadcasts?part=snippet"))
            .json(&patch_body);
        let req = self.authorized(req).await?;
        let _: serde_json::Value = send_json(req).await?;

        // Step 3: create the stream (1080p/60fps/RTMP).
        let stream_body = json!({
            "snippet": { "title": title },
            "cdn": {
                "format": "1080p",
                "frameRate": "60fps",
                "ingestionType": "rtmp",
                "resolution": "1080p",
            },
        });
        let req = self
            .http
            .post(format!("{API_BASE}/liveStreams?part=snippet,cdn"))
            .json(&stream_body);
        let req = self.authorized(req).await?;
        let stream: serde_json::Value = send_json(req).await?;

        let stream_id = stream["id"]
            .as_str()
            .ok_or_else(|| Error::Other("YouTube API error: stream response missing id".to_string()))?
            .to_string();
        let stream_key = stream["cdn"]["ingestionInfo"]["streamName"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let stream_url = stream["cdn"]["ingestionInfo"]["ingestionAddress"]
            .as_str()
            .unwrap_or("rtmp://a.rtmp.youtube.com/live2")
            .to_string();

        // Bind broadcast and stream.
        let req = self.http.post(format!(
            "{API_BASE}/liveBroadcasts/bind?id={broadcast_id}&streamId={stream_id}&part=id"
        ));
        let req = self.authorized(req).await?;
        let _: serde_json::Value = send_json(req).await?;

        debug!(broadcast_id = %broadcast_id, stream_id = %stream_id, "created youtube broadcast+stream");

        Ok(CreatedBroadcast {
            broadcast_id,
            stream_id,
            stream_key,
            stream_url,
            privacy_status: privacy.as_str().to_string(),
            scheduled_start_time,
            channel_id,
            video_id: broadcast["id"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn update_broadcast(
        &self,
        broadcast_id: &str,
        patch: BroadcastMetadataPatch,
    ) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut snippet = serde_json::Map::new();
        if let Some(title) = patch.title {
            snippet.insert("title".to_string(), json!(title));
        }
        if let Some(description) = patch.description {
            snippet.insert("description".to_string(), json!(description));
        }
        let body = json!({ "id": broadcast_id, "snippet": snippet });

        let req = self
            .http
            .put(format!("{API_BASE}/liveBroadcasts?part=snippet"))
            .json(&body);
        let req = self.authorized(req).await?;
        let _: serde_json::Value = send_json(req).await?;
        Ok(())
    }

    async fn end_broadcast(&self, broadcast_id: &str) -> Result<()> {
        let req = self.http.post(format!(
            "{API_BASE}/liveBroadcasts/transition?broadcastStatus=complete&id={broadcast_id}&part=id"
        ));
        let req = self.authorized(req).await?;
        let _: serde_json::Value = send_json(req).await?;
        Ok(())
    }

    async fn get_broadcast_and_stream_status(
        &self,
        broadcast_id: &str,
        stream_id: &str,
    ) -> Result<BroadcastStatus> {
        let req = self.http.get(format!(
            "{API_BASE}/liveBroadcasts?id={broadcast_id}&part=status,contentDetails"
        ));
        let req = self.authorized(req).await?;
        let broadcast: serde_json::Value = send_json(req).await?;

        let item = broadcast["items"].get(0).cloned().unwrap_or_default();
        let life_cycle_status = item["status"]["lifeCycleStatus"]
            .as_str()
            .map(str::to_string);
        let actual_end_time = item["contentDetails"]["actualEndTime"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let req = self
            .http
            .get(format!("{API_BASE}/liveStreams?id={stream_id}&part=status"));
        let req = self.authorized(req).await?;
        let stream: serde_json::Value = send_json(req).await?;
        let stream_status = stream["items"][0]["status"]["streamStatus"]
            .as_str()
            .map(str::to_string);

        Ok(BroadcastStatus {
            life_cycle_status,
            actual_end_time,
            stream_status,
        })
    }

    async fn update_refresh_token(&self, new_token: String) -> Result<()> {
        let mut guard = self.tokens.write();
        guard.refresh_token = new_token;
        guard.access_token = None;
        Ok(())
    }
}

async fn send_json(req: reqwest::RequestBuilder) -> Result<serde_json::Value> {
    let response = req
        .send()
        .await
        .map_err(|e| Error::Other(format!("YouTube API error: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Other(format!(
            "YouTube API error: {status}: {body}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| Error::Other(format!("YouTube API error: malformed response: {e}")))
}

#[allow(dead_code)]
fn _assert_send_sync<T: Send + Sync>() {}
#[allow(dead_code)]
fn _check() {
    _assert_send_sync::<Arc<YoutubeBroadcastClient>>();
}
