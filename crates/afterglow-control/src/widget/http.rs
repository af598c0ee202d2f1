//! Remote player controlled over HTTP
//!
//! The player exposes a small REST surface:
//!
//! | method | path | body / response |
//! |---|---|---|
//! | GET | `/api/health` | 2xx when the player API is loaded |
//! | GET | `/api/ready` | `{ "ready": bool }` |
//! | POST | `/api/player/play`, `/api/player/pause` | |
//! | POST | `/api/player/mute` | `{ "muted": bool }` |
//! | POST | `/api/player/seek` | `{ "positionMs": u64 }` |
//! | POST | `/api/player/skip/{index}` | |
//! | GET | `/api/player/tracks` | `{ "count": usize }` |
//! | GET | `/api/player/position` | `{ "positionMs": u64 }` |
//! | GET | `/api/player/state` | `{ "state": "...", "error": string? }` |
//!
//! Events are produced by polling `/api/player/state`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::player::{PlayerWidget, WidgetEvent, WidgetHost};
use crate::error::WidgetError;

#[derive(Deserialize)]
struct ReadyResponse {
    ready: bool,
}

#[derive(Deserialize)]
struct TracksResponse {
    count: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionBody {
    position_ms: u64,
}

#[derive(Serialize)]
struct MuteBody {
    muted: bool,
}

/// Player state as reported by `/api/player/state`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlayerState {
    /// `ready`, `playing`, `paused`, `finished` or anything else
    pub state: String,
    #[serde(default)]
    pub error: Option<String>,
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Loads and binds players on a remote HTTP host
pub struct HttpWidgetHost {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    api_loaded: AtomicBool,
}

impl HttpWidgetHost {
    pub fn new(base_url: impl Into<String>, poll_interval: Duration) -> Result<Self, WidgetError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            poll_interval,
            api_loaded: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl WidgetHost for HttpWidgetHost {
    async fn load_api(&self) -> Result<(), WidgetError> {
        let url = endpoint(&self.base_url, "/api/health");
        let result = self.client.get(&url).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                self.api_loaded.store(true, Ordering::SeqCst);
                info!("Player API available at {}", self.base_url);
                Ok(())
            }
            Ok(resp) => {
                self.api_loaded.store(false, Ordering::SeqCst);
                Err(WidgetError::ApiUnavailable(format!(
                    "{} answered HTTP {}",
                    url,
                    resp.status()
                )))
            }
            Err(e) => {
                self.api_loaded.store(false, Ordering::SeqCst);
                Err(WidgetError::ApiUnavailable(e.to_string()))
            }
        }
    }

    fn api_present(&self) -> bool {
        self.api_loaded.load(Ordering::SeqCst)
    }

    async fn is_ready(&self) -> bool {
        let url = endpoint(&self.base_url, "/api/ready");
        let Ok(resp) = self.client.get(&url).send().await else {
            return false;
        };
        if !resp.status().is_success() {
            return false;
        }
        resp.json::<ReadyResponse>()
            .await
            .map(|body| body.ready)
            .unwrap_or(false)
    }

    async fn bind(&self) -> Result<Box<dyn PlayerWidget>, WidgetError> {
        Ok(Box::new(HttpPlayerWidget {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            poll_interval: self.poll_interval,
            poller: None,
        }))
    }
}

/// One bound remote player
pub struct HttpPlayerWidget {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    poller: Option<JoinHandle<()>>,
}

impl HttpPlayerWidget {
    async fn post(&self, path: &str) -> Result<(), WidgetError> {
        self.client
            .post(endpoint(&self.base_url, path))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn post_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(), WidgetError> {
        self.client
            .post(endpoint(&self.base_url, path))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl PlayerWidget for HttpPlayerWidget {
    async fn play(&mut self) -> Result<(), WidgetError> {
        self.post("/api/player/play").await
    }

    async fn pause(&mut self) -> Result<(), WidgetError> {
        self.post("/api/player/pause").await
    }

    async fn set_muted(&mut self, muted: bool) -> Result<(), WidgetError> {
        self.post_json("/api/player/mute", &MuteBody { muted }).await
    }

    async fn seek(&mut self, position: Duration) -> Result<(), WidgetError> {
        let body = PositionBody {
            position_ms: position.as_millis() as u64,
        };
        self.post_json("/api/player/seek", &body).await
    }

    async fn track_count(&mut self) -> Result<usize, WidgetError> {
        let body: TracksResponse = self
            .client
            .get(endpoint(&self.base_url, "/api/player/tracks"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.count)
    }

    async fn skip_to(&mut self, index: usize) -> Result<(), WidgetError> {
        self.post(&format!("/api/player/skip/{}", index)).await
    }

    async fn position(&mut self) -> Result<Duration, WidgetError> {
        let body: PositionBody = self
            .client
            .get(endpoint(&self.base_url, "/api/player/position"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Duration::from_millis(body.position_ms))
    }

    fn bind_events(&mut self, events: mpsc::UnboundedSender<WidgetEvent>) {
        self.unbind_events();
        let client = self.client.clone();
        let url = endpoint(&self.base_url, "/api/player/state");
        let period = self.poll_interval;
        self.poller = Some(tokio::spawn(poll_state(client, url, period, events)));
    }

    fn unbind_events(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

impl Drop for HttpPlayerWidget {
    fn drop(&mut self) {
        self.unbind_events();
    }
}

async fn poll_state(
    client: reqwest::Client,
    url: String,
    period: Duration,
    events: mpsc::UnboundedSender<WidgetEvent>,
) {
    let mut interval = tokio::time::interval(period);
    let mut last: Option<PlayerState> = None;

    loop {
        interval.tick().await;
        let state = match client.get(&url).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json::<PlayerState>().await {
                    Ok(state) => state,
                    Err(e) => {
                        debug!("Unreadable player state: {}", e);
                        continue;
                    }
                },
                Err(e) => {
                    if events.send(WidgetEvent::Error(e.to_string())).is_err() {
                        break;
                    }
                    continue;
                }
            },
            Err(e) => {
                if events.send(WidgetEvent::NetworkError(e.to_string())).is_err() {
                    break;
                }
                continue;
            }
        };

        if last.as_ref() == Some(&state) {
            continue;
        }
        for event in state_events(last.as_ref(), &state) {
            if events.send(event).is_err() {
                return;
            }
        }
        last = Some(state);
    }
}

/// Events implied by a state change
fn state_events(previous: Option<&PlayerState>, current: &PlayerState) -> Vec<WidgetEvent> {
    let mut out = Vec::new();
    if previous.is_none() {
        out.push(WidgetEvent::Ready);
    }
    if let Some(error) = &current.error {
        if previous.and_then(|p| p.error.as_ref()) != Some(error) {
            out.push(WidgetEvent::Error(error.clone()));
        }
    }
    if previous.map(|p| p.state.as_str()) != Some(current.state.as_str()) {
        match current.state.as_str() {
            "playing" => out.push(WidgetEvent::Play),
            "paused" => out.push(WidgetEvent::Pause),
            "finished" | "ended" => out.push(WidgetEvent::Finish),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str, error: Option<&str>) -> PlayerState {
        PlayerState {
            state: name.to_string(),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("http://host:1/", "/api/ready"),
            "http://host:1/api/ready"
        );
    }

    #[test]
    fn test_first_state_is_ready() {
        let events = state_events(None, &state("playing", None));
        assert_eq!(events, vec![WidgetEvent::Ready, WidgetEvent::Play]);
    }

    #[test]
    fn test_transitions() {
        let playing = state("playing", None);
        assert_eq!(
            state_events(Some(&playing), &state("ended", None)),
            vec![WidgetEvent::Finish]
        );
        assert!(state_events(Some(&playing), &playing).is_empty());

        let broken = state("paused", Some("decode failed"));
        assert_eq!(
            state_events(Some(&playing), &broken),
            vec![
                WidgetEvent::Error("decode failed".to_string()),
                WidgetEvent::Pause
            ]
        );
        // Same error is reported once
        assert!(state_events(Some(&broken), &broken).is_empty());
    }

    #[test]
    fn test_position_body_is_camel_case() {
        let json = serde_json::to_value(PositionBody { position_ms: 1500 }).unwrap();
        assert_eq!(json["positionMs"], 1500);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_loaded() {
        let host = HttpWidgetHost::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        assert!(host.load_api().await.is_err());
        assert!(!host.api_present());
        assert!(!host.is_ready().await);
    }
}
