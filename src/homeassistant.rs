/*
 *  homeassistant.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Home Assistant REST: entity state queries and service calls
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use log::{debug, warn};
use reqwest::{Client, Error as ReqwestError, RequestBuilder, header};
use serde::Deserialize;
use serde_json::{Error as SerdeJsonError, json};
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::time::Duration;

use crate::config::HomeAssistantConfig;

/// Custom error type for Home Assistant REST operations.
#[derive(Debug)]
pub enum RestError {
    /// Transport level failure (refused, timeout, TLS).
    HttpRequestError(ReqwestError),
    /// Non-success HTTP status.
    Status(u16),
    /// Body was not the JSON we expected.
    DeserializationError(SerdeJsonError),
    /// Token cannot be used as a header value.
    InvalidToken,
}

impl Display for RestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RestError::HttpRequestError(e) => write!(f, "HTTP request error: {}", e),
            RestError::Status(code) => write!(f, "Home Assistant returned HTTP {}", code),
            RestError::DeserializationError(e) => write!(f, "JSON deserialization error: {}", e),
            RestError::InvalidToken => write!(f, "access token is not a valid header value"),
        }
    }
}

impl std::error::Error for RestError {}

impl From<ReqwestError> for RestError {
    fn from(err: ReqwestError) -> Self {
        RestError::HttpRequestError(err)
    }
}

impl From<SerdeJsonError> for RestError {
    fn from(err: SerdeJsonError) -> Self {
        RestError::DeserializationError(err)
    }
}

impl RestError {
    /// Worth another attempt: transport failures and server side errors.
    fn is_transient(&self) -> bool {
        match self {
            RestError::HttpRequestError(_) => true,
            RestError::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntityState {
    state: String,
}

/// The subset of the Home Assistant API the panel relies on.
pub trait HomeApi: Clone + Send + Sync + 'static {
    fn entity_state(&self, entity_id: &str) -> impl Future<Output = Result<String, RestError>> + Send;

    fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
    ) -> impl Future<Output = Result<(), RestError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HomeAssistant {
    client: Client,
    base_url: String,
    retries: u8,
    retry_delay: Duration,
}

impl HomeAssistant {
    pub fn new(cfg: &HomeAssistantConfig) -> Result<Self, RestError> {
        const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Content-Type", header::HeaderValue::from_static("application/json"));
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));
        let mut bearer = header::HeaderValue::from_str(&format!("Bearer {}", cfg.token))
            .map_err(|_| RestError::InvalidToken)?;
        bearer.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, bearer);

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.timeout_ms.min(1500)))
            .default_headers(headers)
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            retries: cfg.retries,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        })
    }

    /// Send, retrying transient failures up to `retries` more times, and
    /// return the body of the first successful response.
    async fn send_with_retries<F>(&self, build: F) -> Result<String, RestError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let err = match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }
                    RestError::Status(status.as_u16())
                }
                Err(e) => RestError::from(e),
            };
            if !err.is_transient() || attempt >= self.retries {
                return Err(err);
            }
            attempt += 1;
            warn!("Home Assistant request failed ({}), retry {}/{}", err, attempt, self.retries);
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

impl HomeApi for HomeAssistant {
    async fn entity_state(&self, entity_id: &str) -> Result<String, RestError> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let body = self.send_with_retries(|| self.client.get(&url)).await?;
        let entity: EntityState = serde_json::from_str(&body)?;
        debug!("{} = {}", entity_id, entity.state);
        Ok(entity.state)
    }

    async fn call_service(&self, domain: &str, service: &str, entity_id: &str) -> Result<(), RestError> {
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, service);
        let body = json!({ "entity_id": entity_id });
        self.send_with_retries(|| self.client.post(&url).json(&body)).await?;
        debug!("called {}.{} on {}", domain, service, entity_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(url: String) -> HomeAssistantConfig {
        HomeAssistantConfig {
            base_url: url,
            token: "secret-token".to_string(),
            retry_delay_ms: 1,
            ..HomeAssistantConfig::default()
        }
    }

    #[tokio::test]
    async fn test_entity_state() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/api/states/sensor.daily_energy_consumption")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"entity_id":"sensor.daily_energy_consumption","state":"12.5","attributes":{}}"#)
            .create_async()
            .await;

        let ha = HomeAssistant::new(&config(server.url())).unwrap();
        let state = ha.entity_state("sensor.daily_energy_consumption").await.unwrap();
        assert_eq!(state, "12.5");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_call_service_posts_entity_id() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/services/switch/turn_on")
            .match_header("authorization", "Bearer secret-token")
            .match_body(Matcher::Json(json!({"entity_id": "switch.tasmota"})))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let ha = HomeAssistant::new(&config(server.url())).unwrap();
        ha.call_service("switch", "turn_on", "switch.tasmota").await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/api/states/switch.tasmota")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let ha = HomeAssistant::new(&config(server.url())).unwrap();
        let err = ha.entity_state("switch.tasmota").await.unwrap_err();
        assert!(matches!(err, RestError::Status(503)));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/api/states/sensor.nope")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let ha = HomeAssistant::new(&config(server.url())).unwrap();
        assert!(matches!(ha.entity_state("sensor.nope").await, Err(RestError::Status(404))));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/states/sensor.x")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let ha = HomeAssistant::new(&config(server.url())).unwrap();
        assert!(matches!(ha.entity_state("sensor.x").await, Err(RestError::DeserializationError(_))));
    }

    #[test]
    fn test_bad_token_rejected() {
        let mut cfg = config("http://localhost".to_string());
        cfg.token = "line\nbreak".to_string();
        assert!(matches!(HomeAssistant::new(&cfg), Err(RestError::InvalidToken)));
    }
}
