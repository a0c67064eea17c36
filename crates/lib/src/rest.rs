//! REST sender: versioned URLs, bot authorization and JSON bodies over the multiplexer.
//!
//! `send` blocks (driving the multiplexer) until its own exchange finishes and is meant for
//! startup calls. Everything issued from the tick loop goes through `send_async` and completes
//! in a later `poll`.

use crate::commands::{CommandRemote, InteractionResponse};
use crate::net::{HttpRequest, HttpResponse, Multiplexer, NetContext, RequestHandle, TransportError};
use crate::snowflake::Snowflake;
use reqwest::Method;
use serde_json::Value;

pub const DEFAULT_API_ROOT: &str = "https://discord.com/api";
pub const DEFAULT_API_VERSION: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub api_root: String,
    pub api_version: u32,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            api_version: DEFAULT_API_VERSION,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// No response at all. Distinct from a response with a non-2xx status.
    #[error("no response: {0}")]
    Transport(#[from] TransportError),
    #[error("{path} returned status {status}")]
    Status { path: String, status: u16 },
    #[error("{path} response has no `{field}`")]
    MissingField { path: String, field: &'static str },
    #[error("encoding request body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A response that made it back. `body` is `None` when empty or not JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<HttpResponse> for RestResponse {
    fn from(response: HttpResponse) -> Self {
        let body = if response.body.is_empty() {
            None
        } else {
            match serde_json::from_slice(&response.body) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::debug!("response body (status {}) is not JSON: {}", response.status, e);
                    None
                }
            }
        };
        RestResponse {
            status: response.status,
            body,
        }
    }
}

pub type ResponseCallback = Box<dyn FnOnce(Result<RestResponse, RestError>)>;

/// `<api_root>/v<version><path>`; `path` starts with `/`.
pub fn build_url(api_root: &str, api_version: u32, path: &str) -> String {
    format!("{}/v{}{}", api_root.trim_end_matches('/'), api_version, path)
}

pub fn auth_header(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bot {}", token))
}

/// Global or guild-scoped command endpoint.
pub fn command_endpoint(app_id: Snowflake, guild_id: Option<Snowflake>) -> String {
    match guild_id {
        Some(guild) => format!("/applications/{}/guilds/{}/commands", app_id, guild),
        None => format!("/applications/{}/commands", app_id),
    }
}

pub struct RestSender {
    mux: Multiplexer,
    config: RestConfig,
    token: String,
}

impl RestSender {
    pub fn new(
        ctx: &NetContext,
        config: RestConfig,
        token: impl Into<String>,
    ) -> Result<Self, RestError> {
        Ok(Self {
            mux: Multiplexer::open(ctx)?,
            config,
            token: token.into(),
        })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    pub fn build_url(&self, path: &str) -> String {
        build_url(&self.config.api_root, self.config.api_version, path)
    }

    /// Exchanges still in flight.
    pub fn pending(&self) -> usize {
        self.mux.pending()
    }

    fn request(&self, path: &str, method: Method, body: Option<&Value>) -> HttpRequest {
        let (name, value) = auth_header(&self.token);
        let mut request = HttpRequest::new(method, self.build_url(path)).header(name, value);
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }
        request
    }

    /// Issue a request and wait for its response. Other exchanges keep completing meanwhile.
    pub fn send(
        &mut self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<RestResponse, RestError> {
        log::debug!("{} {}", method, path);
        let request = self.request(path, method, body);
        let response = self.mux.send_await(request)?;
        Ok(RestResponse::from(response))
    }

    /// Issue a request; `on_done` runs from a later `poll`.
    pub fn send_async(
        &mut self,
        path: &str,
        method: Method,
        body: Option<&Value>,
        on_done: ResponseCallback,
    ) -> RequestHandle {
        log::debug!("{} {} (async)", method, path);
        let request = self.request(path, method, body);
        self.mux.send(
            request,
            None,
            Box::new(move |outcome| {
                on_done(
                    outcome
                        .map(RestResponse::from)
                        .map_err(RestError::Transport),
                )
            }),
        )
    }

    /// Drive in-flight exchanges. Returns how many completed.
    pub fn poll(&mut self) -> Result<usize, RestError> {
        Ok(self.mux.poll()?)
    }

    /// Abandon in-flight exchanges; their callbacks never run.
    pub fn shutdown(&mut self) {
        self.mux.shutdown();
    }

    /// `GET /gateway/bot` and return the streaming endpoint URL.
    pub fn resolve_streaming_url(&mut self) -> Result<String, RestError> {
        const PATH: &str = "/gateway/bot";
        let response = self.send(PATH, Method::GET, None)?;
        if response.status != 200 {
            log::error!("gateway lookup failed with status {}", response.status);
            return Err(RestError::Status {
                path: PATH.to_string(),
                status: response.status,
            });
        }
        response
            .body
            .as_ref()
            .and_then(|body| body.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(RestError::MissingField {
                path: PATH.to_string(),
                field: "url",
            })
    }

    pub fn create_command(
        &mut self,
        app_id: Snowflake,
        guild_id: Option<Snowflake>,
        body: &Value,
    ) -> Result<RestResponse, RestError> {
        self.send(&command_endpoint(app_id, guild_id), Method::POST, Some(body))
    }

    /// Answer an interaction. Sent asynchronously; failures are logged when they complete.
    pub fn respond_to_interaction(
        &mut self,
        interaction_id: Snowflake,
        token: &str,
        response: &InteractionResponse,
    ) -> Result<RequestHandle, RestError> {
        let body = serde_json::to_value(response)?;
        let path = format!("/interactions/{}/{}/callback", interaction_id, token);
        Ok(self.send_async(
            &path,
            Method::POST,
            Some(&body),
            Box::new(move |outcome| match outcome {
                Ok(r) if r.is_success() => {
                    log::debug!("interaction {} answered", interaction_id)
                }
                Ok(r) => log::error!(
                    "interaction {} response rejected with status {}: {}",
                    interaction_id,
                    r.status,
                    r.body.unwrap_or(Value::Null)
                ),
                Err(e) => log::error!("interaction {} response failed: {}", interaction_id, e),
            }),
        ))
    }
}

impl CommandRemote for RestSender {
    fn create_command(
        &mut self,
        app_id: Snowflake,
        guild_id: Option<Snowflake>,
        body: &Value,
    ) -> Result<RestResponse, RestError> {
        RestSender::create_command(self, app_id, guild_id, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_versioned() {
        assert_eq!(
            build_url("https://discord.com/api", 10, "/gateway/bot"),
            "https://discord.com/api/v10/gateway/bot"
        );
        assert_eq!(
            build_url("http://127.0.0.1:8080/api/", 9, "/x"),
            "http://127.0.0.1:8080/api/v9/x"
        );
    }

    #[test]
    fn auth_header_uses_bot_scheme() {
        assert_eq!(
            auth_header("abc.def"),
            ("Authorization", "Bot abc.def".to_string())
        );
    }

    #[test]
    fn command_endpoints() {
        assert_eq!(
            command_endpoint(Snowflake(1), None),
            "/applications/1/commands"
        );
        assert_eq!(
            command_endpoint(Snowflake(1), Some(Snowflake(22))),
            "/applications/1/guilds/22/commands"
        );
    }

    #[test]
    fn response_body_parsing() {
        let r = RestResponse::from(HttpResponse {
            status: 404,
            body: br#"{"message":"Unknown"}"#.to_vec(),
        });
        assert!(!r.is_success());
        assert_eq!(r.body.unwrap()["message"], "Unknown");

        let r = RestResponse::from(HttpResponse {
            status: 204,
            body: Vec::new(),
        });
        assert!(r.is_success());
        assert!(r.body.is_none());

        let r = RestResponse::from(HttpResponse {
            status: 502,
            body: b"<html>bad gateway</html>".to_vec(),
        });
        assert!(r.body.is_none());
    }

    #[test]
    fn request_carries_auth_and_json_body() {
        let ctx = NetContext::new();
        let sender = RestSender::new(&ctx, RestConfig::default(), "tok").unwrap();
        let body = serde_json::json!({ "a": 1 });
        let req = sender.request("/x", Method::POST, Some(&body));
        assert_eq!(req.url, "https://discord.com/api/v10/x");
        assert!(req
            .headers
            .contains(&("Authorization".to_string(), "Bot tok".to_string())));
        assert_eq!(req.body.as_deref(), Some(&br#"{"a":1}"#[..]));
    }

    #[test]
    fn unreachable_host_is_the_no_response_sentinel() {
        let ctx = NetContext::new();
        let config = RestConfig {
            api_root: "http://127.0.0.1:9/api".to_string(),
            api_version: 10,
        };
        let mut sender = RestSender::new(&ctx, config, "tok").unwrap();
        assert!(matches!(
            sender.send("/gateway/bot", Method::GET, None),
            Err(RestError::Transport(_))
        ));
    }
}
