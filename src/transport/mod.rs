//! ActiveSync HTTP transport
//!
//! One [`Transport::send`] call is one logical command: authentication
//! retries, endpoint rediscovery and the WBXML round trip all happen inside
//! it. Every exchange is appended to the transport's transcript.

mod auth;
mod http;
mod retry;

pub use auth::{Authenticator, Authorization};
pub use http::{HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient};
pub use retry::{RetryBudget, RetryCategory};

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::autodiscovery::{AutodiscoveryError, Rediscover};
use crate::config::EngineConfig;
use crate::types::error::{EasError, Result};
use crate::types::{AccountConnection, AuthMode, RequestRecord};
use crate::wbxml::{decode, encode, is_wbxml, Element};

pub const WBXML_CONTENT_TYPE: &str = "application/vnd.ms-sync.wbxml";

/// Per-request behavior switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// An empty or non-WBXML 200 response yields `None` instead of an error
    pub allow_empty: bool,
    /// Network and HTTP errors yield `None` instead of an error
    pub soft_fail: bool,
}

impl RequestOptions {
    pub fn allow_empty() -> Self {
        Self {
            allow_empty: true,
            soft_fail: false,
        }
    }

    pub fn soft_fail(mut self) -> Self {
        self.soft_fail = true;
        self
    }
}

/// Capabilities advertised in an OPTIONS response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOptions {
    pub versions: Vec<String>,
    pub commands: Vec<String>,
}

/// Result of the HTTP part of an exchange
struct Attempt {
    url: String,
    status: Option<u16>,
    response: Option<HttpResponse>,
}

pub struct Transport {
    http: Arc<dyn HttpClient>,
    auth: Authenticator,
    discovery: Option<Arc<dyn Rediscover>>,
    config: EngineConfig,
    transcript: Mutex<Vec<RequestRecord>>,
}

impl Transport {
    pub fn new(http: Arc<dyn HttpClient>, auth: Authenticator, config: &EngineConfig) -> Self {
        Self {
            http,
            auth,
            discovery: None,
            config: config.clone(),
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Used to rediscover the endpoint of accounts with autodiscover enabled
    pub fn with_discovery(mut self, discovery: Arc<dyn Rediscover>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Send a command and append its record to the transport's transcript.
    ///
    /// `Ok(None)` means an allowed empty response or a soft failure.
    pub async fn send(
        &self,
        conn: &mut AccountConnection,
        request: &Element,
        options: RequestOptions,
    ) -> Result<Option<Element>> {
        let (result, record) = self.exchange(conn, request, options).await;
        self.record(record);
        result
    }

    /// Send a command; the root element's name is the `Cmd` parameter.
    ///
    /// The record of the exchange is returned with the result, also when
    /// the exchange failed. Nothing is added to the transcript.
    pub async fn exchange(
        &self,
        conn: &mut AccountConnection,
        request: &Element,
        options: RequestOptions,
    ) -> (Result<Option<Element>>, RequestRecord) {
        let command = request.name.clone();
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut record = RequestRecord {
            command: command.clone(),
            url: conn.endpoint(),
            started_at,
            http_status: None,
            request: request.to_xml(),
            response: None,
            elapsed_ms: 0,
        };

        let attempt = match encode(request) {
            Ok(body) => {
                debug!("Sending {} ({} bytes) for {}", command, body.len(), conn.account_id);
                self.execute(conn, Method::Post, Some(&command), body, options.soft_fail)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        let attempt = match attempt {
            Ok(attempt) => attempt,
            Err(e) => {
                record.url = conn.endpoint();
                record.elapsed_ms = clock.elapsed().as_millis() as u64;
                record.response = Some(format!("[{}]", e));
                return (Err(e), record);
            }
        };

        record.url = attempt.url;
        record.http_status = attempt.status;
        let decoded = decode_body(attempt.response.as_ref(), options.allow_empty);
        record.elapsed_ms = clock.elapsed().as_millis() as u64;
        record.response = match (&decoded, attempt.response.as_ref()) {
            (Ok(Some(tree)), _) => Some(tree.to_xml()),
            (_, Some(response)) => Some(format!("[{} bytes]", response.body.len())),
            (_, None) => None,
        };

        (decoded, record)
    }

    /// OPTIONS request: supported versions and commands
    pub async fn options(&self, conn: &mut AccountConnection) -> Result<ServerOptions> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let attempt = self
            .execute(conn, Method::Options, None, Vec::new(), false)
            .await?;

        let response = attempt
            .response
            .ok_or_else(|| EasError::MalformedPayload("no OPTIONS response".to_string()))?;
        let options = ServerOptions {
            versions: split_header(response.header("MS-ASProtocolVersions")),
            commands: split_header(response.header("MS-ASProtocolCommands")),
        };

        self.record(RequestRecord {
            command: "OPTIONS".to_string(),
            url: attempt.url,
            started_at,
            http_status: attempt.status,
            request: String::new(),
            response: Some(format!(
                "versions: {}; commands: {}",
                options.versions.join(","),
                options.commands.join(",")
            )),
            elapsed_ms: clock.elapsed().as_millis() as u64,
        });

        info!(
            "Server for {} supports versions {:?}",
            conn.account_id, options.versions
        );
        Ok(options)
    }

    /// Drain the exchanges recorded so far
    pub fn take_transcript(&self) -> Vec<RequestRecord> {
        match self.transcript.lock() {
            Ok(mut transcript) => std::mem::take(&mut *transcript),
            Err(_) => Vec::new(),
        }
    }

    fn record(&self, record: RequestRecord) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.push(record);
        }
    }

    async fn execute(
        &self,
        conn: &mut AccountConnection,
        method: Method,
        command: Option<&str>,
        body: Vec<u8>,
        soft_fail: bool,
    ) -> Result<Attempt> {
        let mut budget = RetryBudget::from_config(&self.config);

        loop {
            let authorization = self.auth.authorization(&conn.user).await?;
            let url = request_url(conn, command, &authorization.user)?;

            let mut request = HttpRequest::new(method, &url)
                .timeout(self.config.request_timeout())
                .header("User-Agent", &self.config.user_agent)
                .header("Authorization", &authorization.header);
            if let Some(version) = conn.version {
                request = request.header("MS-ASProtocolVersion", version.as_str());
            }
            if method == Method::Post {
                request = request
                    .header("Content-Type", WBXML_CONTENT_TYPE)
                    .body(body.clone());
            }
            if let Some(policy_key) = &conn.policy_key {
                request = request.header("X-MS-PolicyKey", policy_key);
            }

            let response = match self.http.execute(request).await {
                Ok(response) => response,
                Err(e) if e.is_network() => {
                    if soft_fail {
                        warn!("Ignoring network error on {}: {}", url, e);
                        return Ok(Attempt {
                            url,
                            status: None,
                            response: None,
                        });
                    }
                    self.recover_network(conn, &mut budget, e).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match response.status {
                200 => {
                    return Ok(Attempt {
                        url,
                        status: Some(200),
                        response: Some(response),
                    })
                }
                401 | 403 => {
                    self.recover_auth(&mut budget, response.status).await?;
                }
                449 => {
                    info!("Server requests provisioning for {}", conn.account_id);
                    return Err(EasError::ProvisionRequired);
                }
                451 => {
                    let location = response
                        .header("X-MS-Location")
                        .ok_or(EasError::Http(451))?;
                    let host = endpoint_host(location)?;
                    info!("Server redirects {} to {}", conn.account_id, host);
                    return Err(EasError::Redirect(host));
                }
                status if soft_fail => {
                    warn!("Ignoring HTTP {} on {}", status, url);
                    return Ok(Attempt {
                        url,
                        status: Some(status),
                        response: None,
                    });
                }
                status => return Err(EasError::Http(status)),
            }
        }
    }

    async fn recover_auth(&self, budget: &mut RetryBudget, status: u16) -> Result<()> {
        if !budget.consume(RetryCategory::PasswordPrompt) {
            warn!("Credential retries exhausted after HTTP {}", status);
            return Err(EasError::Auth(status));
        }

        match self.auth.mode() {
            AuthMode::OAuth2 => {
                self.auth.invalidate_token()?;
                Ok(())
            }
            AuthMode::Basic => {
                if self.auth.prompt_for_credentials().await? {
                    Ok(())
                } else {
                    Err(EasError::Auth(status))
                }
            }
        }
    }

    async fn recover_network(
        &self,
        conn: &mut AccountConnection,
        budget: &mut RetryBudget,
        err: EasError,
    ) -> Result<()> {
        let discovery = match &self.discovery {
            Some(discovery) if conn.autodiscover => discovery,
            _ => return Err(err),
        };
        if !budget.consume(RetryCategory::NetworkError) {
            return Err(err);
        }

        info!("Rediscovering endpoint for {} after: {}", conn.account_id, err);
        loop {
            // discovery authenticates with whatever the store holds
            self.auth.ensure_fresh().await?;
            let credentials = self.auth.credentials()?;
            match discovery.rediscover(conn.email(), &credentials).await {
                Ok(url) => return apply_endpoint(conn, &url),
                Err(AutodiscoveryError::Unauthorized(status)) => {
                    self.recover_auth(budget, status).await?;
                }
                Err(e) => return Err(EasError::Autodiscovery(e.to_string())),
            }
        }
    }
}

/// Endpoint URL with the `Cmd`, `User`, `DeviceType` and `DeviceId` parameters
fn request_url(conn: &AccountConnection, command: Option<&str>, user: &str) -> Result<String> {
    let endpoint = conn.endpoint();
    let Some(command) = command else {
        return Ok(endpoint);
    };
    let url = url::Url::parse_with_params(
        &endpoint,
        &[
            ("Cmd", command),
            ("User", user),
            ("DeviceId", conn.device_id.as_str()),
            ("DeviceType", conn.device_type.as_str()),
        ],
    )
    .map_err(|e| EasError::Config(format!("Invalid endpoint {}: {}", endpoint, e)))?;
    Ok(url.to_string())
}

/// `host[:port]` of a URL
fn endpoint_host(location: &str) -> Result<String> {
    let url = url::Url::parse(location)
        .map_err(|e| EasError::MalformedPayload(format!("bad location {}: {}", location, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| EasError::MalformedPayload(format!("no host in {}", location)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Point the connection at a discovered endpoint URL
fn apply_endpoint(conn: &mut AccountConnection, endpoint: &str) -> Result<()> {
    let host = endpoint_host(endpoint).map_err(|e| EasError::Autodiscovery(e.to_string()))?;
    conn.use_https = endpoint.to_ascii_lowercase().starts_with("https:");
    info!("Using endpoint {} for {}", host, conn.account_id);
    conn.host = host;
    Ok(())
}

fn split_header(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn decode_body(response: Option<&HttpResponse>, allow_empty: bool) -> Result<Option<Element>> {
    let Some(response) = response else {
        return Ok(None);
    };

    if response.body.is_empty() {
        return if allow_empty {
            Ok(None)
        } else {
            Err(EasError::MalformedPayload("empty response".to_string()))
        };
    }

    if !is_wbxml(&response.body) {
        if allow_empty {
            warn!("Ignoring non-WBXML response of {} bytes", response.body.len());
            return Ok(None);
        }
        return Err(EasError::MalformedPayload(
            "response is not WBXML".to_string(),
        ));
    }

    match decode(&response.body)? {
        Some(tree) => Ok(Some(tree)),
        None if allow_empty => Ok(None),
        None => Err(EasError::MalformedPayload("empty WBXML document".to_string())),
    }
}
