//! Single autodiscover probe: HEAD redirect resolution, then the mobilesync POST

use base64::{engine::general_purpose::STANDARD, Engine};
use quick_xml::de::from_str;
use quick_xml::escape::escape;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::AutodiscoveryError;
use crate::credentials::Credentials;
use crate::oauth::OAuthTokens;
use crate::transport::{HttpClient, HttpRequest, Method};

const REQUEST_SCHEMA: &str =
    "http://schemas.microsoft.com/exchange/autodiscover/mobilesync/requestschema/2006";
const RESPONSE_SCHEMA: &str =
    "http://schemas.microsoft.com/exchange/autodiscover/mobilesync/responseschema/2006";

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// MobileSync server URL
    Found(String),
    /// Server asked to retry with another address
    Redirect(String),
    /// Endpoint exists but rejected the credentials
    Unauthorized(u16),
    Failed(String),
}

impl ProbeOutcome {
    /// Higher is better when no probe fully succeeds
    pub(crate) fn rank(&self) -> u8 {
        match self {
            ProbeOutcome::Found(_) => 3,
            ProbeOutcome::Redirect(_) => 2,
            ProbeOutcome::Unauthorized(_) => 1,
            ProbeOutcome::Failed(_) => 0,
        }
    }
}

/// Well-known autodiscover URLs, secure ones first
pub fn probe_urls(domain: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for scheme in ["https", "http"] {
        for host in [format!("autodiscover.{}", domain), domain.to_string()] {
            for path in ["/autodiscover/autodiscover.xml", "/Autodiscover/Autodiscover.xml"] {
                urls.push(format!("{}://{}{}", scheme, host, path));
            }
        }
    }
    urls
}

/// mobilesync autodiscover request body
pub fn request_body(email: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n\
         <Autodiscover xmlns=\"{}\">\r\n\
         <Request>\r\n\
         <EMailAddress>{}</EMailAddress>\r\n\
         <AcceptableResponseSchema>{}</AcceptableResponseSchema>\r\n\
         </Request>\r\n\
         </Autodiscover>",
        REQUEST_SCHEMA,
        escape(email),
        RESPONSE_SCHEMA
    )
}

fn authorization_header(credentials: &Credentials) -> String {
    match serde_json::from_str::<OAuthTokens>(&credentials.secret) {
        Ok(tokens) if !tokens.access_token.is_empty() => format!("Bearer {}", tokens.access_token),
        _ => format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", credentials.user, credentials.secret))
        ),
    }
}

/// Follow HEAD redirects from `start`, returning the final URL
async fn resolve_redirects(
    http: &dyn HttpClient,
    start: &str,
    max_hops: usize,
    timeout: Duration,
) -> Result<String, AutodiscoveryError> {
    let mut target = start.to_string();
    for _ in 0..max_hops {
        let response = http
            .execute(HttpRequest::new(Method::Head, &target).timeout(timeout))
            .await
            .map_err(|e| AutodiscoveryError::Http(e.to_string()))?;

        if !matches!(response.status, 301 | 302 | 303 | 307 | 308) {
            return Ok(target);
        }

        let location = response
            .header("Location")
            .ok_or_else(|| {
                AutodiscoveryError::Http(format!("redirect from {} without Location", target))
            })?;
        let next = url::Url::parse(&target)
            .and_then(|base| base.join(location))
            .map_err(|e| AutodiscoveryError::Http(e.to_string()))?;
        debug!("Autodiscover redirect {} -> {}", target, next);
        target = next.to_string();
    }
    Err(AutodiscoveryError::Http(format!(
        "too many redirects starting at {}",
        start
    )))
}

/// Run one probe against `url`
pub async fn probe(
    http: Arc<dyn HttpClient>,
    url: String,
    email: String,
    credentials: Credentials,
    max_hops: usize,
    timeout: Duration,
) -> ProbeOutcome {
    let target = match resolve_redirects(http.as_ref(), &url, max_hops, timeout).await {
        Ok(target) => target,
        Err(e) => {
            debug!("Autodiscover probe {} failed: {}", url, e);
            return ProbeOutcome::Failed(e.to_string());
        }
    };

    let request = HttpRequest::new(Method::Post, &target)
        .timeout(timeout)
        .header("Content-Type", "text/xml; charset=utf-8")
        .header("Authorization", &authorization_header(&credentials))
        .body(request_body(&email).into_bytes());

    let response = match http.execute(request).await {
        Ok(response) => response,
        Err(e) => {
            debug!("Autodiscover POST to {} failed: {}", target, e);
            return ProbeOutcome::Failed(e.to_string());
        }
    };

    match response.status {
        200 => {
            let text = String::from_utf8_lossy(&response.body);
            match parse_response(&text) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!("Unusable autodiscover response from {}: {}", target, e);
                    ProbeOutcome::Failed(e.to_string())
                }
            }
        }
        401 | 403 => ProbeOutcome::Unauthorized(response.status),
        status => ProbeOutcome::Failed(format!("HTTP {} from {}", status, target)),
    }
}

// ============================================================================
// Response XML structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct AutodiscoverDocument {
    #[serde(rename = "Response")]
    response: Option<ResponseElement>,
}

#[derive(Debug, Deserialize)]
struct ResponseElement {
    #[serde(rename = "Action")]
    action: Option<ActionElement>,
    #[serde(rename = "Error")]
    error: Option<ErrorElement>,
}

#[derive(Debug, Deserialize)]
struct ActionElement {
    #[serde(rename = "Settings")]
    settings: Option<SettingsElement>,
    #[serde(rename = "Redirect")]
    redirect: Option<String>,
    #[serde(rename = "Error")]
    error: Option<ErrorElement>,
}

#[derive(Debug, Deserialize)]
struct SettingsElement {
    #[serde(rename = "Server", default)]
    servers: Vec<ServerElement>,
}

#[derive(Debug, Deserialize)]
struct ServerElement {
    #[serde(rename = "Type")]
    server_type: Option<String>,
    #[serde(rename = "Url")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorElement {
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "ErrorCode")]
    error_code: Option<String>,
}

impl ErrorElement {
    fn describe(&self) -> String {
        let code = self
            .error_code
            .as_deref()
            .or(self.status.as_deref())
            .unwrap_or("?");
        format!("{} {}", code, self.message.as_deref().unwrap_or("")).trim().to_string()
    }
}

/// Interpret a mobilesync autodiscover response
pub fn parse_response(xml: &str) -> Result<ProbeOutcome, AutodiscoveryError> {
    let document: AutodiscoverDocument = from_str(xml)?;
    let response = document
        .response
        .ok_or_else(|| AutodiscoveryError::NotFound("no Response element".to_string()))?;

    if let Some(error) = response.error {
        return Err(AutodiscoveryError::Server(error.describe()));
    }

    let action = response
        .action
        .ok_or_else(|| AutodiscoveryError::NotFound("no Action element".to_string()))?;

    if let Some(redirect) = action.redirect {
        return Ok(ProbeOutcome::Redirect(redirect.trim().to_string()));
    }

    if let Some(settings) = action.settings {
        let url = settings
            .servers
            .into_iter()
            .filter(|server| server.server_type.as_deref() == Some("MobileSync"))
            .find_map(|server| server.url);
        if let Some(url) = url {
            return Ok(ProbeOutcome::Found(url.trim().to_string()));
        }
    }

    if let Some(error) = action.error {
        return Err(AutodiscoveryError::Server(error.describe()));
    }

    Err(AutodiscoveryError::NotFound(
        "no MobileSync server in response".to_string(),
    ))
}
