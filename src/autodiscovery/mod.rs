//! Exchange autodiscover for the ActiveSync endpoint
//!
//! All well-known URLs are probed concurrently under one shared deadline; the
//! first probe that yields a MobileSync server wins. A `Redirect` action
//! restarts discovery once with the new address.

mod probe;

pub use probe::{parse_response, probe_urls, request_body, ProbeOutcome};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::credentials::Credentials;
use crate::transport::HttpClient;
use crate::types::error::EasError;

/// Errors that can occur during autodiscovery
#[derive(Debug, Error)]
pub enum AutodiscoveryError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("No ActiveSync server found: {0}")]
    NotFound(String),

    #[error("Autodiscover rejected credentials with HTTP {0}")]
    Unauthorized(u16),

    #[error("Autodiscover timed out after {0:?}")]
    Timeout(Duration),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("Autodiscover server error: {0}")]
    Server(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<AutodiscoveryError> for EasError {
    fn from(err: AutodiscoveryError) -> Self {
        match err {
            AutodiscoveryError::Unauthorized(status) => EasError::Auth(status),
            other => EasError::Autodiscovery(other.to_string()),
        }
    }
}

/// Finds a new endpoint for an account whose server became unreachable
#[async_trait]
pub trait Rediscover: Send + Sync {
    /// URL of the MobileSync endpoint for `email`
    async fn rediscover(
        &self,
        email: &str,
        credentials: &Credentials,
    ) -> Result<String, AutodiscoveryError>;
}

/// Autodiscover client
pub struct Autodiscover {
    http: Arc<dyn HttpClient>,
    deadline: Duration,
    max_hops: usize,
    request_timeout: Duration,
}

impl Autodiscover {
    pub fn new(http: Arc<dyn HttpClient>, config: &EngineConfig) -> Self {
        Self {
            http,
            deadline: config.autodiscover_deadline(),
            max_hops: config.autodiscover_max_hops,
            request_timeout: config.request_timeout(),
        }
    }

    /// Discover the MobileSync URL for `email`
    pub async fn discover(
        &self,
        email: &str,
        credentials: &Credentials,
    ) -> Result<String, AutodiscoveryError> {
        let mut address = email.to_string();

        // a Redirect action is followed once
        for round in 0..2 {
            let domain = domain_of(&address)?;
            info!("Running autodiscover for {} against {}", address, domain);

            match self.run_probes(&address, &domain, credentials).await? {
                ProbeOutcome::Found(url) => {
                    info!("Autodiscover found {}", url);
                    return Ok(url);
                }
                ProbeOutcome::Redirect(next) if round == 0 => {
                    info!("Autodiscover redirected {} to {}", address, next);
                    address = next;
                }
                ProbeOutcome::Redirect(next) => {
                    return Err(AutodiscoveryError::NotFound(format!(
                        "second redirect to {}",
                        next
                    )));
                }
                ProbeOutcome::Unauthorized(status) => {
                    return Err(AutodiscoveryError::Unauthorized(status));
                }
                ProbeOutcome::Failed(reason) => {
                    return Err(AutodiscoveryError::NotFound(reason));
                }
            }
        }

        Err(AutodiscoveryError::NotFound(email.to_string()))
    }

    async fn run_probes(
        &self,
        email: &str,
        domain: &str,
        credentials: &Credentials,
    ) -> Result<ProbeOutcome, AutodiscoveryError> {
        let deadline = Instant::now() + self.deadline;
        let mut probes = JoinSet::new();

        for url in probe_urls(domain) {
            probes.spawn(probe::probe(
                self.http.clone(),
                url,
                email.to_string(),
                credentials.clone(),
                self.max_hops,
                self.request_timeout,
            ));
        }

        let mut best = ProbeOutcome::Failed(format!("no autodiscover endpoint for {}", domain));
        loop {
            match timeout_at(deadline, probes.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    if matches!(outcome, ProbeOutcome::Found(_) | ProbeOutcome::Redirect(_)) {
                        probes.abort_all();
                        return Ok(outcome);
                    }
                    if outcome.rank() > best.rank() {
                        best = outcome;
                    }
                }
                Ok(Some(Err(e))) => debug!("Autodiscover probe task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!("Autodiscover deadline reached for {}", domain);
                    probes.abort_all();
                    if best.rank() == 0 {
                        return Err(AutodiscoveryError::Timeout(self.deadline));
                    }
                    break;
                }
            }
        }

        Ok(best)
    }
}

#[async_trait]
impl Rediscover for Autodiscover {
    async fn rediscover(
        &self,
        email: &str,
        credentials: &Credentials,
    ) -> Result<String, AutodiscoveryError> {
        self.discover(email, credentials).await
    }
}

fn domain_of(email: &str) -> Result<String, AutodiscoveryError> {
    match email.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(domain.to_lowercase())
        }
        _ => Err(AutodiscoveryError::InvalidEmail(email.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHttp;
    use crate::transport::{HttpResponse, Method};

    const FOUND: &str = r#"<Autodiscover><Response><Action><Settings><Server><Type>MobileSync</Type><Url>https://eas.example.com/Microsoft-Server-ActiveSync</Url></Server></Settings></Action></Response></Autodiscover>"#;

    fn config() -> EngineConfig {
        EngineConfig::default().with_autodiscover_deadline(Duration::from_secs(5))
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("jdoe@Example.COM").unwrap(), "example.com");
        assert!(domain_of("jdoe").is_err());
        assert!(domain_of("@example.com").is_err());
    }

    #[tokio::test]
    async fn test_first_successful_probe_wins() {
        let http = Arc::new(ScriptedHttp::new());
        http.on(Method::Head, "https://example.com/autodiscover/", HttpResponse::new(200));
        http.on(
            Method::Post,
            "https://example.com/autodiscover/",
            HttpResponse::new(200).with_body(FOUND.as_bytes().to_vec()),
        );
        // everything else is unreachable

        let discovery = Autodiscover::new(http.clone(), &config());
        let url = discovery
            .discover("jdoe@example.com", &Credentials::new("jdoe", "pw"))
            .await
            .unwrap();
        assert_eq!(url, "https://eas.example.com/Microsoft-Server-ActiveSync");

        let post = http
            .requests()
            .into_iter()
            .find(|r| r.method == Method::Post)
            .unwrap();
        assert!(String::from_utf8_lossy(&post.body).contains("jdoe@example.com"));
        assert!(post.header_value("Authorization").unwrap().starts_with("Basic "));
    }

    #[tokio::test]
    async fn test_head_redirect_is_followed() {
        let http = Arc::new(ScriptedHttp::new());
        http.on(
            Method::Head,
            "https://autodiscover.example.com/autodiscover/",
            HttpResponse::new(302).with_header("Location", "https://mail.example.net/ad.xml"),
        );
        http.on(Method::Head, "https://mail.example.net/ad.xml", HttpResponse::new(200));
        http.on(
            Method::Post,
            "https://mail.example.net/ad.xml",
            HttpResponse::new(200).with_body(FOUND.as_bytes().to_vec()),
        );

        let discovery = Autodiscover::new(http, &config());
        let url = discovery
            .discover("jdoe@example.com", &Credentials::new("jdoe", "pw"))
            .await
            .unwrap();
        assert!(url.starts_with("https://eas.example.com"));
    }

    #[tokio::test]
    async fn test_unauthorized_beats_not_found() {
        let http = Arc::new(ScriptedHttp::new());
        http.on(Method::Head, "https://autodiscover.example.com/", HttpResponse::new(200));
        http.on(Method::Post, "https://autodiscover.example.com/", HttpResponse::new(401));

        let discovery = Autodiscover::new(http, &config());
        let err = discovery
            .discover("jdoe@example.com", &Credentials::new("jdoe", "bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutodiscoveryError::Unauthorized(401)));
    }

    #[tokio::test]
    async fn test_redirect_action_restarts_once() {
        let redirect = r#"<Autodiscover><Response><Action><Redirect>jdoe@example.org</Redirect></Action></Response></Autodiscover>"#;
        let http = Arc::new(ScriptedHttp::new());
        http.on(Method::Head, "https://example.com/autodiscover/", HttpResponse::new(200));
        http.on(
            Method::Post,
            "https://example.com/autodiscover/",
            HttpResponse::new(200).with_body(redirect.as_bytes().to_vec()),
        );
        http.on(Method::Head, "https://example.org/autodiscover/", HttpResponse::new(200));
        http.on(
            Method::Post,
            "https://example.org/autodiscover/",
            HttpResponse::new(200).with_body(FOUND.as_bytes().to_vec()),
        );

        let discovery = Autodiscover::new(http, &config());
        let url = discovery
            .discover("jdoe@example.com", &Credentials::new("jdoe", "pw"))
            .await
            .unwrap();
        assert!(url.starts_with("https://eas.example.com"));
    }

    #[tokio::test]
    async fn test_nothing_reachable_is_not_found() {
        let discovery = Autodiscover::new(Arc::new(ScriptedHttp::new()), &config());
        let err = discovery
            .discover("jdoe@example.com", &Credentials::new("jdoe", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutodiscoveryError::NotFound(_)));
    }
}
