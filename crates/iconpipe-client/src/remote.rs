//! HTTP lookup against the icon service.
//!
//! Each call opens one connection, sends one `GET`, reads the body and
//! closes. The whole exchange is bounded by the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, HOST, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use iconpipe_core::{CancelToken, ClientConfig, ItemId, ResolutionOutcome};

use crate::error::{ClientError, ClientResult};
use crate::source::{BoxFuture, IconSource};
use crate::tls::webpki_client_config;

/// Where lookups are sent, split out of the configured base URL.
#[derive(Debug, Clone)]
struct Endpoint {
    host: String,
    port: u16,
    /// `host[:port]` as sent in the `Host` header.
    authority: String,
    /// Path prefix of the base URL, without trailing slash.
    prefix: String,
    https: bool,
}

impl Endpoint {
    fn parse(base_url: &str) -> ClientResult<Self> {
        let invalid = |reason: &str| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: reason.to_string(),
        };
        let uri: Uri = base_url
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;

        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
            None => return Err(invalid("missing scheme")),
        };
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let host = authority.host().to_string();
        let port = authority.port_u16().unwrap_or(if https { 443 } else { 80 });

        Ok(Self {
            host,
            port,
            authority: authority.to_string(),
            prefix: uri.path().trim_end_matches('/').to_string(),
            https,
        })
    }

    fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Response descriptor returned by the lookup service.
#[derive(Debug, Deserialize)]
struct IconDescriptor {
    #[serde(alias = "Icon")]
    icon: Option<String>,
}

/// `IconSource` backed by the remote icon service.
pub struct HttpIconClient {
    endpoint: Endpoint,
    lookup_path: String,
    icon_base: String,
    timeout: Duration,
    user_agent: String,
    tls: Option<TlsConnector>,
}

impl HttpIconClient {
    /// Build a client from config. `https` endpoints trust the webpki roots.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        Self::build(config, None)
    }

    /// Build a client with a caller-supplied TLS configuration.
    pub fn with_tls_config(
        config: &ClientConfig,
        tls_config: Arc<rustls::ClientConfig>,
    ) -> ClientResult<Self> {
        Self::build(config, Some(tls_config))
    }

    fn build(
        config: &ClientConfig,
        tls_config: Option<Arc<rustls::ClientConfig>>,
    ) -> ClientResult<Self> {
        let endpoint = Endpoint::parse(&config.base_url)?;
        let timeout = config.timeout()?;
        let tls = if endpoint.https {
            let tls_config = match tls_config {
                Some(c) => c,
                None => webpki_client_config()?,
            };
            Some(TlsConnector::from(tls_config))
        } else {
            None
        };

        Ok(Self {
            endpoint,
            lookup_path: config.lookup_path.clone(),
            icon_base: config.icon_base.clone(),
            timeout,
            user_agent: config.user_agent.clone(),
            tls,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request path for `id`, including any base URL prefix.
    pub fn request_path(&self, id: ItemId) -> String {
        let path = self.lookup_path.replace("{id}", &id.to_string());
        format!("{}{}", self.endpoint.prefix, path)
    }

    /// Perform one lookup without timeout or classification.
    pub async fn fetch(&self, id: ItemId) -> ClientResult<(StatusCode, Bytes)> {
        let addr = self.endpoint.socket_addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let req = Request::builder()
            .method(Method::GET)
            .uri(self.request_path(id))
            .header(HOST, &self.endpoint.authority)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .body(Empty::<Bytes>::new())?;

        match &self.tls {
            Some(connector) => {
                let server_name =
                    rustls::pki_types::ServerName::try_from(self.endpoint.host.clone())
                        .map_err(|e| ClientError::ServerName(format!("{}: {e}", self.endpoint.host)))?;
                let stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(ClientError::Tls)?;
                send(TokioIo::new(stream), req).await
            }
            None => send(TokioIo::new(stream), req).await,
        }
    }
}

impl IconSource for HttpIconClient {
    fn resolve(&self, id: ItemId, cancel: CancelToken) -> BoxFuture<'_, ResolutionOutcome> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return ResolutionOutcome::Cancelled;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%id, "lookup cancelled by caller");
                    ResolutionOutcome::Cancelled
                }
                result = tokio::time::timeout(self.timeout, self.fetch(id)) => match result {
                    Ok(Ok((status, body))) => {
                        let outcome = classify(status, &body, &self.icon_base);
                        debug!(%id, %status, outcome = outcome.label(), "lookup completed");
                        outcome
                    }
                    Ok(Err(e)) => {
                        debug!(%id, error = %e, "lookup failed");
                        ResolutionOutcome::Transient(e.to_string())
                    }
                    Err(_) => {
                        debug!(%id, timeout_ms = self.timeout.as_millis() as u64, "lookup timed out");
                        ResolutionOutcome::Transient(format!("timed out after {:?}", self.timeout))
                    }
                },
            }
        })
    }
}

async fn send<IO>(io: TokioIo<IO>, req: Request<Empty<Bytes>>) -> ClientResult<(StatusCode, Bytes)>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(ClientError::Handshake)?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "lookup connection closed with error");
        }
    });

    let resp = sender.send_request(req).await.map_err(ClientError::Request)?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(ClientError::Body)?
        .to_bytes();
    Ok((status, body))
}

/// Map a lookup response to an outcome.
///
/// 429 is recognised by status code alone; the body is never inspected.
pub fn classify(status: StatusCode, body: &[u8], icon_base: &str) -> ResolutionOutcome {
    if status == StatusCode::NOT_FOUND {
        return ResolutionOutcome::NotFound;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ResolutionOutcome::QuotaExceeded;
    }
    if !status.is_success() {
        return ResolutionOutcome::Transient(format!("unexpected status {status}"));
    }

    match serde_json::from_slice::<IconDescriptor>(body) {
        Ok(IconDescriptor { icon: Some(path) }) if !path.trim().is_empty() => {
            ResolutionOutcome::Found(join_url(icon_base, path.trim()))
        }
        Ok(_) => ResolutionOutcome::NotFound,
        Err(e) => ResolutionOutcome::Transient(format!("malformed response body: {e}")),
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://xivapi.com";

    #[test]
    fn classify_found_prefixes_icon_base() {
        let outcome = classify(StatusCode::OK, br#"{"icon":"/i/020000/020001.png"}"#, BASE);
        assert_eq!(
            outcome,
            ResolutionOutcome::Found("https://xivapi.com/i/020000/020001.png".into())
        );
    }

    #[test]
    fn classify_accepts_capitalised_field() {
        let outcome = classify(StatusCode::OK, br#"{"Icon":"i/000000/000001.png"}"#, BASE);
        assert_eq!(
            outcome,
            ResolutionOutcome::Found("https://xivapi.com/i/000000/000001.png".into())
        );
    }

    #[test]
    fn classify_absolute_icon_path_kept() {
        let outcome = classify(StatusCode::OK, br#"{"icon":"https://cdn.example/x.png"}"#, BASE);
        assert_eq!(outcome, ResolutionOutcome::Found("https://cdn.example/x.png".into()));
    }

    #[test]
    fn classify_null_or_empty_icon_is_not_found() {
        assert_eq!(classify(StatusCode::OK, br#"{"icon":null}"#, BASE), ResolutionOutcome::NotFound);
        assert_eq!(classify(StatusCode::OK, br#"{"icon":"  "}"#, BASE), ResolutionOutcome::NotFound);
        assert_eq!(classify(StatusCode::OK, br#"{}"#, BASE), ResolutionOutcome::NotFound);
    }

    #[test]
    fn classify_malformed_body_is_transient() {
        assert!(matches!(
            classify(StatusCode::OK, b"<html>oops</html>", BASE),
            ResolutionOutcome::Transient(_)
        ));
    }

    #[test]
    fn classify_status_codes() {
        assert_eq!(classify(StatusCode::NOT_FOUND, b"", BASE), ResolutionOutcome::NotFound);
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, b"slow down", BASE),
            ResolutionOutcome::QuotaExceeded
        );
        assert!(matches!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, b"", BASE),
            ResolutionOutcome::Transient(_)
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, b"rate limit exceeded", BASE),
            ResolutionOutcome::Transient(_)
        ));
    }

    #[test]
    fn endpoint_parse_defaults_ports() {
        let https = Endpoint::parse("https://xivapi.com").unwrap();
        assert_eq!(https.port, 443);
        assert!(https.https);
        assert_eq!(https.prefix, "");

        let http = Endpoint::parse("http://127.0.0.1:8080/api/").unwrap();
        assert_eq!(http.port, 8080);
        assert_eq!(http.authority, "127.0.0.1:8080");
        assert_eq!(http.prefix, "/api");
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        assert!(matches!(
            Endpoint::parse("ftp://example.com"),
            Err(ClientError::InvalidUrl { .. })
        ));
        assert!(Endpoint::parse("example.com").is_err());
    }

    #[test]
    fn request_path_substitutes_id() {
        let config = ClientConfig {
            base_url: "http://127.0.0.1:9/v2".to_string(),
            ..ClientConfig::default()
        };
        let client = HttpIconClient::new(&config).unwrap();
        let id = ItemId::new(500).unwrap();
        assert_eq!(client.request_path(id), "/v2/item/500?fields=icon");
    }

    #[test]
    fn https_client_accepts_custom_tls_config() {
        let config = ClientConfig::default();
        let tls = webpki_client_config().unwrap();
        let client = HttpIconClient::with_tls_config(&config, tls).unwrap();
        assert!(client.tls.is_some());
        assert_eq!(client.endpoint.port, 443);
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn closed_port_is_transient() {
        let config = ClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: "1s".to_string(),
            ..ClientConfig::default()
        };
        let client = HttpIconClient::new(&config).unwrap();
        let outcome = client
            .resolve(ItemId::new(1).unwrap(), CancelToken::new())
            .await;
        assert!(matches!(outcome, ResolutionOutcome::Transient(_)));
    }

    #[tokio::test]
    async fn pre_cancelled_call_is_cancelled() {
        let config = ClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..ClientConfig::default()
        };
        let client = HttpIconClient::new(&config).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = client.resolve(ItemId::new(1).unwrap(), cancel).await;
        assert_eq!(outcome, ResolutionOutcome::Cancelled);
    }
}
