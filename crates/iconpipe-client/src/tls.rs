//! TLS client configuration for `https` lookup endpoints.

use std::sync::Arc;

use crate::error::{ClientError, ClientResult};

/// Build a rustls client config trusting the Mozilla root set.
pub fn webpki_client_config() -> ClientResult<Arc<rustls::ClientConfig>> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| ClientError::TlsConfig(format!("protocol versions: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Arc::new(config))
}
