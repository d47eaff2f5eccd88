//! HTTP client factory and transport cache.
//!
//! Grounded on `upstream/cluster.rs::build_cluster_http_client` in the
//! teacher gateway: a `hyper_util` legacy client wrapped in an HTTPS
//! connector, built once per distinct configuration and reused across
//! reloads. The teacher keys reuse implicitly (one client per `Cluster`,
//! rebuilt only when `update_config` notices pool/TLS/timeout fields
//! changed); this module makes that keying explicit and structural so it
//! can be shared across clusters that happen to request identical options.

use crate::model::HttpClientOptions;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;
pub type HyperClient = Client<HttpsConnector<HttpConnector>, ProxyBody>;

/// Grace period observed before a retired transport's last strong
/// reference is dropped. The source specification leaves the exact value
/// implementation-defined but requires it to be nonzero (open question c).
pub const TRANSPORT_DISPOSAL_GRACE: Duration = Duration::from_secs(30);

/// Structural fingerprint of `(cluster_id, HttpClientOptions)`. Cluster id
/// is folded in deliberately: two clusters with byte-identical transport
/// options but different client certificates would otherwise alias onto
/// the same cached transport, which is wrong whenever `client_certificate`
/// selection is in fact per-cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportFingerprint(u64);

impl TransportFingerprint {
    pub fn compute(cluster_id: &str, options: &HttpClientOptions) -> Self {
        let mut hasher = DefaultHasher::new();
        cluster_id.hash(&mut hasher);
        options.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// A reference-counted transport handle plus the fingerprint it was built
/// from, so callers can cheaply decide whether a reload needs a rebuild.
#[derive(Clone)]
pub struct TransportHandle {
    pub fingerprint: TransportFingerprint,
    pub client: Arc<HyperClient>,
}

impl TransportHandle {
    fn build(options: &HttpClientOptions, fingerprint: TransportFingerprint) -> Self {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);

        let connector = if options.dangerous_accept_any_server_certificate {
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(dangerous_client_config())
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .wrap_connector(http)
        } else {
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_webpki_roots()
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .wrap_connector(http)
        };

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_idle_timeout(Duration::from_secs(90));
        if let Some(max_conns) = options.max_connections_per_server {
            builder.pool_max_idle_per_host(max_conns as usize);
        }

        Self {
            fingerprint,
            client: Arc::new(builder.build(connector)),
        }
    }
}

fn dangerous_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth()
}

/// Accepts any server certificate. Only ever reached when the config
/// record explicitly opts in via `dangerous_accept_any_server_certificate`.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

type TransportCache = Arc<Mutex<std::collections::HashMap<TransportFingerprint, (Arc<HyperClient>, usize)>>>;

/// Caches transports by fingerprint; disposes of a transport only once its
/// last referencing cluster retires, after the grace period.
pub struct HttpClientFactory {
    cache: TransportCache,
}

impl HttpClientFactory {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(Mutex::new(std::collections::HashMap::new())),
        }
    }

    /// Returns a transport for `(cluster_id, options)`. If `previous` is
    /// provided and its fingerprint already matches, it is returned
    /// unchanged — no rebuild, no cache traffic. Otherwise a transport is
    /// acquired (built fresh or shared from the cache) and the previous
    /// handle, if any, is scheduled for delayed release.
    pub fn acquire(
        &self,
        cluster_id: &str,
        options: &HttpClientOptions,
        previous: Option<TransportHandle>,
    ) -> TransportHandle {
        let fingerprint = TransportFingerprint::compute(cluster_id, options);

        if let Some(prev) = &previous {
            if prev.fingerprint == fingerprint {
                return prev.clone();
            }
        }

        let handle = {
            let mut cache = self.cache.lock().unwrap();
            match cache.get_mut(&fingerprint) {
                Some((client, refcount)) => {
                    *refcount += 1;
                    TransportHandle {
                        fingerprint,
                        client: client.clone(),
                    }
                }
                None => {
                    let handle = TransportHandle::build(options, fingerprint);
                    cache.insert(fingerprint, (handle.client.clone(), 1));
                    handle
                }
            }
        };

        if let Some(prev) = previous {
            self.schedule_release(prev.fingerprint);
        }

        handle
    }

    /// Releases one reference to the transport at `fingerprint` immediately
    /// (used when a cluster is retired outright, with no replacement
    /// transport acquired).
    pub fn release(&self, fingerprint: TransportFingerprint) {
        self.schedule_release(fingerprint);
    }

    fn schedule_release(&self, fingerprint: TransportFingerprint) {
        // Decrement now so the cache's logical refcount is accurate
        // immediately; the Arc itself (and the connections it holds) lives
        // on until the delayed task actually removes the map entry, which is
        // the real "grace period" — in-flight requests on the old snapshot
        // hold their own clone of the Arc independent of the cache.
        let should_evict = {
            let mut cache = self.cache.lock().unwrap();
            if let Some((_, refcount)) = cache.get_mut(&fingerprint) {
                *refcount -= 1;
                *refcount == 0
            } else {
                false
            }
        };

        if should_evict {
            let cache = self.cache.clone();
            if let Some(handle) = tokio::runtime::Handle::try_current().ok() {
                handle.spawn(delayed_evict(cache, fingerprint));
            }
        }

        async fn delayed_evict(cache: TransportCache, fingerprint: TransportFingerprint) {
            tokio::time::sleep(TRANSPORT_DISPOSAL_GRACE).await;
            // Only remove if still at refcount 0: a reload that re-acquired
            // this fingerprint in the meantime bumped it back up, and must
            // not have its live entry evicted out from under it.
            let mut cache = cache.lock().unwrap();
            if let Some((_, 0)) = cache.get(&fingerprint) {
                cache.remove(&fingerprint);
            }
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new()
    }
}
