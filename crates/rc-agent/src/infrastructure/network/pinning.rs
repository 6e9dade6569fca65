//! TLS certificate pinning for the streaming connection.
//!
//! # What is pinning? (for beginners)
//!
//! Normal TLS validation accepts any certificate signed by one of the ~150
//! public certificate authorities.  Pinning adds a second check: the
//! server's certificate chain must also contain a *specific* public key that
//! the agent was configured with.  A mis-issued certificate from some other
//! CA is then rejected even though it is technically valid.
//!
//! # Pin format
//!
//! A pin is the base64 SHA-256 digest of a certificate's DER-encoded
//! SubjectPublicKeyInfo, optionally prefixed with `sha256/`:
//!
//! ```text
//! sha256/47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=
//! ```
//!
//! Pinning the key (not the whole certificate) keeps pins valid across
//! certificate renewals that reuse the key.
//!
//! Hosts without pins get plain WebPKI validation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

const PIN_PREFIX: &str = "sha256/";

/// Errors building the TLS client configuration.
#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("pin for host {host} is not valid base64 SHA-256: {pin}")]
    InvalidPin { host: String, pin: String },

    #[error("failed to build certificate verifier: {0}")]
    Verifier(String),

    #[error("failed to build TLS client config: {0}")]
    Config(#[from] rustls::Error),
}

/// Host → accepted SPKI digests.
#[derive(Debug, Clone, Default)]
pub struct CertificatePins {
    pins: HashMap<String, Vec<[u8; 32]>>,
}

impl CertificatePins {
    /// Parses a host → pin-list table.
    ///
    /// Hostnames are lower-cased.  An empty table, or an empty pin list for a
    /// host, means "no pinning".
    ///
    /// # Errors
    ///
    /// Returns [`TlsSetupError::InvalidPin`] for a pin that does not decode to
    /// exactly 32 bytes.
    pub fn from_table(table: &HashMap<String, Vec<String>>) -> Result<Self, TlsSetupError> {
        let mut pins = HashMap::new();
        for (host, list) in table {
            let host = host.to_ascii_lowercase();
            let mut digests = Vec::with_capacity(list.len());
            for pin in list {
                digests.push(decode_pin(pin).ok_or_else(|| TlsSetupError::InvalidPin {
                    host: host.clone(),
                    pin: pin.clone(),
                })?);
            }
            if !digests.is_empty() {
                pins.entry(host).or_insert_with(Vec::new).extend(digests);
            }
        }
        Ok(Self { pins })
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Pins for `host`, if any.
    pub fn for_host(&self, host: &str) -> Option<&[[u8; 32]]> {
        self.pins
            .get(&host.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    /// `true` if any certificate in `chain` carries a pinned key for `host`,
    /// or if `host` has no pins.
    pub fn chain_matches(&self, host: &str, chain: &[&CertificateDer<'_>]) -> bool {
        let Some(expected) = self.for_host(host) else {
            return true;
        };
        chain
            .iter()
            .filter_map(|cert| spki_sha256(cert.as_ref()))
            .any(|digest| expected.contains(&digest))
    }
}

fn decode_pin(pin: &str) -> Option<[u8; 32]> {
    let b64 = pin.trim().strip_prefix(PIN_PREFIX).unwrap_or(pin.trim());
    STANDARD.decode(b64).ok()?.try_into().ok()
}

/// SHA-256 of the certificate's DER SubjectPublicKeyInfo, or `None` if the
/// certificate cannot be parsed.
pub fn spki_sha256(cert_der: &[u8]) -> Option<[u8; 32]> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der).ok()?;
    Some(Sha256::digest(cert.tbs_certificate.subject_pki.raw).into())
}

/// Formats a digest in the `sha256/<base64>` pin notation.
pub fn format_pin(digest: &[u8; 32]) -> String {
    format!("{PIN_PREFIX}{}", STANDARD.encode(digest))
}

/// WebPKI verification followed by a pin check.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pins: CertificatePins,
}

impl PinnedCertVerifier {
    pub fn new(inner: Arc<WebPkiServerVerifier>, pins: CertificatePins) -> Self {
        Self { inner, pins }
    }
}

fn host_of(server_name: &ServerName<'_>) -> String {
    match server_name {
        ServerName::DnsName(name) => name.as_ref().to_ascii_lowercase(),
        ServerName::IpAddress(ip) => IpAddr::from(*ip).to_string(),
        _ => String::new(),
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verified = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;

        let host = host_of(server_name);
        let chain: Vec<&CertificateDer<'_>> =
            std::iter::once(end_entity).chain(intermediates).collect();
        if self.pins.chain_matches(&host, &chain) {
            debug!(%host, "certificate chain accepted");
            Ok(verified)
        } else {
            warn!(%host, "certificate pin mismatch");
            Err(rustls::Error::General(format!(
                "certificate pin mismatch for {host}"
            )))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Builds the rustls client config used for `wss` connections.
///
/// # Errors
///
/// Returns [`TlsSetupError`] if the verifier or protocol setup fails.
pub fn build_tls_config(pins: CertificatePins) -> Result<Arc<ClientConfig>, TlsSetupError> {
    let provider: Arc<CryptoProvider> = Arc::new(ring::default_provider());

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| TlsSetupError::Verifier(e.to_string()))?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier::new(webpki, pins)))
        .with_no_client_auth();

    Ok(Arc::new(config))
}
