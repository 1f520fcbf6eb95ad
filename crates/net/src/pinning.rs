//! Certificate pinning for the TLS handshake
//!
//! Pins are SHA-256 digests of the server's DER-encoded
//! SubjectPublicKeyInfo, handled in the conventional `base64(sha256(spki))`
//! form. Chain trust is evaluated first against the bundled web PKI roots
//! and fails closed; the pin check then gates which otherwise-valid
//! identities are accepted. Turning pinning off is an explicit
//! configuration value, never an empty-set fallback.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use caravel_domain::NetworkError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, Error as TlsError, SignatureScheme};
use sha2::{Digest, Sha256};
use tracing::warn;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

/// SHA-256 digest of a DER-encoded SubjectPublicKeyInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpkiPin([u8; 32]);

impl SpkiPin {
    pub fn from_base64(text: &str) -> Result<Self, NetworkError> {
        let bytes = STANDARD
            .decode(text.trim().as_bytes())
            .map_err(|e| NetworkError::Config(format!("pin is not valid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_hex(text: &str) -> Result<Self, NetworkError> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| NetworkError::Config(format!("pin is not valid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| NetworkError::Config(format!("pin must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(digest))
    }

    /// Pin of the given DER-encoded SubjectPublicKeyInfo.
    pub fn of_spki(spki_der: &[u8]) -> Self {
        Self(Sha256::digest(spki_der).into())
    }
}

impl fmt::Display for SpkiPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(self.0))
    }
}

/// Non-empty set of accepted public-key pins
#[derive(Debug, Clone)]
pub struct PinSet {
    pins: HashSet<SpkiPin>,
}

impl PinSet {
    /// Builds a pin set from pre-parsed pins. Empty input is a
    /// configuration error; disabling requires [`TlsPinning::Disabled`].
    pub fn from_pins(pins: impl IntoIterator<Item = SpkiPin>) -> Result<Self, NetworkError> {
        let pins: HashSet<SpkiPin> = pins.into_iter().collect();
        if pins.is_empty() {
            return Err(NetworkError::Config(
                "an enforced pin set cannot be empty; use TlsPinning::Disabled to opt out"
                    .to_string(),
            ));
        }
        Ok(Self { pins })
    }

    pub fn from_base64_pins<I, T>(pins: I) -> Result<Self, NetworkError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let parsed = pins
            .into_iter()
            .map(|p| SpkiPin::from_base64(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_pins(parsed)
    }

    pub fn from_hex_pins<I, T>(pins: I) -> Result<Self, NetworkError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let parsed = pins
            .into_iter()
            .map(|p| SpkiPin::from_hex(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_pins(parsed)
    }

    pub fn contains(&self, pin: &SpkiPin) -> bool {
        self.pins.contains(pin)
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

/// Pinning posture, resolved once at construction
#[derive(Debug, Clone)]
pub enum TlsPinning {
    /// No pin check. Server identity is still validated against web PKI
    /// roots. Construction of an unpinned transport logs a warning so this
    /// cannot ship unnoticed.
    Disabled,
    /// Chain trust plus membership of the leaf SPKI digest in the set
    Enforced(PinSet),
}

impl TlsPinning {
    pub fn is_enforced(&self) -> bool {
        matches!(self, Self::Enforced(_))
    }
}

/// Pin-evaluation core, independent of the TLS stack.
///
/// Chain building and signature checks stay with the web PKI verifier;
/// this type answers only whether the presented leaf key is pinned.
#[derive(Debug, Clone)]
pub struct CertificateValidator {
    pinning: TlsPinning,
}

impl CertificateValidator {
    pub fn new(pinning: TlsPinning) -> Self {
        Self { pinning }
    }

    /// Evaluates the presented chain. [`TlsPinning::Disabled`] accepts any
    /// chain; enforced mode hashes the leaf SubjectPublicKeyInfo and
    /// answers membership. An absent or unparseable leaf is rejected.
    pub fn validate(&self, chain_der: &[CertificateDer<'_>]) -> bool {
        match &self.pinning {
            TlsPinning::Disabled => true,
            TlsPinning::Enforced(pins) => {
                let Some(leaf) = chain_der.first() else {
                    return false;
                };
                match Self::leaf_spki_pin(leaf.as_ref()) {
                    Ok(pin) => pins.contains(&pin),
                    Err(_) => false,
                }
            }
        }
    }

    /// SHA-256 pin of a certificate's SubjectPublicKeyInfo.
    pub fn leaf_spki_pin(cert_der: &[u8]) -> Result<SpkiPin, NetworkError> {
        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| NetworkError::Security(format!("certificate parse failure: {e}")))?;
        Ok(SpkiPin::of_spki(cert.public_key().raw))
    }
}

/// rustls verifier running web PKI validation first, then the pin check
#[derive(Debug)]
pub struct PinnedServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    validator: CertificateValidator,
}

impl PinnedServerVerifier {
    pub fn new(pinning: TlsPinning) -> Result<Self, NetworkError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| NetworkError::Config(format!("web pki verifier: {e}")))?;
        Ok(Self { inner, validator: CertificateValidator::new(pinning) })
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        // Chain trust first; any evaluation error fails closed.
        let verified = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        if self.validator.validate(&chain) {
            Ok(verified)
        } else {
            warn!(server = ?server_name, "server certificate rejected: public key not pinned");
            Err(TlsError::InvalidCertificate(CertificateError::ApplicationVerificationFailure))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// rustls client configuration enforcing the given pinning posture
pub(crate) fn pinned_client_config(pinning: TlsPinning) -> Result<rustls::ClientConfig, NetworkError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(PinnedServerVerifier::new(pinning)?);

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| NetworkError::Config(format!("tls protocol versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}
