//! Server certificate verification.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use crate::result::{LdapConnectionError, Result};

use p12_keystore::{KeyStore, KeyStoreEntry};
use ring::digest::{digest, SHA256};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme};
use x509_parser::prelude::{ASN1Time, FromDer, X509Certificate};

/// Where trust decisions come from. Exactly one source is in effect for a context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustSource {
    /// Accept any server certificate.
    TrustAll,
    /// Certificates from a PEM file or a PKCS#12 store.
    Truststore {
        path: PathBuf,
        password: Option<String>,
    },
    /// Ask the user about certificates the platform roots don't vouch for.
    Interactive,
    /// Platform root certificates only.
    PlatformDefault,
}

/// Answer of a [`TrustPrompt`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustDecision {
    Reject,
    /// Accept for this handshake only.
    AcceptOnce,
    /// Accept, and don't ask again for as long as the TLS context lives.
    AcceptForSession,
}

/// Summary of a server certificate shown when asking about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: String,
    pub not_after: String,
    pub expired: bool,
    /// SHA-256 fingerprint, colon-separated hex.
    pub fingerprint: String,
    /// Why automatic verification didn't accept the certificate.
    pub problem: String,
}

/// Interactive trust decision for an unverified server certificate.
pub trait TrustPrompt: Send + Sync {
    fn decide(&self, cert: &CertificateInfo) -> TrustDecision;
}

/// Prompt on the terminal, writing to stderr and reading an answer from stdin.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinPrompt;

impl TrustPrompt for StdinPrompt {
    fn decide(&self, cert: &CertificateInfo) -> TrustDecision {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "The server presented the following certificate:");
        let _ = writeln!(err, "    Subject:      {}", cert.subject);
        let _ = writeln!(err, "    Issuer:       {}", cert.issuer);
        let _ = writeln!(err, "    Valid from:   {}", cert.not_before);
        let _ = writeln!(err, "    Expires on:   {}", cert.not_after);
        let _ = writeln!(err, "    SHA-256:      {}", cert.fingerprint);
        if cert.expired {
            let _ = writeln!(err, "The certificate is not currently valid.");
        }
        let _ = writeln!(err, "It could not be verified: {}", cert.problem);
        let _ = writeln!(err, "Do you trust this certificate?");
        let _ = writeln!(err, "  1) No");
        let _ = writeln!(err, "  2) Yes, for this session");
        let _ = writeln!(err, "  3) Yes, for this connection only");
        let _ = write!(err, "Enter choice [1]: ");
        let _ = err.flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return TrustDecision::Reject;
        }
        match line.trim() {
            "2" => TrustDecision::AcceptForSession,
            "3" => TrustDecision::AcceptOnce,
            _ => TrustDecision::Reject,
        }
    }
}

static PLATFORM_ROOTS: LazyLock<Arc<RootCertStore>> = LazyLock::new(|| {
    let mut store = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        warn!("error loading platform certificates: {}", e);
    }
    let (added, ignored) = store.add_parsable_certificates(loaded.certs);
    debug!("loaded {} platform root certificates, ignored {}", added, ignored);
    Arc::new(store)
});

fn webpki(
    roots: Arc<RootCertStore>,
    provider: &Arc<CryptoProvider>,
) -> std::result::Result<Arc<WebPkiServerVerifier>, rustls::client::VerifierBuilderError> {
    WebPkiServerVerifier::builder_with_provider(roots, provider.clone()).build()
}

/// Build the verifier for `source`.
pub(crate) fn verifier(
    source: &TrustSource,
    fips: bool,
    prompt: Option<Arc<dyn TrustPrompt>>,
    provider: &Arc<CryptoProvider>,
) -> Result<Arc<dyn ServerCertVerifier>> {
    let verifier: Arc<dyn ServerCertVerifier> = match source {
        TrustSource::TrustAll => Arc::new(AcceptAll {
            provider: provider.clone(),
        }),
        TrustSource::Truststore { path, password } => {
            let certs = load_truststore(path, password.as_deref())?;
            let store: Arc<dyn ServerCertVerifier> = Arc::new(TruststoreVerifier::new(certs, provider));
            if fips {
                store
            } else {
                Arc::new(ExpirationCheck { inner: store })
            }
        }
        TrustSource::Interactive => Arc::new(PromptingVerifier {
            inner: webpki(PLATFORM_ROOTS.clone(), provider).ok(),
            prompt: prompt.unwrap_or_else(|| Arc::new(StdinPrompt)),
            accepted: Mutex::new(HashSet::new()),
            provider: provider.clone(),
        }),
        TrustSource::PlatformDefault => webpki(PLATFORM_ROOTS.clone(), provider).map_err(|e| {
            LdapConnectionError::tls_config("no usable platform root certificates").with_source(e)
        })?,
    };
    Ok(verifier)
}

/// Read trusted certificates. PEM files are recognized by their armor,
/// anything else is taken to be PKCS#12.
pub(crate) fn load_truststore(path: &Path, password: Option<&str>) -> Result<Vec<CertificateDer<'static>>> {
    let data = fs::read(path).map_err(|e| {
        LdapConnectionError::tls_config(format!("cannot read truststore {}", path.display())).with_source(e)
    })?;
    let certs: Vec<CertificateDer<'static>> = if data.starts_with(b"-----BEGIN") {
        rustls_pemfile::certs(&mut &data[..])
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                LdapConnectionError::tls_config(format!("cannot parse truststore {}", path.display()))
                    .with_source(e)
            })?
    } else {
        let store = KeyStore::from_pkcs12(&data, password.unwrap_or_default()).map_err(|e| {
            LdapConnectionError::tls_config(format!(
                "cannot open PKCS#12 truststore {}: {:?}",
                path.display(),
                e
            ))
        })?;
        let mut certs = Vec::new();
        for (_, entry) in store.entries() {
            if let KeyStoreEntry::Certificate(cert) = entry {
                certs.push(CertificateDer::from(cert.as_der().to_vec()));
            } else if let KeyStoreEntry::PrivateKeyChain(chain) = entry {
                certs.extend(
                    chain
                        .chain()
                        .iter()
                        .map(|cert| CertificateDer::from(cert.as_der().to_vec())),
                );
            }
        }
        certs
    };
    if certs.is_empty() {
        return Err(LdapConnectionError::tls_config(format!(
            "truststore {} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

fn supported_schemes(provider: &CryptoProvider) -> Vec<SignatureScheme> {
    provider.signature_verification_algorithms.supported_schemes()
}

fn verify12(
    provider: &CryptoProvider,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
) -> std::result::Result<HandshakeSignatureValid, TlsError> {
    verify_tls12_signature(message, cert, dss, &provider.signature_verification_algorithms)
}

fn verify13(
    provider: &CryptoProvider,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
) -> std::result::Result<HandshakeSignatureValid, TlsError> {
    verify_tls13_signature(message, cert, dss, &provider.signature_verification_algorithms)
}

pub(crate) fn fingerprint(cert: &CertificateDer<'_>) -> [u8; 32] {
    let mut fp = [0u8; 32];
    fp.copy_from_slice(digest(&SHA256, cert.as_ref()).as_ref());
    fp
}

fn fingerprint_hex(fp: &[u8; 32]) -> String {
    fp.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn parse_cert<'a>(cert: &'a CertificateDer<'_>) -> std::result::Result<X509Certificate<'a>, TlsError> {
    X509Certificate::from_der(cert.as_ref())
        .map(|(_, parsed)| parsed)
        .map_err(|_| TlsError::InvalidCertificate(CertificateError::BadEncoding))
}

fn asn1_now(now: UnixTime) -> std::result::Result<ASN1Time, TlsError> {
    i64::try_from(now.as_secs())
        .ok()
        .and_then(|secs| ASN1Time::from_timestamp(secs).ok())
        .ok_or(TlsError::FailedToGetCurrentTime)
}

/// Accepts any certificate. Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAll {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAll {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify12(&self.provider, message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify13(&self.provider, message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        supported_schemes(&self.provider)
    }
}

/// Trusts certificates from a truststore: the server certificate itself may be
/// listed, or it must chain to one of the listed certificates.
struct TruststoreVerifier {
    pinned: HashSet<[u8; 32]>,
    chained: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
}

impl TruststoreVerifier {
    fn new(certs: Vec<CertificateDer<'static>>, provider: &Arc<CryptoProvider>) -> Self {
        let pinned = certs.iter().map(fingerprint).collect();
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            debug!("{} truststore certificates can't act as trust anchors", ignored);
        }
        let chained = if added > 0 {
            webpki(Arc::new(roots), provider).ok()
        } else {
            None
        };
        TruststoreVerifier {
            pinned,
            chained,
            provider: provider.clone(),
        }
    }
}

impl fmt::Debug for TruststoreVerifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TruststoreVerifier")
            .field("pinned", &self.pinned.len())
            .field("chained", &self.chained.is_some())
            .finish()
    }
}

impl ServerCertVerifier for TruststoreVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        if self.pinned.contains(&fingerprint(end_entity)) {
            return Ok(ServerCertVerified::assertion());
        }
        match self.chained {
            Some(ref chained) => chained.verify_server_cert(end_entity, intermediates, server_name, ocsp, now),
            None => Err(TlsError::InvalidCertificate(CertificateError::UnknownIssuer)),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify12(&self.provider, message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify13(&self.provider, message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        supported_schemes(&self.provider)
    }
}

/// Rejects an expired or not yet valid server certificate before
/// consulting the wrapped verifier.
#[derive(Debug)]
struct ExpirationCheck {
    inner: Arc<dyn ServerCertVerifier>,
}

impl ServerCertVerifier for ExpirationCheck {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        let time = asn1_now(now)?;
        let validity = parse_cert(end_entity)?.validity().clone();
        if time < validity.not_before {
            return Err(TlsError::InvalidCertificate(CertificateError::NotValidYet));
        }
        if time > validity.not_after {
            return Err(TlsError::InvalidCertificate(CertificateError::Expired));
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Defers to the platform roots, and asks the user about anything they reject.
struct PromptingVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    prompt: Arc<dyn TrustPrompt>,
    accepted: Mutex<HashSet<[u8; 32]>>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for PromptingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PromptingVerifier")
            .field("platform_roots", &self.inner.is_some())
            .finish()
    }
}

impl PromptingVerifier {
    fn describe(
        &self,
        cert: &CertificateDer<'_>,
        fp: &[u8; 32],
        now: UnixTime,
        problem: String,
    ) -> std::result::Result<CertificateInfo, TlsError> {
        let parsed = parse_cert(cert)?;
        let validity = parsed.validity();
        let expired = match asn1_now(now) {
            Ok(time) => time < validity.not_before || time > validity.not_after,
            Err(_) => false,
        };
        Ok(CertificateInfo {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            not_before: validity.not_before.to_string(),
            not_after: validity.not_after.to_string(),
            expired,
            fingerprint: fingerprint_hex(fp),
            problem,
        })
    }
}

impl ServerCertVerifier for PromptingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        let problem = match self.inner {
            Some(ref inner) => match inner.verify_server_cert(end_entity, intermediates, server_name, ocsp, now) {
                Ok(verified) => return Ok(verified),
                Err(e) => e.to_string(),
            },
            None => "no platform root certificates".to_owned(),
        };
        let fp = fingerprint(end_entity);
        if self.accepted.lock().map(|set| set.contains(&fp)).unwrap_or(false) {
            return Ok(ServerCertVerified::assertion());
        }
        let info = self.describe(end_entity, &fp, now, problem)?;
        match self.prompt.decide(&info) {
            TrustDecision::Reject => Err(TlsError::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            )),
            TrustDecision::AcceptOnce => Ok(ServerCertVerified::assertion()),
            TrustDecision::AcceptForSession => {
                if let Ok(mut set) = self.accepted.lock() {
                    set.insert(fp);
                }
                Ok(ServerCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify12(&self.provider, message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify13(&self.provider, message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        supported_schemes(&self.provider)
    }
}
