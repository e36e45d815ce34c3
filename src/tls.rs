//! TLS client contexts.
//!
//! A [`TlsContext`] is built once from key and trust configuration and then
//! shared by any number of connections. Its protocol versions are fixed when
//! it is built.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::result::{ErrorKind, LdapConnectionError, Result, ResultCode};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ProtocolVersion, SupportedProtocolVersion};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

mod keys;
pub use self::keys::{KeySource, KeyToken};

mod trust;
pub use self::trust::{CertificateInfo, StdinPrompt, TrustDecision, TrustPrompt, TrustSource};

/// Reusable TLS client configuration.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
    trust: TrustSource,
    versions: Vec<ProtocolVersion>,
}

impl TlsContext {
    pub fn builder() -> TlsContextBuilder {
        TlsContextBuilder::new()
    }

    /// The underlying rustls configuration.
    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    pub fn trust_source(&self) -> &TrustSource {
        &self.trust
    }

    /// Protocol versions every handshake made with this context may use.
    pub fn protocol_versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    /// Perform the client handshake over `stream`. Dropping the returned
    /// stream also closes the TCP connection.
    pub(crate) async fn connect(&self, host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        let name = ServerName::try_from(host.to_owned()).map_err(|e| {
            LdapConnectionError::new(
                ErrorKind::TlsHandshake,
                ResultCode::CONNECT_ERROR,
                format!("\"{}\" is not a valid TLS server name", host),
            )
            .with_source(e)
        })?;
        TlsConnector::from(self.config.clone())
            .connect(name, stream)
            .await
            .map_err(|e| {
                LdapConnectionError::new(
                    ErrorKind::TlsHandshake,
                    ResultCode::CONNECT_ERROR,
                    format!("TLS handshake with {} failed: {}", host, e),
                )
                .with_source(e)
            })
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("trust", &self.trust)
            .field("versions", &self.versions)
            .field("client_auth", &self.config.client_auth_cert_resolver.has_certs())
            .finish()
    }
}

/// Builder for [`TlsContext`].
///
/// Trust is decided by the first of these which applies: trust-all, an
/// explicit truststore, interactive prompting (outside FIPS mode), and finally
/// the platform roots. A truststore outside FIPS mode additionally rejects
/// certificates which are not valid at the time of the handshake.
#[derive(Clone, Default)]
pub struct TlsContextBuilder {
    key: KeySource,
    alias: Option<String>,
    trust_all: bool,
    truststore: Option<(PathBuf, Option<String>)>,
    fips: bool,
    prompt: Option<Arc<dyn TrustPrompt>>,
}

impl TlsContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_source(mut self, key: KeySource) -> Self {
        self.key = key;
        self
    }

    /// Client certificate chain and key from PEM files.
    pub fn pem_key(self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.key_source(KeySource::Pem {
            cert: cert.into(),
            key: key.into(),
        })
    }

    /// Client keys from a PKCS#12 keystore.
    pub fn pkcs12_key(self, path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        self.key_source(KeySource::Pkcs12 {
            path: path.into(),
            password: password.into(),
        })
    }

    pub fn key_token(self, token: Arc<dyn KeyToken>) -> Self {
        self.key_source(KeySource::Token(token))
    }

    /// Offer only the client certificate with this alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Accept any server certificate.
    pub fn trust_all(mut self, trust_all: bool) -> Self {
        self.trust_all = trust_all;
        self
    }

    /// Trust the certificates in a PEM file or PKCS#12 store.
    pub fn truststore(mut self, path: impl Into<PathBuf>, password: Option<String>) -> Self {
        self.truststore = Some((path.into(), password));
        self
    }

    pub fn fips(mut self, fips: bool) -> Self {
        self.fips = fips;
        self
    }

    /// Prompt used for interactive trust. Defaults to [`StdinPrompt`].
    pub fn prompt(mut self, prompt: Arc<dyn TrustPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// The trust source the built context will use.
    pub fn trust_source(&self) -> TrustSource {
        if self.trust_all {
            TrustSource::TrustAll
        } else if let Some((ref path, ref password)) = self.truststore {
            TrustSource::Truststore {
                path: path.clone(),
                password: password.clone(),
            }
        } else if !self.fips {
            TrustSource::Interactive
        } else {
            TrustSource::PlatformDefault
        }
    }

    pub fn build(self) -> Result<TlsContext> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let (builder, versions) = match ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(rustls::ALL_VERSIONS)
        {
            Ok(builder) => (builder, rustls::ALL_VERSIONS),
            Err(e) => {
                warn!("TLS protocol versions unavailable ({}), using TLS 1.2 only", e);
                const FALLBACK: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
                let builder = ClientConfig::builder_with_provider(provider.clone())
                    .with_protocol_versions(FALLBACK)
                    .map_err(|e| {
                        LdapConnectionError::tls_config("no usable TLS protocol version").with_source(e)
                    })?;
                (builder, FALLBACK)
            }
        };
        let trust = self.trust_source();
        let verifier = trust::verifier(&trust, self.fips, self.prompt, &provider)?;
        let builder = builder.dangerous().with_custom_certificate_verifier(verifier);
        let config = match keys::resolver(&self.key, self.alias, &provider)? {
            Some(resolver) => builder.with_client_cert_resolver(resolver),
            None => builder.with_no_client_auth(),
        };
        debug!("built TLS context, trust source {:?}", trust);
        Ok(TlsContext {
            config: Arc::new(config),
            trust,
            versions: versions.iter().map(|v| v.version).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_source_priority() {
        let store = || TlsContextBuilder::new().truststore("/etc/ldap/trust.pem", None);
        assert_eq!(store().trust_all(true).trust_source(), TrustSource::TrustAll);
        assert_eq!(
            store().fips(true).trust_source(),
            TrustSource::Truststore {
                path: "/etc/ldap/trust.pem".into(),
                password: None
            }
        );
        assert_eq!(TlsContextBuilder::new().trust_source(), TrustSource::Interactive);
        assert_eq!(
            TlsContextBuilder::new().fips(true).trust_source(),
            TrustSource::PlatformDefault
        );
    }

    #[test]
    fn trust_all_context_has_all_versions() {
        let ctx = TlsContext::builder().trust_all(true).build().unwrap();
        assert_eq!(ctx.trust_source(), &TrustSource::TrustAll);
        assert!(ctx.protocol_versions().contains(&ProtocolVersion::TLSv1_2));
        assert!(ctx.protocol_versions().contains(&ProtocolVersion::TLSv1_3));
    }

    #[test]
    fn unreadable_truststore_fails_the_build() {
        let err = TlsContext::builder()
            .truststore("/nonexistent/trust.pem", None)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TlsConfig);
    }
}
