//! Client key material.

use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::result::{LdapConnectionError, Result};

use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;

/// A device holding client keys which never leave it, such as a PKCS#11 token.
///
/// The token hands out certified keys whose signing operations it performs
/// itself, through its own [`rustls::sign::SigningKey`] implementation.
pub trait KeyToken: Send + Sync + fmt::Debug {
    /// Every key on the token, with its alias.
    fn keys(&self) -> Result<Vec<(String, Arc<CertifiedKey>)>>;
}

/// Source of the client certificate, if any.
#[derive(Clone, Debug, Default)]
pub enum KeySource {
    #[default]
    None,
    /// PEM certificate chain and private key. The alias of the key is the
    /// file stem of the certificate file.
    Pem { cert: PathBuf, key: PathBuf },
    /// PKCS#12 keystore. Aliases are the friendly names of its entries.
    Pkcs12 { path: PathBuf, password: String },
    Token(Arc<dyn KeyToken>),
}

fn read_error(what: &str, path: &Path, e: std::io::Error) -> LdapConnectionError {
    LdapConnectionError::tls_config(format!("cannot read {} {}", what, path.display())).with_source(e)
}

fn certified(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    provider: &CryptoProvider,
) -> Result<Arc<CertifiedKey>> {
    let signing = provider.key_provider.load_private_key(key).map_err(|e| {
        LdapConnectionError::tls_config("unusable client private key").with_source(e)
    })?;
    Ok(Arc::new(CertifiedKey::new(chain, signing)))
}

fn load_pem(cert: &Path, key: &Path, provider: &CryptoProvider) -> Result<(String, Arc<CertifiedKey>)> {
    let mut reader = BufReader::new(File::open(cert).map_err(|e| read_error("certificate", cert, e))?);
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| read_error("certificate", cert, e))?;
    if chain.is_empty() {
        return Err(LdapConnectionError::tls_config(format!(
            "no certificates in {}",
            cert.display()
        )));
    }
    let mut reader = BufReader::new(File::open(key).map_err(|e| read_error("private key", key, e))?);
    let private = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| read_error("private key", key, e))?
        .ok_or_else(|| LdapConnectionError::tls_config(format!("no private key in {}", key.display())))?;
    let alias = cert
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((alias, certified(chain, private, provider)?))
}

fn load_pkcs12(path: &Path, password: &str, provider: &CryptoProvider) -> Result<Vec<(String, Arc<CertifiedKey>)>> {
    let data = fs::read(path).map_err(|e| read_error("keystore", path, e))?;
    let store = KeyStore::from_pkcs12(&data, password).map_err(|e| {
        LdapConnectionError::tls_config(format!("cannot open PKCS#12 keystore {}: {:?}", path.display(), e))
    })?;
    let mut keys = Vec::new();
    for (alias, entry) in store.entries() {
        if let KeyStoreEntry::PrivateKeyChain(chain) = entry {
            let certs = chain
                .chain()
                .iter()
                .map(|cert| CertificateDer::from(cert.as_der().to_vec()))
                .collect();
            let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(chain.key().to_vec()));
            keys.push((alias.to_string(), certified(certs, key, provider)?));
        }
    }
    if keys.is_empty() {
        return Err(LdapConnectionError::tls_config(format!(
            "keystore {} holds no private keys",
            path.display()
        )));
    }
    Ok(keys)
}

/// Offers client certificates during the handshake, restricted to one
/// alias if one was configured.
#[derive(Debug)]
pub(crate) struct AliasResolver {
    keys: Vec<(String, Arc<CertifiedKey>)>,
    alias: Option<String>,
}

impl AliasResolver {
    fn candidates(&self) -> impl Iterator<Item = &Arc<CertifiedKey>> {
        self.keys
            .iter()
            .filter(|(alias, _)| self.alias.as_deref().map_or(true, |wanted| wanted == alias))
            .map(|(_, key)| key)
    }
}

impl ResolvesClientCert for AliasResolver {
    fn resolve(&self, _root_hint_subjects: &[&[u8]], sigschemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        let chosen = self
            .candidates()
            .find(|key| key.key.choose_scheme(sigschemes).is_some())
            .cloned();
        if chosen.is_none() {
            debug!(
                "no client certificate to offer (alias {:?}, {} keys loaded)",
                self.alias,
                self.keys.len()
            );
        }
        chosen
    }

    fn has_certs(&self) -> bool {
        self.candidates().next().is_some()
    }
}

/// Load the keys of `source`. A nonexistent alias isn't an error here;
/// the resolver just has nothing to offer, and the handshake fails if the
/// server insists on a certificate.
pub(crate) fn resolver(
    source: &KeySource,
    alias: Option<String>,
    provider: &CryptoProvider,
) -> Result<Option<Arc<AliasResolver>>> {
    let keys = match source {
        KeySource::None => return Ok(None),
        KeySource::Pem { cert, key } => vec![load_pem(cert, key, provider)?],
        KeySource::Pkcs12 { path, password } => load_pkcs12(path, password, provider)?,
        KeySource::Token(token) => token.keys()?,
    };
    Ok(Some(Arc::new(AliasResolver { keys, alias })))
}
