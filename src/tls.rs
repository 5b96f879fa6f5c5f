//! TLS policy and certificate selection.
//!
//! One static policy object governs every connection: TLS 1.2 and 1.3 only,
//! with a fixed cipher suite list. Certificate selection runs at handshake
//! time through rustls' `ResolvesServerCert` seam; the provider contract is
//! to return the freshest handle without blocking the caller, so reads never
//! wait on a renewal in progress. Until a first certificate exists the
//! resolver returns `None` and the handshake fails.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use rustls::crypto::aws_lc_rs;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::SupportedCipherSuite;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to read certificate material: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid certificate or key: {0}")]
    Invalid(String),

    #[error("TLS policy rejected: {0}")]
    Policy(#[from] rustls::Error),
}

/// Supplies the certificate valid right now for TLS negotiation.
///
/// Owned by a renewal collaborator; the core only reads it. Implementations
/// must be safe to call from many concurrent handshakes and must never block
/// on a renewal in progress: return the last known-good handle instead.
pub trait CertificateProvider: fmt::Debug + Send + Sync + 'static {
    /// The freshest certificate for the given server name, or `None` while
    /// no certificate exists yet (the handshake then fails).
    fn current_certificate(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>>;

    /// Key authorization for a pending ACME HTTP-01 challenge token, served
    /// over plaintext by the challenge bypass stage.
    fn challenge_response(&self, _token: &str) -> Option<String> {
        None
    }
}

/// Where certificate material comes from when HTTPS is enabled.
#[derive(Debug, Clone)]
pub enum CertificateSource {
    /// Automatic certificates managed by the ACME collaborator
    Acme,
    /// PEM files loaded at startup, hot-swappable via SIGHUP
    Manual(Arc<StaticCertificateProvider>),
    /// An application-supplied provider
    Provider(Arc<dyn CertificateProvider>),
}

impl CertificateSource {
    /// The provider consulted by the pipeline's challenge bypass stage.
    /// ACME mode answers challenges on the TLS listener (tls-alpn-01), so it
    /// exposes nothing here.
    pub(crate) fn provider(&self) -> Option<Arc<dyn CertificateProvider>> {
        match self {
            CertificateSource::Acme => None,
            CertificateSource::Manual(provider) => Some(provider.clone() as _),
            CertificateSource::Provider(provider) => Some(provider.clone()),
        }
    }
}

/// Certificate provider backed by PEM files.
///
/// The handle lives behind an atomic swap, so handshakes read the current
/// certificate without locking while a reload replaces it.
pub struct StaticCertificateProvider {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: ArcSwapOption<CertifiedKey>,
}

impl StaticCertificateProvider {
    pub fn load(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self, TlsError> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let certified = read_certified_key(&cert_path, &key_path)?;
        Ok(Self {
            cert_path,
            key_path,
            current: ArcSwapOption::from_pointee(certified),
        })
    }

    /// Re-read the PEM files and swap the handle. Concurrent handshakes keep
    /// resolving against the previous handle until the swap completes.
    pub fn reload(&self) -> Result<(), TlsError> {
        let certified = read_certified_key(&self.cert_path, &self.key_path)?;
        self.current.store(Some(Arc::new(certified)));
        Ok(())
    }
}

impl fmt::Debug for StaticCertificateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCertificateProvider")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .finish_non_exhaustive()
    }
}

impl CertificateProvider for StaticCertificateProvider {
    fn current_certificate(&self, _server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        self.current.load_full()
    }
}

fn read_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, TlsError> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::Invalid(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
            TlsError::Invalid(format!("no private key found in {}", key_path.display()))
        })?;
    let signing_key = aws_lc_rs::sign::any_supported_type(&key)
        .map_err(|error| TlsError::Invalid(error.to_string()))?;

    Ok(CertifiedKey::new(certs, signing_key))
}

/// Adapter plugging a [`CertificateProvider`] into rustls' handshake-time
/// certificate selection.
#[derive(Debug)]
pub struct ProviderCertResolver(pub Arc<dyn CertificateProvider>);

impl ResolvesServerCert for ProviderCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.0.current_certificate(client_hello.server_name())
    }
}

/// Cipher suites accepted by the fixed TLS policy.
fn policy_cipher_suites() -> Vec<SupportedCipherSuite> {
    vec![
        // TLS 1.3 cipher suites:
        aws_lc_rs::cipher_suite::TLS13_AES_128_GCM_SHA256,
        aws_lc_rs::cipher_suite::TLS13_AES_256_GCM_SHA384,
        aws_lc_rs::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        // TLS 1.2 cipher suites:
        aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    ]
}

/// Protocol versions accepted by the fixed TLS policy.
static TLS_PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS12, &rustls::version::TLS13];

/// The one crypto provider instance carrying the policy's cipher suites.
/// Built once; every connection negotiates against the same policy.
fn policy_provider() -> Arc<CryptoProvider> {
    static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    PROVIDER
        .get_or_init(|| {
            Arc::new(CryptoProvider {
                cipher_suites: policy_cipher_suites(),
                ..aws_lc_rs::default_provider()
            })
        })
        .clone()
}

/// Build the server-side rustls configuration: fixed policy, handshake-time
/// certificate selection through the given resolver, HTTP ALPN.
pub fn server_config(
    resolver: Arc<dyn ResolvesServerCert>,
) -> Result<rustls::ServerConfig, TlsError> {
    let mut config = rustls::ServerConfig::builder_with_provider(policy_provider())
        .with_protocol_versions(TLS_PROTOCOL_VERSIONS)?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_self_signed(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        let key_pair = rcgen::KeyPair::generate().expect("key generation should succeed");
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .expect("params should build")
            .self_signed(&key_pair)
            .expect("self-signing should succeed");

        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        File::create(&cert_path)
            .and_then(|mut f| f.write_all(cert.pem().as_bytes()))
            .expect("cert should be written");
        File::create(&key_path)
            .and_then(|mut f| f.write_all(key_pair.serialize_pem().as_bytes()))
            .expect("key should be written");
        (cert_path, key_path)
    }

    #[test]
    fn static_provider_loads_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let (cert_path, key_path) = write_self_signed(&dir);

        let provider = StaticCertificateProvider::load(&cert_path, &key_path)
            .expect("provider should load");
        let first = provider
            .current_certificate(Some("localhost"))
            .expect("certificate should be available");

        provider.reload().expect("reload should succeed");
        let second = provider
            .current_certificate(Some("localhost"))
            .expect("certificate should still be available");
        // The handle was swapped; readers holding `first` are unaffected.
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_key_material_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let empty = dir.path().join("empty.pem");
        File::create(&empty).expect("file should create");
        let result = StaticCertificateProvider::load(&empty, &empty);
        assert!(matches!(result, Err(TlsError::Invalid(_))));
    }

    #[test]
    fn policy_config_builds_with_fixed_versions_and_alpn() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let (cert_path, key_path) = write_self_signed(&dir);
        let provider = Arc::new(
            StaticCertificateProvider::load(&cert_path, &key_path)
                .expect("provider should load"),
        );
        let config = server_config(Arc::new(ProviderCertResolver(provider)))
            .expect("policy config should build");
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn default_challenge_response_is_empty() {
        #[derive(Debug)]
        struct Bare;
        impl CertificateProvider for Bare {
            fn current_certificate(&self, _server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
                None
            }
        }
        assert_eq!(Bare.challenge_response("token"), None);
    }
}
