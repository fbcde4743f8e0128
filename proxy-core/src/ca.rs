use crate::error::ProxyError;
use crate::Result;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use std::fs;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::info;

const CA_COMMON_NAME: &str = "DevProxy Root CA";
const CA_ORGANIZATION: &str = "DevProxy Local Development";

/// Root certificate authority used to decrypt intercepted HTTPS hosts.
///
/// The root is persisted as `ca.pem`/`ca.key` in the certificate directory,
/// with a `ca.crt` copy for importing into browsers and devices. Leaf
/// certificates are issued on demand by the proxy engine.
pub struct CertificateAuthority {
    ca_cert: Certificate,
    dir: PathBuf,
}

impl CertificateAuthority {
    /// Load the root from `ca_dir`, or generate and persist a new one.
    pub fn new(ca_dir: &Path) -> Result<Self> {
        let ca_cert_path = ca_dir.join("ca.pem");
        let ca_key_path = ca_dir.join("ca.key");

        let ca_cert = if ca_cert_path.exists() && ca_key_path.exists() {
            let key_pem = fs::read_to_string(&ca_key_path)?;
            Self::root_from_key(&key_pem)?
        } else {
            fs::create_dir_all(ca_dir)?;
            let cert = Self::generate_and_save(&ca_cert_path, &ca_key_path)?;
            info!("Generated new root CA, trust {}", ca_dir.join("ca.crt").display());
            cert
        };

        Ok(Self {
            ca_cert,
            dir: ca_dir.to_path_buf(),
        })
    }

    fn root_params() -> CertificateParams {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        dn.push(DnType::OrganizationName, CA_ORGANIZATION);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params
    }

    /// Rebuild the signing root around a persisted private key.
    ///
    /// rcgen cannot sign with a parsed certificate, so the root is recreated
    /// with the same subject and key; issued leaves still chain to the
    /// trusted `ca.pem`.
    fn root_from_key(key_pem: &str) -> Result<Certificate> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| ProxyError::Certificate(format!("Failed to parse CA key: {}", e)))?;
        let mut params = Self::root_params();
        params.key_pair = Some(key_pair);
        Certificate::from_params(params)
            .map_err(|e| ProxyError::Certificate(format!("Failed to recreate CA cert: {}", e)))
    }

    fn generate_and_save(cert_path: &Path, key_path: &Path) -> Result<Certificate> {
        let mut params = Self::root_params();

        // Valid for 10 years
        let not_before = OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + Duration::days(365 * 10);

        let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| ProxyError::Certificate(format!("Failed to generate CA key: {}", e)))?;
        params.key_pair = Some(key_pair);

        let cert = Certificate::from_params(params)
            .map_err(|e| ProxyError::Certificate(format!("Failed to generate CA cert: {}", e)))?;

        let cert_pem = cert
            .serialize_pem()
            .map_err(|e| ProxyError::Certificate(format!("Failed to serialize CA cert: {}", e)))?;
        fs::write(cert_path, &cert_pem)?;
        fs::write(key_path, cert.serialize_private_key_pem())?;
        fs::write(cert_path.with_extension("crt"), &cert_pem)?;

        Ok(cert)
    }

    /// Path of the certificate to install as trusted.
    pub fn trust_path(&self) -> PathBuf {
        self.dir.join("ca.crt")
    }

    /// Root certificate in DER format (for rustls/hudsucker).
    pub fn ca_cert_der(&self) -> Result<Vec<u8>> {
        self.ca_cert
            .serialize_der()
            .map_err(|e| ProxyError::Certificate(format!("Failed to serialize CA cert DER: {}", e)))
    }

    /// Root private key in DER format (for rustls/hudsucker).
    pub fn ca_key_der(&self) -> Vec<u8> {
        self.ca_cert.serialize_private_key_der()
    }
}
