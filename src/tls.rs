//! TLS 인증서 설정 (외부 협력자 경계)
//!
//! - PEM 경로 기반 인증서/키/루트 CA 설정
//! - 프로세스 기본값과의 read-only 병합 (`new_from`)
//! - 체인 파싱/검증 자체는 rustls에 위임

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore, ServerConfig as RustlsServerConfig};
use serde::{Deserialize, Serialize};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{Error, Result};

/// TLS 인증서 설정
///
/// 모든 필드는 선택적이다. 비어 있는 필드는 `new_from` 병합 시
/// 기본 설정의 값을 물려받는다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsCertConfig {
    /// 서버/클라이언트 인증서 PEM 경로
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// 개인 키 PEM 경로
    #[serde(default)]
    pub key: Option<PathBuf>,

    /// 신뢰 루트 CA PEM 경로 목록 (클라이언트 검증용)
    #[serde(default)]
    pub root_ca: Vec<PathBuf>,
}

impl TlsCertConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본 설정 위에 현재 설정을 겹친 새 설정 생성
    ///
    /// 현재 설정에서 비어 있는 필드만 기본값으로 채워진다.
    /// 양쪽 모두 변경되지 않는다.
    pub fn new_from(&self, default: &TlsCertConfig) -> Self {
        Self {
            cert: self.cert.clone().or_else(|| default.cert.clone()),
            key: self.key.clone().or_else(|| default.key.clone()),
            root_ca: if self.root_ca.is_empty() {
                default.root_ca.clone()
            } else {
                self.root_ca.clone()
            },
        }
    }

    /// 인증서/키 쌍 보유 여부
    pub fn has_cert_pair(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }

    /// 서버측 rustls 설정 생성
    pub fn server_tls(&self) -> Result<RustlsServerConfig> {
        let (cert, key) = match (&self.cert, &self.key) {
            (Some(c), Some(k)) => (c, k),
            _ => return Err(Error::InvalidTlsConfig),
        };

        let certs = load_certs(cert)?;
        let key = load_key(key)?;

        RustlsServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(e.to_string()))
    }

    /// 클라이언트측 rustls 설정 + 검증용 서버 이름 생성
    pub fn client_tls(&self, server_name: &str) -> Result<(RustlsClientConfig, ServerName<'static>)> {
        if server_name.is_empty() {
            return Err(Error::InvalidTlsConfig);
        }

        let mut roots = RootCertStore::empty();
        for path in &self.root_ca {
            for cert in load_certs(path)? {
                roots.add(cert).map_err(|e| Error::Tls(e.to_string()))?;
            }
        }

        if roots.is_empty() {
            return Err(Error::InvalidTlsConfig);
        }

        let cfg = RustlsClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::Tls(e.to_string()))?;

        Ok((cfg, name))
    }

    /// tokio-rustls acceptor 생성
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(self.server_tls()?)))
    }

    /// tokio-rustls connector + 서버 이름 생성
    pub fn connector(&self, server_name: &str) -> Result<(TlsConnector, ServerName<'static>)> {
        let (cfg, name) = self.client_tls(server_name)?;
        Ok((TlsConnector::from(Arc::new(cfg)), name))
    }
}

fn load_certs(path: &PathBuf) -> Result<Vec<CertificateDer<'static>>> {
    let mut rd = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut rd).collect::<io::Result<Vec<_>>>()?;

    if certs.is_empty() {
        return Err(Error::InvalidTlsConfig);
    }

    Ok(certs)
}

fn load_key(path: &PathBuf) -> Result<PrivateKeyDer<'static>> {
    let mut rd = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut rd)?.ok_or(Error::InvalidTlsConfig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_from_merge() {
        let default = TlsCertConfig {
            cert: Some(PathBuf::from("/etc/sio/default.crt")),
            key: Some(PathBuf::from("/etc/sio/default.key")),
            root_ca: vec![PathBuf::from("/etc/sio/ca.pem")],
        };

        let local = TlsCertConfig {
            cert: Some(PathBuf::from("/srv/local.crt")),
            key: None,
            root_ca: vec![],
        };

        let merged = local.new_from(&default);
        assert_eq!(merged.cert, Some(PathBuf::from("/srv/local.crt")));
        assert_eq!(merged.key, Some(PathBuf::from("/etc/sio/default.key")));
        assert_eq!(merged.root_ca, default.root_ca);

        // 병합은 read-only
        assert!(local.key.is_none());
    }

    #[test]
    fn test_has_cert_pair() {
        let mut cfg = TlsCertConfig::new();
        assert!(!cfg.has_cert_pair());

        cfg.cert = Some(PathBuf::from("a.crt"));
        assert!(!cfg.has_cert_pair());

        cfg.key = Some(PathBuf::from("a.key"));
        assert!(cfg.has_cert_pair());
    }

    #[test]
    fn test_server_tls_without_pair() {
        let cfg = TlsCertConfig::new();
        assert!(matches!(cfg.server_tls(), Err(Error::InvalidTlsConfig)));
    }

    #[test]
    fn test_client_tls_requires_server_name_and_roots() {
        let cfg = TlsCertConfig::new();
        assert!(matches!(cfg.client_tls(""), Err(Error::InvalidTlsConfig)));
        assert!(matches!(
            cfg.client_tls("example.com"),
            Err(Error::InvalidTlsConfig)
        ));
    }
}
