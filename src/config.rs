//! 클라이언트/서버 설정
//!
//! - 선언적 값 구조체, 생성자에 넘기기 전 `validate()` 필수
//! - TLS는 TCP 계열 전용
//! - 프로세스 전역 기본 TLS 설정과 read-only 병합

use std::net::{SocketAddr, ToSocketAddrs};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::protocol::NetworkProtocol;
use crate::server::Server;
use crate::tls::TlsCertConfig;
use crate::MAX_GROUP_ID;

/// 프로세스 전역 기본 TLS 인증서 설정
static DEFAULT_TLS: RwLock<Option<TlsCertConfig>> = parking_lot::const_rwlock(None);

/// 전역 기본 TLS 설정 등록
pub fn set_default_tls(cfg: TlsCertConfig) {
    *DEFAULT_TLS.write() = Some(cfg);
}

/// 전역 기본 TLS 설정 조회 (없으면 빈 설정)
pub fn default_tls() -> TlsCertConfig {
    DEFAULT_TLS.read().clone().unwrap_or_default()
}

/// TLS 사용 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigTls {
    /// TLS 활성화 여부
    #[serde(default)]
    pub enabled: bool,

    /// 검증용 서버 이름 (클라이언트 필수)
    #[serde(default)]
    pub server_name: String,

    /// 인증서 설정 (서버는 인증서 쌍 필수)
    #[serde(default)]
    pub certs: Option<TlsCertConfig>,
}

impl ConfigTls {
    /// 로컬 인증서 설정을 전역 기본값 위에 병합해 반환
    pub fn get_tls(&self) -> TlsCertConfig {
        match &self.certs {
            Some(c) => c.new_from(&default_tls()),
            None => default_tls(),
        }
    }
}

/// 클라이언트 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 전송 프로토콜
    pub network: NetworkProtocol,

    /// 접속 주소 ("host:port" 또는 유닉스 소켓 경로)
    pub address: String,

    /// TLS 설정
    #[serde(default)]
    pub tls: ConfigTls,
}

impl ClientConfig {
    /// 설정 검증
    ///
    /// 순수 함수이며 결과를 캐시하지 않는다. DNS 해석 외의
    /// 네트워크 I/O는 수행하지 않는다.
    pub fn validate(&self) -> Result<()> {
        validate_common(self.network, &self.address)?;

        if self.tls.enabled {
            if !self.network.is_tcp() {
                return Err(Error::InvalidTlsConfig);
            }
            if self.tls.server_name.is_empty() {
                return Err(Error::InvalidTlsConfig);
            }
        }

        Ok(())
    }

    /// 검증 후 프로토콜에 맞는 클라이언트 생성
    pub fn client(&self) -> Result<Client> {
        Client::new(self)
    }
}

/// 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 전송 프로토콜
    pub network: NetworkProtocol,

    /// 수신 주소 ("host:port" 또는 유닉스 소켓 경로)
    pub address: String,

    /// TLS 설정
    #[serde(default)]
    pub tls: ConfigTls,

    /// 유닉스 소켓 파일 모드 (8진, 예: 0o660)
    #[serde(default = "default_perm_file")]
    pub perm_file: u32,

    /// 유닉스 소켓 그룹 ID (-1 = 현재 프로세스 그룹 유지)
    #[serde(default = "default_group_perm")]
    pub group_perm: i32,

    /// 연결 유휴 타임아웃 (밀리초, 1000 미만이면 비활성)
    #[serde(default)]
    pub con_idle_timeout_ms: u64,
}

fn default_perm_file() -> u32 {
    0o660
}

fn default_group_perm() -> i32 {
    -1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkProtocol::Empty,
            address: String::new(),
            tls: ConfigTls::default(),
            perm_file: default_perm_file(),
            group_perm: default_group_perm(),
            con_idle_timeout_ms: 0,
        }
    }
}

impl ServerConfig {
    /// 설정 검증
    ///
    /// 순수 함수이며 결과를 캐시하지 않는다. 필드 변경 후
    /// 재검증하면 새 상태가 그대로 반영된다.
    pub fn validate(&self) -> Result<()> {
        validate_common(self.network, &self.address)?;

        if self.group_perm < -1 || self.group_perm > MAX_GROUP_ID {
            return Err(Error::InvalidGroup {
                group: self.group_perm,
            });
        }

        if self.tls.enabled {
            if !self.network.is_tcp() {
                return Err(Error::InvalidTlsConfig);
            }
            if !self.tls.get_tls().has_cert_pair() {
                return Err(Error::InvalidTlsConfig);
            }
        }

        Ok(())
    }

    /// 검증 후 프로토콜에 맞는 서버 생성
    pub fn server(&self) -> Result<Server> {
        Server::new(self)
    }
}

/// 프로토콜/주소 공통 검증
fn validate_common(network: NetworkProtocol, address: &str) -> Result<()> {
    if network == NetworkProtocol::Empty || network.is_ip() {
        return Err(Error::InvalidProtocol);
    }

    if address.is_empty() {
        return Err(Error::InvalidAddress {
            address: address.to_string(),
        });
    }

    if network.is_unix_family() {
        if cfg!(not(unix)) {
            return Err(Error::UnsupportedPlatform {
                protocol: network.code().to_string(),
            });
        }
        return Ok(());
    }

    // TCP/UDP 계열: 표준 리졸버로 해석, 실패는 원본 보존해 래핑
    let addrs = address
        .to_socket_addrs()
        .map_err(|e| Error::Resolve {
            address: address.to_string(),
            source: e,
        })?
        .collect::<Vec<_>>();

    if !family_match(network, &addrs) {
        return Err(Error::InvalidAddress {
            address: address.to_string(),
        });
    }

    Ok(())
}

fn family_match(network: NetworkProtocol, addrs: &[SocketAddr]) -> bool {
    if network.is_v4_only() {
        addrs.iter().any(|a| a.is_ipv4())
    } else if network.is_v6_only() {
        addrs.iter().any(|a| a.is_ipv6())
    } else {
        !addrs.is_empty()
    }
}

/// 런타임 주소 해석 (비동기, 프로토콜 계열 필터 적용)
pub(crate) async fn resolve_addr(network: NetworkProtocol, address: &str) -> Result<SocketAddr> {
    let addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|e| Error::Resolve {
            address: address.to_string(),
            source: e,
        })?
        .collect::<Vec<_>>();

    let found = if network.is_v4_only() {
        addrs.into_iter().find(|a| a.is_ipv4())
    } else if network.is_v6_only() {
        addrs.into_iter().find(|a| a.is_ipv6())
    } else {
        addrs.into_iter().next()
    };

    found.ok_or_else(|| Error::InvalidAddress {
        address: address.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tcp_server(addr: &str) -> ServerConfig {
        ServerConfig {
            network: NetworkProtocol::Tcp,
            address: addr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_supported_protocols() {
        for net in [
            NetworkProtocol::Tcp,
            NetworkProtocol::Tcp4,
            NetworkProtocol::Udp,
            NetworkProtocol::Udp4,
        ] {
            let cfg = ClientConfig {
                network: net,
                address: "127.0.0.1:9000".to_string(),
                tls: ConfigTls::default(),
            };
            assert!(cfg.validate().is_ok(), "{} 검증 실패", net);
        }

        #[cfg(unix)]
        for net in [NetworkProtocol::Unix, NetworkProtocol::Unixgram] {
            let cfg = ClientConfig {
                network: net,
                address: "/tmp/sio-test.sock".to_string(),
                tls: ConfigTls::default(),
            };
            assert!(cfg.validate().is_ok());
        }
    }

    #[test]
    fn test_validate_invalid_protocol() {
        let cfg = tcp_server("127.0.0.1:9000");

        let mut bad = cfg.clone();
        bad.network = NetworkProtocol::Empty;
        assert!(matches!(bad.validate(), Err(Error::InvalidProtocol)));

        bad.network = NetworkProtocol::Ip4;
        assert!(matches!(bad.validate(), Err(Error::InvalidProtocol)));
    }

    #[test]
    fn test_validate_resolve_failure_preserved() {
        let cfg = tcp_server("no-such-host.invalid.:1");
        match cfg.validate() {
            Err(Error::Resolve { address, .. }) => {
                assert!(address.contains("no-such-host"));
            }
            other => panic!("Resolve 에러 기대, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_validate_tls_tcp_only() {
        let certs = TlsCertConfig {
            cert: Some(PathBuf::from("srv.crt")),
            key: Some(PathBuf::from("srv.key")),
            root_ca: vec![],
        };

        let mut cfg = tcp_server("127.0.0.1:9000");
        cfg.tls = ConfigTls {
            enabled: true,
            server_name: String::new(),
            certs: Some(certs.clone()),
        };
        assert!(cfg.validate().is_ok());
        // 멱등성
        assert!(cfg.validate().is_ok());

        cfg.network = NetworkProtocol::Udp;
        assert!(matches!(cfg.validate(), Err(Error::InvalidTlsConfig)));

        #[cfg(unix)]
        {
            cfg.network = NetworkProtocol::Unix;
            cfg.address = "/tmp/sio-tls.sock".to_string();
            assert!(matches!(cfg.validate(), Err(Error::InvalidTlsConfig)));
        }
    }

    #[test]
    fn test_validate_tls_client_needs_server_name() {
        let cfg = ClientConfig {
            network: NetworkProtocol::Tcp,
            address: "127.0.0.1:9000".to_string(),
            tls: ConfigTls {
                enabled: true,
                server_name: String::new(),
                certs: None,
            },
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidTlsConfig)));

        let mut ok = cfg;
        ok.tls.server_name = "example.com".to_string();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_group_boundary() {
        let mut cfg = tcp_server("127.0.0.1:9000");

        for g in [-1, 0, MAX_GROUP_ID] {
            cfg.group_perm = g;
            assert!(cfg.validate().is_ok(), "group {} 은 유효해야 함", g);
        }

        cfg.group_perm = MAX_GROUP_ID + 1;
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidGroup { group: 32768 })
        ));

        cfg.group_perm = -2;
        assert!(matches!(cfg.validate(), Err(Error::InvalidGroup { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_invalid_group_blocks_server_construction() {
        let mut cfg = ServerConfig {
            network: NetworkProtocol::Unix,
            address: "/tmp/sio-group.sock".to_string(),
            ..Default::default()
        };
        cfg.group_perm = 99999;

        assert!(matches!(cfg.validate(), Err(Error::InvalidGroup { .. })));
        assert!(matches!(cfg.server(), Err(Error::InvalidGroup { .. })));
    }

    #[test]
    fn test_revalidate_after_mutation() {
        let mut cfg = tcp_server("127.0.0.1:9000");
        assert!(cfg.validate().is_ok());

        cfg.network = NetworkProtocol::Empty;
        assert!(cfg.validate().is_err());

        cfg.network = NetworkProtocol::Udp;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize() {
        let json = r#"{
            "network": "tcp",
            "address": "127.0.0.1:8080",
            "tls": { "enabled": false },
            "perm_file": 432,
            "group_perm": -1,
            "con_idle_timeout_ms": 30000
        }"#;

        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.network, NetworkProtocol::Tcp);
        assert_eq!(cfg.perm_file, 0o660);
        assert_eq!(cfg.con_idle_timeout_ms, 30000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_get_tls_merges_default() {
        let local = ConfigTls {
            enabled: true,
            server_name: "svc.local".to_string(),
            certs: Some(TlsCertConfig {
                cert: Some(PathBuf::from("local.crt")),
                key: Some(PathBuf::from("local.key")),
                root_ca: vec![],
            }),
        };

        let merged = local.get_tls();
        assert_eq!(merged.cert, Some(PathBuf::from("local.crt")));
        assert!(merged.has_cert_pair());
    }
}
