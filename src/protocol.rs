//! 전송 프로토콜 열거형
//!
//! - 이름 파싱/직렬화 (serde는 문자열 형태 사용)
//! - 프로토콜 계열 판별 헬퍼
//! - 상태 없음, 불변

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// 전송 프로토콜 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkProtocol {
    /// 미지정 / 알 수 없음
    #[default]
    Empty,
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
    Unix,
    Unixgram,
    Ip,
    Ip4,
    Ip6,
}

impl NetworkProtocol {
    /// 소문자 와이어 이름 반환
    pub fn code(&self) -> &'static str {
        match self {
            NetworkProtocol::Empty => "",
            NetworkProtocol::Tcp => "tcp",
            NetworkProtocol::Tcp4 => "tcp4",
            NetworkProtocol::Tcp6 => "tcp6",
            NetworkProtocol::Udp => "udp",
            NetworkProtocol::Udp4 => "udp4",
            NetworkProtocol::Udp6 => "udp6",
            NetworkProtocol::Unix => "unix",
            NetworkProtocol::Unixgram => "unixgram",
            NetworkProtocol::Ip => "ip",
            NetworkProtocol::Ip4 => "ip4",
            NetworkProtocol::Ip6 => "ip6",
        }
    }

    /// TCP 계열 여부
    pub fn is_tcp(&self) -> bool {
        matches!(
            self,
            NetworkProtocol::Tcp | NetworkProtocol::Tcp4 | NetworkProtocol::Tcp6
        )
    }

    /// UDP 계열 여부
    pub fn is_udp(&self) -> bool {
        matches!(
            self,
            NetworkProtocol::Udp | NetworkProtocol::Udp4 | NetworkProtocol::Udp6
        )
    }

    /// 유닉스 도메인 계열 여부
    pub fn is_unix_family(&self) -> bool {
        matches!(self, NetworkProtocol::Unix | NetworkProtocol::Unixgram)
    }

    /// IP raw 계열 여부 (이 레이어에서 직접 다루지 않음)
    pub fn is_ip(&self) -> bool {
        matches!(
            self,
            NetworkProtocol::Ip | NetworkProtocol::Ip4 | NetworkProtocol::Ip6
        )
    }

    /// 비연결형(데이터그램) 프로토콜 여부
    pub fn is_datagram(&self) -> bool {
        self.is_udp() || matches!(self, NetworkProtocol::Unixgram)
    }

    /// IPv4 전용 변형 여부
    pub fn is_v4_only(&self) -> bool {
        matches!(
            self,
            NetworkProtocol::Tcp4 | NetworkProtocol::Udp4 | NetworkProtocol::Ip4
        )
    }

    /// IPv6 전용 변형 여부
    pub fn is_v6_only(&self) -> bool {
        matches!(
            self,
            NetworkProtocol::Tcp6 | NetworkProtocol::Udp6 | NetworkProtocol::Ip6
        )
    }

    /// 이름으로 파싱 (대소문자 무시, 미지원 이름은 Empty)
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => NetworkProtocol::Tcp,
            "tcp4" => NetworkProtocol::Tcp4,
            "tcp6" => NetworkProtocol::Tcp6,
            "udp" => NetworkProtocol::Udp,
            "udp4" => NetworkProtocol::Udp4,
            "udp6" => NetworkProtocol::Udp6,
            "unix" => NetworkProtocol::Unix,
            "unixgram" => NetworkProtocol::Unixgram,
            "ip" => NetworkProtocol::Ip,
            "ip4" => NetworkProtocol::Ip4,
            "ip6" => NetworkProtocol::Ip6,
            _ => NetworkProtocol::Empty,
        }
    }
}

impl fmt::Display for NetworkProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for NetworkProtocol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for NetworkProtocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for NetworkProtocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProtocolVisitor;

        impl Visitor<'_> for ProtocolVisitor {
            type Value = NetworkProtocol;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a network protocol name")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(NetworkProtocol::parse(v))
            }
        }

        deserializer.deserialize_str(ProtocolVisitor)
    }
}
