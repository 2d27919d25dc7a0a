//! # SIO (Socket I/O Kit)
//!
//! 프로토콜 다형성 소켓 서버/클라이언트 + 대역폭 제한 파일 I/O
//!
//! ## 핵심 특징
//! - **프로토콜 다형성**: tcp/tcp4/tcp6, udp/udp4/udp6, unix, unixgram 단일 표면
//! - **선언적 설정**: 검증된 Config를 생성자에 넘기기 전까지 부작용 없음
//! - **TLS 협상**: TCP 계열 전용, 인증서 설정은 프로세스 기본값과 병합
//! - **우아한 종료**: Listen → Drain → Close 상태 머신, 취소 퓨처 지원
//! - **대역폭 스로틀**: 원자적 타임스탬프 기반 leaky 스무딩 리미터
//! - **진행률 파일 I/O**: increment/reset/EOF 콜백이 달린 파일 데코레이터

pub mod bandwidth;
pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod tls;

pub use bandwidth::BandwidthLimiter;
pub use callback::{ConnState, FuncError, FuncInfo, FuncInfoSrv};
pub use client::Client;
pub use config::{default_tls, set_default_tls, ClientConfig, ConfigTls, ServerConfig};
pub use error::{Error, Result};
pub use progress::ProgressFile;
pub use protocol::NetworkProtocol;
pub use server::{Handler, HandlerFuture, Reader, Server, Writer};
pub use tls::TlsCertConfig;

/// 내부 복사 연산 기본 버퍼 크기 (바이트)
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// 허용되는 최소 버퍼 크기 (미만이면 기본값으로 대체)
pub const MIN_BUFFER_SIZE: usize = 1024;

/// 기본 메시지 구분자 (줄바꿈)
pub const EOL: u8 = b'\n';

/// 유닉스 그룹 ID 최대값
pub const MAX_GROUP_ID: i32 = 32767;
