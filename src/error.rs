//! 에러 타입 정의

use thiserror::Error;

/// SIO 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 프로토콜")]
    InvalidProtocol,

    #[error("유효하지 않은 주소: {address}")]
    InvalidAddress { address: String },

    #[error("주소 해석 실패: {address}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("유효하지 않은 TLS 설정")]
    InvalidTlsConfig,

    #[error("유효하지 않은 그룹 ID: {group}")]
    InvalidGroup { group: i32 },

    #[error("핸들러 미등록")]
    InvalidHandler,

    #[error("유효하지 않은 인스턴스 (이미 종료됨)")]
    InvalidInstance,

    #[error("종료 대기 타임아웃")]
    ShutdownTimeout,

    #[error("연결되지 않음")]
    NotConnected,

    #[error("TLS 에러: {0}")]
    Tls(String),

    #[error("핸들러 panic 복구됨")]
    HandlerPanic,

    #[error("콜백 panic 복구됨: {0}")]
    CallbackPanic(&'static str),

    #[error("이 플랫폼에서 지원하지 않는 프로토콜: {protocol}")]
    UnsupportedPlatform { protocol: String },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
