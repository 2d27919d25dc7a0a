//! 소켓 클라이언트 (프로토콜별 변형)
//!
//! - 상태: Unconnected → Connected → Closed
//! - 연결 상태 전이는 FuncInfo 콜백으로 보고
//! - `close()`는 멱등

use std::future::Future;

use crate::callback::{FuncError, FuncInfo};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::NetworkProtocol;

pub mod tcp;
pub mod udp;
#[cfg(unix)]
pub mod unix;
#[cfg(unix)]
pub mod unixgram;

/// 프로토콜별 클라이언트 변형
///
/// `ClientConfig::client()`가 검증 후 프로토콜에 맞는 변형을 생성한다.
pub enum Client {
    Tcp(tcp::ClientTcp),
    Udp(udp::ClientUdp),
    #[cfg(unix)]
    Unix(unix::ClientUnix),
    #[cfg(unix)]
    Unixgram(unixgram::ClientUnixgram),
}

macro_rules! dispatch {
    ($self:ident, $cli:ident => $body:expr) => {
        match $self {
            Client::Tcp($cli) => $body,
            Client::Udp($cli) => $body,
            #[cfg(unix)]
            Client::Unix($cli) => $body,
            #[cfg(unix)]
            Client::Unixgram($cli) => $body,
        }
    };
}

impl Client {
    /// 검증된 설정으로 클라이언트 생성
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        cfg.validate()?;

        match cfg.network {
            n if n.is_tcp() => Ok(Client::Tcp(tcp::ClientTcp::new(cfg))),
            n if n.is_udp() => Ok(Client::Udp(udp::ClientUdp::new(cfg))),
            #[cfg(unix)]
            NetworkProtocol::Unix => Ok(Client::Unix(unix::ClientUnix::new(cfg))),
            #[cfg(unix)]
            NetworkProtocol::Unixgram => Ok(Client::Unixgram(unixgram::ClientUnixgram::new(cfg))),
            _ => Err(Error::InvalidProtocol),
        }
    }

    pub fn register_func_error(&self, f: FuncError) {
        dispatch!(self, c => c.register_func_error(f))
    }

    pub fn register_func_info(&self, f: FuncInfo) {
        dispatch!(self, c => c.register_func_info(f))
    }

    /// 서버로 연결 (ctx 완료 시 중단)
    pub async fn connect<F>(&mut self, ctx: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        dispatch!(self, c => c.connect(ctx).await)
    }

    /// 연결된 상태에서 읽기
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        dispatch!(self, c => c.read(buf).await)
    }

    /// 연결된 상태에서 쓰기 (전체 기록)
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        dispatch!(self, c => c.write(buf).await)
    }

    pub fn is_connected(&self) -> bool {
        dispatch!(self, c => c.is_connected())
    }

    /// 연결 종료 (멱등)
    pub async fn close(&mut self) -> Result<()> {
        dispatch!(self, c => c.close().await)
    }

    /// 단발 전송: connect-write-close (데이터그램 프로토콜 전용)
    ///
    /// 패킷 손실은 정상 결과로 취급한다. 스트림 프로토콜에서는
    /// `InvalidProtocol`을 돌려준다.
    pub async fn once<F>(&mut self, ctx: F, data: &[u8]) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        match self {
            Client::Udp(c) => c.once(ctx, data).await,
            #[cfg(unix)]
            Client::Unixgram(c) => c.once(ctx, data).await,
            _ => Err(Error::InvalidProtocol),
        }
    }
}
