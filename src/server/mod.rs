//! 소켓 서버 (프로토콜별 변형)
//!
//! - 상태 머신: Created → Listening → Draining → Closed (터미널)
//! - 연결/데이터그램마다 핸들러를 개별 태스크로 디스패치
//! - 원자적 플래그/카운터, 콜백 슬롯은 last-write-wins

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

use crate::callback::{FuncError, FuncInfo, FuncInfoSrv};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::NetworkProtocol;

mod state;
pub mod tcp;
pub mod udp;
#[cfg(unix)]
pub mod unix;
#[cfg(unix)]
pub mod unixgram;

pub(crate) use state::{ConnGuard, SrvState};

/// 핸들러가 받는 요청 리더
pub type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// 핸들러가 받는 응답 라이터
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// 핸들러 퓨처
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// 연결/데이터그램 핸들러
///
/// 연결(또는 데이터그램)마다 한 번 호출된다. 비연결형 프로토콜에서는
/// 호출이 끝난 뒤 리더/라이터를 보관하면 안 된다.
pub type Handler = Box<dyn Fn(Reader, Writer) -> HandlerFuture + Send + Sync>;

/// 프로토콜별 서버 변형
///
/// `ServerConfig::server()`가 검증 후 프로토콜에 맞는 변형을 생성한다.
pub enum Server {
    Tcp(tcp::ServerTcp),
    Udp(udp::ServerUdp),
    #[cfg(unix)]
    Unix(unix::ServerUnix),
    #[cfg(unix)]
    Unixgram(unixgram::ServerUnixgram),
}

macro_rules! dispatch {
    ($self:ident, $srv:ident => $body:expr) => {
        match $self {
            Server::Tcp($srv) => $body,
            Server::Udp($srv) => $body,
            #[cfg(unix)]
            Server::Unix($srv) => $body,
            #[cfg(unix)]
            Server::Unixgram($srv) => $body,
        }
    };
}

impl Server {
    /// 검증된 설정으로 서버 생성
    pub fn new(cfg: &ServerConfig) -> Result<Self> {
        cfg.validate()?;

        match cfg.network {
            n if n.is_tcp() => Ok(Server::Tcp(tcp::ServerTcp::new(cfg))),
            n if n.is_udp() => Ok(Server::Udp(udp::ServerUdp::new(cfg))),
            #[cfg(unix)]
            NetworkProtocol::Unix => Ok(Server::Unix(unix::ServerUnix::new(cfg))),
            #[cfg(unix)]
            NetworkProtocol::Unixgram => Ok(Server::Unixgram(unixgram::ServerUnixgram::new(cfg))),
            _ => Err(Error::InvalidProtocol),
        }
    }

    /// 핸들러 등록 (listen 전에 필수)
    pub fn register_handler(&self, f: Handler) {
        dispatch!(self, s => s.register_handler(f))
    }

    /// 에러 콜백 등록
    pub fn register_func_error(&self, f: FuncError) {
        dispatch!(self, s => s.register_func_error(f))
    }

    /// 연결 상태 콜백 등록
    pub fn register_func_info(&self, f: FuncInfo) {
        dispatch!(self, s => s.register_func_info(f))
    }

    /// 서버 정보 콜백 등록
    pub fn register_func_info_srv(&self, f: FuncInfoSrv) {
        dispatch!(self, s => s.register_func_info_srv(f))
    }

    /// 수신 시작 (블로킹)
    ///
    /// `ctx`가 완료되거나 `shutdown`/`close`가 호출되면 반환한다.
    pub async fn listen<F>(&self, ctx: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        dispatch!(self, s => s.listen(ctx).await)
    }

    /// 우아한 종료: 수락 중단 후 드레인 완료 대기
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        dispatch!(self, s => s.shutdown(timeout).await)
    }

    /// 하드 종료: 수락 중단 + 진행 중 핸들러 즉시 종료 (멱등)
    pub fn close(&self) -> Result<()> {
        dispatch!(self, s => s.close())
    }

    pub fn is_running(&self) -> bool {
        dispatch!(self, s => s.is_running())
    }

    pub fn is_gone(&self) -> bool {
        dispatch!(self, s => s.is_gone())
    }

    /// 현재 열린 연결 수 (비연결형 프로토콜은 항상 0)
    pub fn open_connections(&self) -> i64 {
        dispatch!(self, s => s.open_connections())
    }

    /// 바인딩된 로컬 주소 (listen 이후 관찰 가능)
    pub fn local_addr(&self) -> Option<String> {
        dispatch!(self, s => s.local_addr())
    }

    pub fn as_tcp(&self) -> Option<&tcp::ServerTcp> {
        match self {
            Server::Tcp(s) => Some(s),
            _ => None,
        }
    }

    #[cfg(unix)]
    pub fn as_unix(&self) -> Option<&unix::ServerUnix> {
        match self {
            Server::Unix(s) => Some(s),
            _ => None,
        }
    }
}

/// 유휴 타임아웃 감시 리더
///
/// 읽기 진행이 `idle` 동안 없으면 TimedOut 에러를 돌려준다.
/// 성공적으로 읽을 때마다 데드라인이 연장된다.
pub(crate) struct IdleReader<R> {
    inner: R,
    idle: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl<R> IdleReader<R> {
    pub(crate) fn new(inner: R, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            sleep: Box::pin(sleep(idle)),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for IdleReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();

        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(res) => {
                let deadline = Instant::now() + me.idle;
                me.sleep.as_mut().reset(deadline);
                Poll::Ready(res)
            }
            Poll::Pending => match me.sleep.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connection idle timeout",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// 설정값을 유휴 타임아웃으로 변환 (1초 미만은 비활성)
pub(crate) fn idle_timeout(ms: u64) -> Option<Duration> {
    if ms < 1000 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}
