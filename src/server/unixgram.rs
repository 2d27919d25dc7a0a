//! 유닉스 데이터그램 서버
//!
//! - UDP 서버와 같은 구조, 주소는 파일시스템 경로
//! - 이름 없는 클라이언트 소켓에는 응답을 버린다
//! - open_connections()는 항상 0

use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::io::AsyncWrite;
use tokio::net::UnixDatagram;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::callback::{ConnState, FuncError, FuncInfo, FuncInfoSrv};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::{Handler, Reader, SrvState, Writer};

/// 수신 데이터그램 최대 크기
const MAX_DATAGRAM: usize = 65535;

/// 유닉스 데이터그램 서버
pub struct ServerUnixgram {
    path: PathBuf,
    perm_file: u32,
    group_perm: i32,
    st: Arc<SrvState>,
}

impl ServerUnixgram {
    pub(crate) fn new(cfg: &ServerConfig) -> Self {
        Self {
            path: PathBuf::from(&cfg.address),
            perm_file: cfg.perm_file,
            group_perm: cfg.group_perm,
            st: SrvState::new(),
        }
    }

    pub fn register_handler(&self, f: Handler) {
        self.st.hdl.store(f);
    }

    pub fn register_func_error(&self, f: FuncError) {
        self.st.fe.store(f);
    }

    pub fn register_func_info(&self, f: FuncInfo) {
        self.st.fi.store(f);
    }

    pub fn register_func_info_srv(&self, f: FuncInfoSrv) {
        self.st.fs.store(f);
    }

    pub fn is_running(&self) -> bool {
        self.st.is_running()
    }

    pub fn is_gone(&self) -> bool {
        self.st.is_gone()
    }

    /// 비연결형이므로 항상 0
    pub fn open_connections(&self) -> i64 {
        self.st.open_connections()
    }

    pub fn local_addr(&self) -> Option<String> {
        self.st.local_addr()
    }

    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.st.shutdown(timeout).await
    }

    pub fn close(&self) -> Result<()> {
        self.st.close()
    }

    /// 수신 시작
    pub async fn listen<F>(&self, ctx: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.st.check_startable()?;

        let handler = self.st.hdl.load().ok_or(Error::InvalidHandler)?;

        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }

        let socket = Arc::new(UnixDatagram::bind(&self.path)?);
        self.apply_perms()?;

        self.st.set_local_addr(&self.path.to_string_lossy());
        self.st.set_running();

        info!("SIO Unixgram server listening on {}", self.path.display());
        self.st
            .fct_info_srv(&format!("server listening on {}", self.path.display()));

        tokio::pin!(ctx);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            if self.st.stop_requested() {
                break;
            }

            tokio::select! {
                _ = &mut ctx => {
                    debug!("컨텍스트 취소로 수신 루프 종료");
                    break;
                }
                res = socket.recv_from(&mut buf) => match res {
                    Ok((len, peer)) => {
                        let data = Bytes::copy_from_slice(&buf[..len]);
                        let reply = peer.as_pathname().map(PathBuf::from);
                        self.spawn_datagram(data, reply, socket.clone(), handler.clone());
                    }
                    Err(e) => {
                        let err = Error::from(e);
                        warn!("수신 에러: {}", err);
                        self.st.fct_error(&err);
                    }
                },
                _ = sleep(Duration::from_millis(10)) => {}
            }
        }

        self.st.end_listen();

        if let Err(e) = fs::remove_file(&self.path) {
            debug!("소켓 파일 제거 실패: {}", e);
        }

        self.st.fct_info_srv("server listen loop stopped");
        info!("SIO Unixgram server stopped on {}", self.path.display());

        Ok(())
    }

    fn apply_perms(&self) -> Result<()> {
        fs::set_permissions(&self.path, fs::Permissions::from_mode(self.perm_file))?;

        if self.group_perm >= 0 {
            std::os::unix::fs::chown(&self.path, None, Some(self.group_perm as u32))?;
        }

        Ok(())
    }

    fn spawn_datagram(
        &self,
        data: Bytes,
        reply: Option<PathBuf>,
        socket: Arc<UnixDatagram>,
        handler: Arc<Handler>,
    ) {
        let st = self.st.clone();
        let local = self.path.to_string_lossy().into_owned();

        tokio::spawn(async move {
            let remote = reply
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_string());

            st.fct_info(&local, &remote, ConnState::Handler);

            let rd: Reader = Box::new(io::Cursor::new(data));
            let wr: Writer = Box::new(UnixgramWriter { socket, reply });

            let fut = (*handler)(rd, wr);
            if std::panic::AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                warn!("핸들러 panic 복구 (unixgram)");
                st.fct_error(&Error::HandlerPanic);
            }

            st.fct_info(&local, &remote, ConnState::Close);
        });
    }
}

/// 수신 경로로 되돌려 보내는 데이터그램 라이터
///
/// 클라이언트 소켓이 이름 없는 경우 쓰기는 조용히 버려진다
/// (fire-and-forget 계약).
struct UnixgramWriter {
    socket: Arc<UnixDatagram>,
    reply: Option<PathBuf>,
}

impl AsyncWrite for UnixgramWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let me = self.get_mut();
        match &me.reply {
            Some(path) => me.socket.poll_send_to(cx, buf, path),
            None => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
