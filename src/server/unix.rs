//! 유닉스 도메인 스트림 서버
//!
//! - TCP 서버와 같은 수명주기, TLS 없음
//! - 바인드 후 소켓 파일 모드/그룹 적용
//! - 루프 종료 시 소켓 파일 제거

use std::fs;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::callback::{guarded_with, ConnState, FuncError, FuncInfo, FuncInfoSrv, Slot};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::{idle_timeout, ConnGuard, Handler, IdleReader, Reader, SrvState, Writer};

/// 핸들러 실행 전 연결 조정 콜백
pub type UpdateConn = Box<dyn Fn(&UnixStream) + Send + Sync>;

/// 유닉스 스트림 서버
pub struct ServerUnix {
    path: PathBuf,
    perm_file: u32,
    group_perm: i32,
    idle: Option<Duration>,
    upd: Slot<UpdateConn>,
    st: Arc<SrvState>,
}

impl ServerUnix {
    pub(crate) fn new(cfg: &ServerConfig) -> Self {
        Self {
            path: PathBuf::from(&cfg.address),
            perm_file: cfg.perm_file,
            group_perm: cfg.group_perm,
            idle: idle_timeout(cfg.con_idle_timeout_ms),
            upd: Slot::empty(),
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

    pub fn register_update_conn(&self, f: UpdateConn) {
        self.upd.store(f);
    }

    pub fn is_running(&self) -> bool {
        self.st.is_running()
    }

    pub fn is_gone(&self) -> bool {
        self.st.is_gone()
    }

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

        // 이전 실행이 남긴 소켓 파일 제거
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }

        let listener = UnixListener::bind(&self.path)?;
        self.apply_perms()?;

        self.st.set_local_addr(&self.path.to_string_lossy());
        self.st.set_running();

        info!("SIO Unix server listening on {}", self.path.display());
        self.st
            .fct_info_srv(&format!("server listening on {}", self.path.display()));

        tokio::pin!(ctx);

        loop {
            if self.st.stop_requested() {
                break;
            }

            tokio::select! {
                _ = &mut ctx => {
                    debug!("컨텍스트 취소로 수락 루프 종료");
                    break;
                }
                res = listener.accept() => match res {
                    Ok((stream, _peer)) => {
                        self.spawn_conn(stream, handler.clone());
                    }
                    Err(e) => {
                        let err = Error::from(e);
                        warn!("수락 에러: {}", err);
                        self.st.fct_error(&err);
                    }
                },
                _ = sleep(Duration::from_millis(10)) => {}
            }
        }

        self.st.end_listen();

        // 소켓 파일 정리 (best effort)
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("소켓 파일 제거 실패: {}", e);
        }

        self.st.fct_info_srv("server listen loop stopped");
        info!("SIO Unix server stopped on {}", self.path.display());

        Ok(())
    }

    /// 소켓 파일 모드/그룹 적용
    fn apply_perms(&self) -> Result<()> {
        fs::set_permissions(&self.path, fs::Permissions::from_mode(self.perm_file))?;

        if self.group_perm >= 0 {
            std::os::unix::fs::chown(&self.path, None, Some(self.group_perm as u32))?;
        }

        Ok(())
    }

    fn spawn_conn(&self, stream: UnixStream, handler: Arc<Handler>) {
        let st = self.st.clone();
        let idle = self.idle;
        let upd = self.upd.load();
        let local = self.path.to_string_lossy().into_owned();

        tokio::spawn(async move {
            let _guard = ConnGuard::new(st.clone());
            let remote = "unix-peer".to_string();

            st.fct_info(&local, &remote, ConnState::New);

            if let Some(u) = upd {
                guarded_with(&st.fe, "update_conn", || (*u)(&stream));
            }

            let work = async {
                let (r, w) = stream.into_split();
                let rd: Reader = match idle {
                    Some(d) => Box::new(IdleReader::new(Box::new(r) as Reader, d)),
                    None => Box::new(r),
                };
                let wr: Writer = Box::new(w);

                st.fct_info(&local, &remote, ConnState::Handler);

                let fut = (*handler)(rd, wr);
                if std::panic::AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                    warn!("핸들러 panic 복구 (unix)");
                    st.fct_error(&Error::HandlerPanic);
                }
            };

            tokio::select! {
                _ = work => {}
                _ = st.hard_stop() => {
                    debug!("하드 종료로 연결 중단 (unix)");
                }
            }

            st.fct_info(&local, &remote, ConnState::Close);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTls;
    use crate::protocol::NetworkProtocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config(path: &std::path::Path) -> ServerConfig {
        ServerConfig {
            network: NetworkProtocol::Unix,
            address: path.to_string_lossy().into_owned(),
            tls: ConfigTls::default(),
            perm_file: 0o660,
            group_perm: -1,
            con_idle_timeout_ms: 0,
        }
    }

    async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_unix_echo_and_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("echo.sock");

        let srv = Arc::new(ServerUnix::new(&test_config(&sock)));
        srv.register_handler(Box::new(|mut rd: Reader, mut wr: Writer| {
            Box::pin(async move {
                let mut buf = [0u8; 256];
                if let Ok(n) = rd.read(&mut buf).await {
                    let _ = wr.write_all(&buf[..n]).await;
                }
                let _ = wr.shutdown().await;
            })
        }));

        let s = srv.clone();
        let jh = tokio::spawn(async move { s.listen(std::future::pending::<()>()).await });
        assert!(wait_until(|| srv.is_running(), Duration::from_secs(2)).await);
        assert!(sock.exists());

        // 파일 모드 확인 (소켓 비트 제외 하위 9비트)
        let mode = fs::metadata(&sock).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o660);

        let mut conn = UnixStream::connect(&sock).await.unwrap();
        conn.write_all(b"ipc").await.unwrap();

        let mut buf = [0u8; 3];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ipc");
        drop(conn);

        srv.close().unwrap();
        jh.await.unwrap().unwrap();

        // 종료 후 소켓 파일은 제거됨
        assert!(!sock.exists());
    }
}
