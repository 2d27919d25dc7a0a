//! TCP 서버
//!
//! - 연결마다 핸들러를 개별 태스크로 실행
//! - TLS accept (인증서 쌍이 있을 때만)
//! - 유휴 타임아웃, 연결 카운터, 우아한/하드 종료

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::callback::{guarded_with, ConnState, FuncError, FuncInfo, FuncInfoSrv, Slot};
use crate::config::{resolve_addr, ServerConfig};
use crate::error::{Error, Result};
use crate::protocol::NetworkProtocol;
use crate::server::{idle_timeout, ConnGuard, Handler, IdleReader, Reader, SrvState, Writer};

/// 핸들러 실행 전 연결 조정 콜백 (타임아웃/버퍼 등 소켓 옵션용)
pub type UpdateConn = Box<dyn Fn(&TcpStream) + Send + Sync>;

/// TCP 서버
pub struct ServerTcp {
    network: NetworkProtocol,
    address: String,
    tls: crate::config::ConfigTls,
    idle: Option<Duration>,
    upd: Slot<UpdateConn>,
    st: Arc<SrvState>,
}

impl ServerTcp {
    pub(crate) fn new(cfg: &ServerConfig) -> Self {
        Self {
            network: cfg.network,
            address: cfg.address.clone(),
            tls: cfg.tls.clone(),
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

    /// 연결 조정 콜백 등록
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
    ///
    /// `ctx` 완료, `shutdown`, `close` 중 먼저 오는 것으로 반환한다.
    pub async fn listen<F>(&self, ctx: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.st.check_startable()?;

        let handler = self.st.hdl.load().ok_or(Error::InvalidHandler)?;

        let acceptor = if self.tls.enabled {
            Some(self.tls.get_tls().acceptor()?)
        } else {
            None
        };

        tokio::pin!(ctx);

        // 해석/바인딩 단계도 ctx로 바운드
        let listener = tokio::select! {
            biased;
            _ = &mut ctx => {
                debug!("컨텍스트 취소로 바인딩 전 종료");
                self.st.end_listen();
                return Ok(());
            }
            res = async {
                let addr = resolve_addr(self.network, &self.address).await?;
                Ok::<_, Error>(TcpListener::bind(addr).await?)
            } => res?,
        };
        let local = listener.local_addr()?;

        self.st.set_local_addr(&local.to_string());
        self.st.set_running();

        info!(
            "SIO TCP server listening on {} (tls: {})",
            local,
            acceptor.is_some()
        );
        self.st
            .fct_info_srv(&format!("server listening on {}", local));

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
                    Ok((stream, peer)) => {
                        self.spawn_conn(stream, peer, handler.clone(), acceptor.clone());
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
        self.st.fct_info_srv("server listen loop stopped");
        info!("SIO TCP server stopped on {}", local);

        Ok(())
    }

    fn spawn_conn(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        handler: Arc<Handler>,
        acceptor: Option<TlsAcceptor>,
    ) {
        let st = self.st.clone();
        let idle = self.idle;
        let upd = self.upd.load();

        tokio::spawn(async move {
            let _guard = ConnGuard::new(st.clone());

            let local = stream
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default();
            let remote = peer.to_string();

            st.fct_info(&local, &remote, ConnState::New);

            if let Some(u) = upd {
                guarded_with(&st.fe, "update_conn", || (*u)(&stream));
            }

            let work = async {
                let (rd, wr): (Reader, Writer) = match acceptor {
                    Some(acc) => match acc.accept(stream).await {
                        Ok(tls) => {
                            let (r, w) = tokio::io::split(tls);
                            (Box::new(r), Box::new(w))
                        }
                        Err(e) => {
                            let err = Error::Tls(e.to_string());
                            warn!("TLS 협상 실패 ({}): {}", remote, err);
                            st.fct_error(&err);
                            return;
                        }
                    },
                    None => {
                        let (r, w) = stream.into_split();
                        (Box::new(r), Box::new(w))
                    }
                };

                let rd: Reader = match idle {
                    Some(d) => Box::new(IdleReader::new(rd, d)),
                    None => rd,
                };

                st.fct_info(&local, &remote, ConnState::Handler);

                let fut = (*handler)(rd, wr);
                if std::panic::AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                    warn!("핸들러 panic 복구 (peer: {})", remote);
                    st.fct_error(&Error::HandlerPanic);
                }
            };

            tokio::select! {
                _ = work => {}
                _ = st.hard_stop() => {
                    debug!("하드 종료로 연결 중단: {}", remote);
                }
            }

            st.fct_info(&local, &remote, ConnState::Close);
        });
    }
}
