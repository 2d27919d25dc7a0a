//! UDP 서버
//!
//! - 데이터그램마다 핸들러를 개별 태스크로 실행
//! - 영속 연결 객체 없음: open_connections()는 항상 0
//! - 응답은 수신 주소로 send_to

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::io::AsyncWrite;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::callback::{ConnState, FuncError, FuncInfo, FuncInfoSrv};
use crate::config::{resolve_addr, ServerConfig};
use crate::error::{Error, Result};
use crate::protocol::NetworkProtocol;
use crate::server::{Handler, Reader, SrvState, Writer};

/// 수신 데이터그램 최대 크기
const MAX_DATAGRAM: usize = 65535;

/// UDP 서버
pub struct ServerUdp {
    network: NetworkProtocol,
    address: String,
    st: Arc<SrvState>,
}

impl ServerUdp {
    pub(crate) fn new(cfg: &ServerConfig) -> Self {
        Self {
            network: cfg.network,
            address: cfg.address.clone(),
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

        tokio::pin!(ctx);

        // 해석/바인딩 단계도 ctx로 바운드
        let socket = tokio::select! {
            biased;
            _ = &mut ctx => {
                debug!("컨텍스트 취소로 바인딩 전 종료");
                self.st.end_listen();
                return Ok(());
            }
            res = async {
                let addr = resolve_addr(self.network, &self.address).await?;
                Ok::<_, Error>(Arc::new(UdpSocket::bind(addr).await?))
            } => res?,
        };
        let local = socket.local_addr()?;

        self.st.set_local_addr(&local.to_string());
        self.st.set_running();

        info!("SIO UDP server listening on {}", local);
        self.st
            .fct_info_srv(&format!("server listening on {}", local));

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
                        self.spawn_datagram(data, peer, local, socket.clone(), handler.clone());
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
        self.st.fct_info_srv("server listen loop stopped");
        info!("SIO UDP server stopped on {}", local);

        Ok(())
    }

    fn spawn_datagram(
        &self,
        data: Bytes,
        peer: SocketAddr,
        local: SocketAddr,
        socket: Arc<UdpSocket>,
        handler: Arc<Handler>,
    ) {
        let st = self.st.clone();

        tokio::spawn(async move {
            let local = local.to_string();
            let remote = peer.to_string();

            st.fct_info(&local, &remote, ConnState::Handler);

            let rd: Reader = Box::new(io::Cursor::new(data));
            let wr: Writer = Box::new(DatagramWriter { socket, peer });

            let fut = (*handler)(rd, wr);
            if std::panic::AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                warn!("핸들러 panic 복구 (peer: {})", remote);
                st.fct_error(&Error::HandlerPanic);
            }

            st.fct_info(&local, &remote, ConnState::Close);
        });
    }
}

/// 수신 주소로 되돌려 보내는 데이터그램 라이터
///
/// write마다 데이터그램 하나가 전송된다. flush/shutdown은 no-op.
struct DatagramWriter {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl AsyncWrite for DatagramWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let me = self.get_mut();
        me.socket.poll_send_to(cx, buf, me.peer)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::udp::ClientUdp;
    use crate::config::{ClientConfig, ConfigTls};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config(addr: &str) -> ServerConfig {
        ServerConfig {
            network: NetworkProtocol::Udp,
            address: addr.to_string(),
            tls: ConfigTls::default(),
            ..Default::default()
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
    async fn test_udp_once_end_to_end() {
        let srv = Arc::new(ServerUdp::new(&test_config("127.0.0.1:0")));

        let hits = Arc::new(AtomicUsize::new(0));
        let hc = hits.clone();
        srv.register_handler(Box::new(move |mut rd: Reader, mut wr: Writer| {
            let hc = hc.clone();
            Box::pin(async move {
                let mut data = Vec::new();
                if rd.read_to_end(&mut data).await.is_ok() {
                    hc.fetch_add(1, Ordering::SeqCst);
                    let _ = wr.write_all(&data).await;
                }
            })
        }));

        let s = srv.clone();
        let jh = tokio::spawn(async move { s.listen(std::future::pending::<()>()).await });
        assert!(wait_until(|| srv.is_running(), Duration::from_secs(2)).await);

        // 수신 루프 동안 연결 카운터는 항상 0
        assert_eq!(srv.open_connections(), 0);

        let addr = srv.local_addr().unwrap();
        let cfg = ClientConfig {
            network: NetworkProtocol::Udp,
            address: addr,
            tls: ConfigTls::default(),
        };

        let mut cli = ClientUdp::new(&cfg);
        cli.once(std::future::pending::<()>(), b"x").await.unwrap();

        assert!(
            wait_until(|| hits.load(Ordering::SeqCst) >= 1, Duration::from_secs(2)).await,
            "핸들러가 2초 내에 호출되어야 함"
        );
        assert_eq!(srv.open_connections(), 0);

        srv.close().unwrap();
        jh.await.unwrap().unwrap();
        assert!(srv.is_gone());
    }

    #[tokio::test]
    async fn test_ctx_already_done_skips_bind() {
        let srv = Arc::new(ServerUdp::new(&test_config("127.0.0.1:0")));
        srv.register_handler(Box::new(|_rd, _wr| Box::pin(async {})));

        // 이미 완료된 ctx: 바인딩 없이 즉시 종료
        srv.listen(std::future::ready(())).await.unwrap();
        assert!(!srv.is_running());
        assert!(srv.is_gone());
        assert!(srv.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_udp_echo_reply() {
        let srv = Arc::new(ServerUdp::new(&test_config("127.0.0.1:0")));
        srv.register_handler(Box::new(|mut rd: Reader, mut wr: Writer| {
            Box::pin(async move {
                let mut data = Vec::new();
                let _ = rd.read_to_end(&mut data).await;
                data.reverse();
                let _ = wr.write_all(&data).await;
            })
        }));

        let s = srv.clone();
        let jh = tokio::spawn(async move { s.listen(std::future::pending::<()>()).await });
        assert!(wait_until(|| srv.local_addr().is_some(), Duration::from_secs(2)).await);

        let addr = srv.local_addr().unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(&addr).await.unwrap();
        sock.send(b"abc").await.unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), sock.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"cba");

        srv.close().unwrap();
        jh.await.unwrap().unwrap();
    }
}
