//! TCP 클라이언트
//!
//! - 연결 시 TLS 설정이 켜져 있으면 핸드셰이크까지 수행
//! - 평문 폴백 없음: TLS 설정이 잘못되면 연결 자체가 실패
//! - close() 멱등, 미연결 읽기/쓰기는 NotConnected

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use crate::callback::{ConnState, FuncError, FuncInfo, Slot};
use crate::config::{resolve_addr, ClientConfig, ConfigTls};
use crate::error::{Error, Result};
use crate::protocol::NetworkProtocol;

/// 평문 또는 TLS 스트림
///
/// TLS 쪽 Box는 두 변형의 크기 차이를 줄이기 위한 것.
enum ClientStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// TCP 클라이언트
pub struct ClientTcp {
    network: NetworkProtocol,
    address: String,
    tls: ConfigTls,
    stream: Option<ClientStream>,
    fe: Slot<FuncError>,
    fi: Slot<FuncInfo>,
}

impl ClientTcp {
    pub fn new(cfg: &ClientConfig) -> Self {
        Self {
            network: cfg.network,
            address: cfg.address.clone(),
            tls: cfg.tls.clone(),
            stream: None,
            fe: Slot::empty(),
            fi: Slot::empty(),
        }
    }

    pub fn register_func_error(&self, f: FuncError) {
        self.fe.store(f);
    }

    pub fn register_func_info(&self, f: FuncInfo) {
        self.fi.store(f);
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn fct_info(&self, local: &str, remote: &str, state: ConnState) {
        if let Some(f) = self.fi.load() {
            crate::callback::guarded_with(&self.fe, "func_info", || (*f)(local, remote, state));
        }
    }

    fn fct_error(&self, e: &Error) {
        if let Some(f) = self.fe.load() {
            crate::callback::guarded("func_error", || (*f)(e));
        }
    }

    /// 서버로 연결 (ctx 완료 시 중단)
    pub async fn connect<F>(&mut self, ctx: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.fct_info("", &self.address.clone(), ConnState::Dial);

        let res = self.do_connect(ctx).await;
        if let Err(e) = &res {
            self.fct_error(e);
        }
        res
    }

    async fn do_connect<F>(&mut self, ctx: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(ctx);

        // 주소 해석 단계도 ctx로 바운드 (느린 DNS에서 즉시 반환)
        let addr = tokio::select! {
            biased;
            _ = &mut ctx => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "connect canceled",
                )));
            }
            res = resolve_addr(self.network, &self.address) => res?,
        };

        let stream = tokio::select! {
            res = TcpStream::connect(addr) => res?,
            _ = &mut ctx => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "connect canceled",
                )));
            }
        };

        let local = stream
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();

        let stream = if self.tls.enabled {
            let (connector, name) = self.tls.get_tls().connector(&self.tls.server_name)?;
            debug!("TLS 핸드셰이크 시작: {}", self.address);
            let tls = tokio::select! {
                res = connector.connect(name, stream) => res?,
                _ = &mut ctx => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "handshake canceled",
                    )));
                }
            };
            ClientStream::Tls(Box::new(tls))
        } else {
            ClientStream::Plain(stream)
        };

        info!("SIO TCP client connected to {}", self.address);
        self.stream = Some(stream);
        self.fct_info(&local, &self.address.clone(), ConnState::New);

        Ok(())
    }

    /// 연결된 스트림에서 읽기
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let n = stream.read(buf).await?;
        Ok(n)
    }

    /// 연결된 스트림에 전체 기록
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(buf).await?;
        stream.flush().await?;
        Ok(buf.len())
    }

    /// 연결 종료 (멱등)
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            self.fct_info("", &self.address.clone(), ConnState::Close);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigTls, ServerConfig};
    use crate::server::tcp::ServerTcp;
    use crate::server::{Reader, Writer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::sleep;

    fn client_config(addr: &str) -> ClientConfig {
        ClientConfig {
            network: NetworkProtocol::Tcp,
            address: addr.to_string(),
            tls: ConfigTls::default(),
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
    async fn test_read_write_before_connect() {
        let mut cli = ClientTcp::new(&client_config("127.0.0.1:1"));
        assert!(!cli.is_connected());

        let mut buf = [0u8; 4];
        assert!(matches!(cli.read(&mut buf).await, Err(Error::NotConnected)));
        assert!(matches!(cli.write(b"x").await, Err(Error::NotConnected)));

        // 미연결 close는 조용히 성공
        cli.close().await.unwrap();
        cli.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_client_echo() {
        let srv = Arc::new(ServerTcp::new(&ServerConfig {
            network: NetworkProtocol::Tcp,
            address: "127.0.0.1:0".to_string(),
            tls: ConfigTls::default(),
            ..Default::default()
        }));
        srv.register_handler(Box::new(|mut rd: Reader, mut wr: Writer| {
            Box::pin(async move {
                let mut buf = [0u8; 256];
                while let Ok(n) = rd.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    if wr.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            })
        }));

        let s = srv.clone();
        let jh = tokio::spawn(async move { s.listen(std::future::pending::<()>()).await });
        assert!(wait_until(|| srv.is_running(), Duration::from_secs(2)).await);

        let addr = srv.local_addr().unwrap();

        let states = Arc::new(AtomicUsize::new(0));
        let sc = states.clone();

        let mut cli = ClientTcp::new(&client_config(&addr));
        cli.register_func_info(Box::new(move |_l, _r, _s| {
            sc.fetch_add(1, Ordering::SeqCst);
        }));

        cli.connect(std::future::pending::<()>()).await.unwrap();
        assert!(cli.is_connected());
        // Dial + New
        assert!(states.load(Ordering::SeqCst) >= 2);

        cli.write(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            let n = cli.read(&mut buf[got..]).await.unwrap();
            assert!(n > 0);
            got += n;
        }
        assert_eq!(&buf, b"ping");

        cli.close().await.unwrap();
        assert!(!cli.is_connected());
        cli.close().await.unwrap();

        srv.close().unwrap();
        jh.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_canceled_before_resolve() {
        // 이미 완료된 ctx는 주소 해석 전에 연결을 중단시킨다
        let mut cli = ClientTcp::new(&client_config("localhost:1"));
        let res = cli.connect(std::future::ready(())).await;

        match res {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::Interrupted),
            other => panic!("취소 에러가 기대됨: {:?}", other),
        }
        assert!(!cli.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        // 예약 포트 1번은 연결 거부가 기대된다
        let errs = Arc::new(AtomicUsize::new(0));
        let ec = errs.clone();

        let mut cli = ClientTcp::new(&client_config("127.0.0.1:1"));
        cli.register_func_error(Box::new(move |_e| {
            ec.fetch_add(1, Ordering::SeqCst);
        }));

        let res = cli.connect(std::future::pending::<()>()).await;
        assert!(res.is_err());
        assert!(!cli.is_connected());
        assert_eq!(errs.load(Ordering::SeqCst), 1);
    }
}
