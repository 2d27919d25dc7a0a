//! UDP 클라이언트
//!
//! - connect()는 로컬 임시 포트 바인드 + 원격 주소 고정
//! - once()는 connect-send-close 단발 전송, 패킷 손실은 정상
//! - read()는 고정된 원격에서 온 데이터그램 하나를 돌려준다

use std::future::Future;
use std::io;

use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::callback::{ConnState, FuncError, FuncInfo, Slot};
use crate::config::{resolve_addr, ClientConfig};
use crate::error::{Error, Result};
use crate::protocol::NetworkProtocol;

/// UDP 클라이언트
pub struct ClientUdp {
    network: NetworkProtocol,
    address: String,
    socket: Option<UdpSocket>,
    fe: Slot<FuncError>,
    fi: Slot<FuncInfo>,
}

impl ClientUdp {
    pub fn new(cfg: &ClientConfig) -> Self {
        Self {
            network: cfg.network,
            address: cfg.address.clone(),
            socket: None,
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
        self.socket.is_some()
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

    /// 원격 주소 고정 (ctx 완료 시 중단)
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

        let addr = tokio::select! {
            res = resolve_addr(self.network, &self.address) => res?,
            _ = &mut ctx => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "connect canceled",
                )));
            }
        };

        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(addr).await?;

        let local = socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();

        debug!("SIO UDP client bound on {} for {}", local, self.address);
        self.socket = Some(socket);
        self.fct_info(&local, &self.address.clone(), ConnState::New);

        Ok(())
    }

    /// 고정된 원격에서 데이터그램 하나 수신
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        let n = socket.recv(buf).await?;
        Ok(n)
    }

    /// 데이터그램 하나 전송
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        let n = socket.send(buf).await?;
        Ok(n)
    }

    /// 소켓 해제 (멱등)
    pub async fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            self.fct_info("", &self.address.clone(), ConnState::Close);
        }
        Ok(())
    }

    /// 단발 전송: connect-send-close
    ///
    /// 전송 실패는 FuncError로 보고만 하고 성공으로 취급한다
    /// (데이터그램 손실 계약).
    pub async fn once<F>(&mut self, ctx: F, data: &[u8]) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.connect(ctx).await?;

        if let Err(e) = self.write(data).await {
            info!("단발 전송 실패 (무시): {}", e);
            self.fct_error(&e);
        }

        self.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTls;

    fn client_config(addr: &str) -> ClientConfig {
        ClientConfig {
            network: NetworkProtocol::Udp,
            address: addr.to_string(),
            tls: ConfigTls::default(),
        }
    }

    #[tokio::test]
    async fn test_read_write_before_connect() {
        let mut cli = ClientUdp::new(&client_config("127.0.0.1:9"));
        assert!(!cli.is_connected());

        let mut buf = [0u8; 4];
        assert!(matches!(cli.read(&mut buf).await, Err(Error::NotConnected)));
        assert!(matches!(cli.write(b"x").await, Err(Error::NotConnected)));

        cli.close().await.unwrap();
        cli.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_roundtrip_with_peer_socket() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = peer.local_addr().unwrap().to_string();

        let mut cli = ClientUdp::new(&client_config(&addr));
        cli.connect(std::future::pending::<()>()).await.unwrap();
        assert!(cli.is_connected());

        cli.write(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        peer.send_to(b"world", from).await.unwrap();
        let n = cli.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");

        cli.close().await.unwrap();
        assert!(!cli.is_connected());
    }

    #[tokio::test]
    async fn test_once_is_fire_and_forget() {
        // 수신자 없는 주소로도 once는 성공해야 한다
        let mut cli = ClientUdp::new(&client_config("127.0.0.1:9"));
        cli.once(std::future::pending::<()>(), b"lost").await.unwrap();
        assert!(!cli.is_connected());
    }
}
