//! 유닉스 도메인 스트림 클라이언트
//!
//! - TCP 클라이언트와 같은 수명주기, TLS 없음
//! - 주소는 파일시스템 경로

use std::future::Future;
use std::io;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::info;

use crate::callback::{ConnState, FuncError, FuncInfo, Slot};
use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// 유닉스 스트림 클라이언트
pub struct ClientUnix {
    path: PathBuf,
    stream: Option<UnixStream>,
    fe: Slot<FuncError>,
    fi: Slot<FuncInfo>,
}

impl ClientUnix {
    pub fn new(cfg: &ClientConfig) -> Self {
        Self {
            path: PathBuf::from(&cfg.address),
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

    /// 소켓 파일로 연결 (ctx 완료 시 중단)
    pub async fn connect<F>(&mut self, ctx: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.path.to_string_lossy().into_owned();
        self.fct_info("", &addr, ConnState::Dial);

        tokio::pin!(ctx);

        let res = tokio::select! {
            res = UnixStream::connect(&self.path) => res.map_err(Error::from),
            _ = &mut ctx => {
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "connect canceled",
                )))
            }
        };

        match res {
            Ok(stream) => {
                info!("SIO Unix client connected to {}", self.path.display());
                self.stream = Some(stream);
                self.fct_info("", &addr, ConnState::New);
                Ok(())
            }
            Err(e) => {
                self.fct_error(&e);
                Err(e)
            }
        }
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
            let addr = self.path.to_string_lossy().into_owned();
            self.fct_info("", &addr, ConnState::Close);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigTls, ServerConfig};
    use crate::protocol::NetworkProtocol;
    use crate::server::unix::ServerUnix;
    use crate::server::{Reader, Writer};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::sleep;

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
    async fn test_connect_missing_socket_fails() {
        let mut cli = ClientUnix::new(&ClientConfig {
            network: NetworkProtocol::Unix,
            address: "/tmp/sio-no-such-socket.sock".to_string(),
            tls: ConfigTls::default(),
        });

        assert!(cli.connect(std::future::pending::<()>()).await.is_err());
        assert!(!cli.is_connected());
    }

    #[tokio::test]
    async fn test_unix_client_echo() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("cli.sock");

        let srv = Arc::new(ServerUnix::new(&ServerConfig {
            network: NetworkProtocol::Unix,
            address: sock.to_string_lossy().into_owned(),
            tls: ConfigTls::default(),
            perm_file: 0o660,
            group_perm: -1,
            con_idle_timeout_ms: 0,
        }));
        srv.register_handler(Box::new(|mut rd: Reader, mut wr: Writer| {
            Box::pin(async move {
                let mut buf = [0u8; 64];
                if let Ok(n) = rd.read(&mut buf).await {
                    let _ = wr.write_all(&buf[..n]).await;
                }
                let _ = wr.shutdown().await;
            })
        }));

        let s = srv.clone();
        let jh = tokio::spawn(async move { s.listen(std::future::pending::<()>()).await });
        assert!(wait_until(|| srv.is_running(), Duration::from_secs(2)).await);

        let mut cli = ClientUnix::new(&ClientConfig {
            network: NetworkProtocol::Unix,
            address: sock.to_string_lossy().into_owned(),
            tls: ConfigTls::default(),
        });

        cli.connect(std::future::pending::<()>()).await.unwrap();
        cli.write(b"sock").await.unwrap();

        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            let n = cli.read(&mut buf[got..]).await.unwrap();
            assert!(n > 0);
            got += n;
        }
        assert_eq!(&buf, b"sock");

        cli.close().await.unwrap();
        srv.close().unwrap();
        jh.await.unwrap().unwrap();
    }
}
