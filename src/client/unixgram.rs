//! 유닉스 데이터그램 클라이언트
//!
//! - 이름 없는 소켓으로 보내므로 서버 응답은 받을 수 없다
//! - read()가 필요하면 자체 경로에 바인드된 소켓을 직접 쓸 것
//! - once()는 UDP와 같은 단발 전송 계약

use std::future::Future;
use std::io;
use std::path::PathBuf;

use tokio::net::UnixDatagram;
use tracing::info;

use crate::callback::{ConnState, FuncError, FuncInfo, Slot};
use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// 유닉스 데이터그램 클라이언트 (송신 전용)
pub struct ClientUnixgram {
    path: PathBuf,
    socket: Option<UnixDatagram>,
    fe: Slot<FuncError>,
    fi: Slot<FuncInfo>,
}

impl ClientUnixgram {
    pub fn new(cfg: &ClientConfig) -> Self {
        Self {
            path: PathBuf::from(&cfg.address),
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

    /// 이름 없는 소켓 생성 + 대상 경로 고정 (ctx 완료 시 중단)
    pub async fn connect<F>(&mut self, ctx: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.path.to_string_lossy().into_owned();
        self.fct_info("", &addr, ConnState::Dial);

        tokio::pin!(ctx);

        let res = tokio::select! {
            res = async {
                let socket = UnixDatagram::unbound()?;
                socket.connect(&self.path)?;
                Ok::<_, io::Error>(socket)
            } => res.map_err(Error::from),
            _ = &mut ctx => {
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "connect canceled",
                )))
            }
        };

        match res {
            Ok(socket) => {
                self.socket = Some(socket);
                self.fct_info("", &addr, ConnState::New);
                Ok(())
            }
            Err(e) => {
                self.fct_error(&e);
                Err(e)
            }
        }
    }

    /// 송신 전용 소켓이므로 항상 NotConnected
    pub async fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::NotConnected)
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
            let addr = self.path.to_string_lossy().into_owned();
            self.fct_info("", &addr, ConnState::Close);
        }
        Ok(())
    }

    /// 단발 전송: connect-send-close
    ///
    /// 전송 실패는 FuncError로 보고만 하고 성공으로 취급한다.
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
