//! SIO 에코 서버 데모
//!
//! 지정한 프로토콜/주소로 수신을 시작하고 받은 데이터를 그대로 돌려준다.
//!
//! 사용법:
//!   cargo run --release --bin sio-server -- [OPTIONS]
//!
//! 예시:
//!   # TCP 에코
//!   cargo run --release --bin sio-server -- --network tcp --address 127.0.0.1:9000
//!
//!   # 유닉스 소켓 에코
//!   cargo run --release --bin sio-server -- -n unix -a /tmp/sio-echo.sock

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sio::callback::ConnState;
use sio::config::{ConfigTls, ServerConfig};
use sio::protocol::NetworkProtocol;
use sio::server::{Reader, Writer};

struct DemoConfig {
    network: NetworkProtocol,
    address: String,
    idle_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            network: NetworkProtocol::Tcp,
            address: "127.0.0.1:9000".to_string(),
            idle_ms: 0,
        }
    }
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--network" | "-n" => {
                if i + 1 < args.len() {
                    config.network = NetworkProtocol::parse(&args[i + 1]);
                    i += 1;
                }
            }
            "--address" | "-a" => {
                if i + 1 < args.len() {
                    config.address = args[i + 1].clone();
                    i += 1;
                }
            }
            "--idle" => {
                if i + 1 < args.len() {
                    config.idle_ms = args[i + 1].parse().unwrap_or(0);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("사용법: sio-server [OPTIONS]");
                println!("  -n, --network <PROTO>   tcp|tcp4|tcp6|udp|udp4|udp6|unix|unixgram");
                println!("  -a, --address <ADDR>    호스트:포트 또는 소켓 경로");
                println!("      --idle <MS>         유휴 타임아웃 (1000ms 이상일 때만 적용)");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let demo = parse_args();

    info!("SIO echo server starting...");
    info!("Network: {}", demo.network);
    info!("Address: {}", demo.address);

    let cfg = ServerConfig {
        network: demo.network,
        address: demo.address,
        tls: ConfigTls::default(),
        con_idle_timeout_ms: demo.idle_ms,
        ..Default::default()
    };

    let srv = cfg.server()?;

    srv.register_handler(Box::new(|mut rd: Reader, mut wr: Writer| {
        Box::pin(async move {
            let mut buf = [0u8; 32 * 1024];
            loop {
                match rd.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if wr.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = wr.shutdown().await;
        })
    }));

    srv.register_func_info(Box::new(|local, remote, state: ConnState| {
        info!("[{}] {} <-> {}", state, local, remote);
    }));

    srv.register_func_error(Box::new(|e| {
        tracing::warn!("연결 에러: {}", e);
    }));

    let srv = std::sync::Arc::new(srv);
    let s = srv.clone();
    let listen = tokio::spawn(async move { s.listen(std::future::pending::<()>()).await });

    tokio::signal::ctrl_c().await?;
    info!("종료 신호 수신, drain 시작...");

    if let Err(e) = srv.shutdown(Duration::from_secs(5)).await {
        tracing::warn!("drain 실패: {}", e);
        srv.close()?;
    }

    listen.await??;
    info!("SIO echo server stopped");

    Ok(())
}
