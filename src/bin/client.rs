//! SIO 에코 클라이언트 데모
//!
//! 서버에 연결해 메시지를 보내고 응답을 출력한다.
//! 데이터그램 프로토콜(-n udp/unixgram)에서는 단발 전송(once)도 지원.
//!
//! 사용법:
//!   cargo run --release --bin sio-client -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin sio-client -- -n tcp -a 127.0.0.1:9000 -m "hello"
//!   cargo run --release --bin sio-client -- -n udp -a 127.0.0.1:9000 -m "ping" --once

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sio::config::{ClientConfig, ConfigTls};
use sio::protocol::NetworkProtocol;

struct DemoConfig {
    network: NetworkProtocol,
    address: String,
    message: String,
    once: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            network: NetworkProtocol::Tcp,
            address: "127.0.0.1:9000".to_string(),
            message: "hello".to_string(),
            once: false,
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
            "--message" | "-m" => {
                if i + 1 < args.len() {
                    config.message = args[i + 1].clone();
                    i += 1;
                }
            }
            "--once" => {
                config.once = true;
            }
            "--help" | "-h" => {
                println!("사용법: sio-client [OPTIONS]");
                println!("  -n, --network <PROTO>   tcp|tcp4|tcp6|udp|udp4|udp6|unix|unixgram");
                println!("  -a, --address <ADDR>    호스트:포트 또는 소켓 경로");
                println!("  -m, --message <TEXT>    전송할 메시지");
                println!("      --once              단발 전송 (데이터그램 전용)");
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

    let cfg = ClientConfig {
        network: demo.network,
        address: demo.address,
        tls: ConfigTls::default(),
    };

    let mut cli = cfg.client()?;

    if demo.once {
        cli.once(std::future::pending::<()>(), demo.message.as_bytes())
            .await?;
        info!("단발 전송 완료 ({} bytes)", demo.message.len());
        return Ok(());
    }

    cli.connect(std::future::pending::<()>()).await?;
    info!("연결됨: {}", cfg.address);

    cli.write(demo.message.as_bytes()).await?;

    let mut buf = vec![0u8; 32 * 1024];
    let n = cli.read(&mut buf).await?;
    println!("{}", String::from_utf8_lossy(&buf[..n]));

    cli.close().await?;

    Ok(())
}
