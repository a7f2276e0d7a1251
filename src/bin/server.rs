//! mpsched 피어 - 멀티패스 스케줄러 수신측
//!
//! - 데이터 프레임마다 ACK 응답 (클라이언트 RTT 측정용)
//! - `SCHED:<policy>` 헤더로 정책 식별
//! - Ctrl+C 시 `<out>/<policy>/server_log.json` 저장
//!
//! 사용법:
//!   cargo run --release --bin mpsched-peer -- [OPTIONS]
//!
//! 예시:
//!   # 모든 인터페이스에서 수신
//!   cargo run --release --bin mpsched-peer
//!
//!   # 경로별 주소 지정
//!   cargo run --release --bin mpsched-peer -- --bind 10.0.1.2:4443 --bind 10.0.2.2:4443

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mpsched::{Peer, DEFAULT_PORT};

const USAGE: &str = r#"mpsched 피어 - 멀티패스 스케줄러 수신측

사용법:
  mpsched-peer [OPTIONS]

옵션:
  -b, --bind <ADDR>   수신 주소 (반복 가능, 기본: 0.0.0.0:4443)
  --out <DIR>         로그 루트 디렉토리 (기본: runs)
  -h, --help          이 도움말 출력
"#;

/// 피어 설정
struct PeerArgs {
    bind_addrs: Vec<SocketAddr>,
    output_root: PathBuf,
}

fn parse_args(args: &[String]) -> Result<PeerArgs, String> {
    let mut bind_addrs: Vec<SocketAddr> = Vec::new();
    let mut output_root = PathBuf::from("runs");

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--bind" | "-b" => {
                let value = value.ok_or("--bind 값 필요")?;
                bind_addrs.push(value.parse().map_err(|_| format!("유효한 주소 필요: {value}"))?);
            }
            "--out" => output_root = PathBuf::from(value.ok_or("--out 값 필요")?),
            other => return Err(format!("알 수 없는 옵션: {other}")),
        }
        i += 2;
    }

    if bind_addrs.is_empty() {
        bind_addrs.push(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));
    }

    Ok(PeerArgs {
        bind_addrs,
        output_root,
    })
}

async fn run(args: PeerArgs) -> mpsched::Result<()> {
    let peer = Peer::bind(&args.bind_addrs).await?;
    info!("*** Starting peer on {:?}", peer.local_addrs()?);

    peer.serve(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("시그널 대기 실패: {}", e);
        }
    })
    .await;

    let path = peer.flush(&args.output_root)?;
    info!("*** Peer stopped, wrote {:?}", path);
    Ok(())
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("로깅 설정 실패: {e}");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{USAGE}");
        return;
    }

    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}\n\n{USAGE}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
