//! mpsched 클라이언트 - 멀티패스 스케줄러 실행
//!
//! 선택한 정책으로 데이터 단위를 여러 경로에 분배하고 결정 로그를 남긴다.
//!
//! 사용법:
//!   cargo run --release --bin mpsched-client -- <minrtt|wrr|redundant|predict> [OPTIONS]
//!
//! 예시:
//!   # 기본 두 경로 (10.0.1.1 -> 10.0.1.2, 10.0.2.1 -> 10.0.2.2)
//!   cargo run --release --bin mpsched-client -- predict
//!
//!   # 로컬 테스트
//!   cargo run --release --bin mpsched-client -- wrr \
//!       --path A=127.0.0.1:0,127.0.0.1:4443 --path B=127.0.0.1:0,127.0.0.1:4444

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mpsched::{Dispatcher, PathSpec, PolicyKind, SchedulerConfig, UdpTransport, DEFAULT_PORT};

const USAGE: &str = r#"mpsched 클라이언트 - 멀티패스 스케줄러

사용법:
  mpsched-client <minrtt|wrr|redundant|predict> [OPTIONS]

옵션:
  --path <L=LOCAL,REMOTE>  경로 선언 (반복 가능, 기본: A/B 두 경로)
  --units <N>              전송할 데이터 단위 수 (기본: 500)
  --chunk-size <BYTES>     단위 페이로드 크기 (기본: 500)
  --alpha <F>              지터 가중치 (기본: 0.5)
  --beta <F>               역대역폭 가중치 (기본: 0.8)
  --gamma <F>              재정렬 패널티 가중치 (기본: 1.2)
  --preset <NAME>          low-latency | high-throughput
  --out <DIR>              로그 루트 디렉토리 (기본: runs)
  -h, --help               이 도움말 출력
"#;

/// 클라이언트 실행 인자
struct ClientArgs {
    config: SchedulerConfig,
    paths: Vec<PathSpec>,
}

fn default_paths() -> Vec<PathSpec> {
    let path = |label: &str, local: [u8; 4], remote: [u8; 4]| {
        PathSpec::new(
            label,
            SocketAddr::from((local, 0)),
            SocketAddr::from((remote, DEFAULT_PORT)),
        )
    };
    vec![
        path("A", [10, 0, 1, 1], [10, 0, 1, 2]),
        path("B", [10, 0, 2, 1], [10, 0, 2, 2]),
    ]
}

/// `A=10.0.1.1:0,10.0.1.2:4443`
fn parse_path(value: &str) -> Result<PathSpec, String> {
    let (label, addrs) = value
        .split_once('=')
        .ok_or_else(|| format!("경로 형식 오류: {value}"))?;
    let (local, remote) = addrs
        .split_once(',')
        .ok_or_else(|| format!("경로 형식 오류: {value}"))?;

    let local: SocketAddr = local.parse().map_err(|_| format!("유효한 주소 필요: {local}"))?;
    let remote: SocketAddr = remote.parse().map_err(|_| format!("유효한 주소 필요: {remote}"))?;
    Ok(PathSpec::new(label, local, remote))
}

fn parse_num<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} 값 필요"))?;
    value
        .parse()
        .map_err(|_| format!("{flag}: 유효한 숫자 필요: {value}"))
}

/// 옵션 위치와 관계없이 preset을 먼저 적용해 개별 옵션이 덮어쓰게 한다
fn base_config(policy: PolicyKind, args: &[String]) -> Result<SchedulerConfig, String> {
    let preset = args
        .chunks(2)
        .filter(|pair| pair[0] == "--preset")
        .last()
        .map(|pair| pair.get(1).map(String::as_str));

    match preset {
        None => Ok(SchedulerConfig::new(policy)),
        Some(Some("low-latency")) => Ok(SchedulerConfig::low_latency(policy)),
        Some(Some("high-throughput")) => Ok(SchedulerConfig::high_throughput(policy)),
        Some(other) => Err(format!("알 수 없는 preset: {other:?}")),
    }
}

fn parse_args(args: &[String]) -> Result<ClientArgs, String> {
    let policy: PolicyKind = args
        .first()
        .ok_or("스케줄러 이름 필요")?
        .parse()
        .map_err(|e: mpsched::Error| e.to_string())?;

    let mut config = base_config(policy, &args[1..])?;
    let mut paths = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args.get(i + 1);
        match flag {
            "--path" => paths.push(parse_path(value.ok_or("--path 값 필요")?)?),
            "--units" => config.total_units = parse_num(flag, value)?,
            "--chunk-size" => config.chunk_size = parse_num(flag, value)?,
            "--alpha" => config.weights.alpha = parse_num(flag, value)?,
            "--beta" => config.weights.beta = parse_num(flag, value)?,
            "--gamma" => config.weights.gamma = parse_num(flag, value)?,
            "--out" => {
                config.output_root = PathBuf::from(value.ok_or("--out 값 필요")?);
            }
            "--preset" => {}
            _ => return Err(format!("알 수 없는 옵션: {flag}")),
        }
        i += 2;
    }

    if paths.is_empty() {
        paths = default_paths();
    }

    Ok(ClientArgs { config, paths })
}

async fn run(args: ClientArgs) -> mpsched::Result<()> {
    info!("*** Starting scheduler: {}", args.config.policy);

    let mut dispatcher = Dispatcher::connect(args.config, UdpTransport::new(), &args.paths).await?;

    let stop = dispatcher.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("종료 요청 수신");
            stop.stop();
        }
    });

    let summary = dispatcher.run().await?;
    for (label, units) in &summary.units_per_path {
        info!("  path {}: {} units", label, units);
    }
    info!(
        "*** Done - {} units ({} failed), wrote {:?}",
        summary.units, summary.failed_units, summary.log_path
    );
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

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_explicit_flags_override_preset() {
        let parsed = parse_args(&args(&[
            "predict", "--alpha", "0.9", "--units", "42", "--preset", "high-throughput", "--out", "x",
        ]))
        .unwrap();
        let preset = SchedulerConfig::high_throughput(PolicyKind::Predictive);

        assert_eq!(parsed.config.weights.alpha, 0.9);
        assert_eq!(parsed.config.total_units, 42);
        assert_eq!(parsed.config.weights.beta, preset.weights.beta);
        assert_eq!(parsed.config.chunk_size, preset.chunk_size);
        assert_eq!(parsed.config.output_root, PathBuf::from("x"));
    }

    #[test]
    fn test_preset_and_path_parsing() {
        let parsed = parse_args(&args(&["wrr", "--preset", "low-latency"])).unwrap();
        assert_eq!(parsed.config.chunk_size, SchedulerConfig::low_latency(PolicyKind::WeightedRoundRobin).chunk_size);
        assert_eq!(parsed.paths, default_paths());

        let parsed = parse_args(&args(&["minrtt", "--path", "C=127.0.0.1:0,127.0.0.1:4443"])).unwrap();
        assert_eq!(parsed.paths.len(), 1);
        assert_eq!(parsed.paths[0].label, "C");

        assert!(parse_args(&args(&["wrr", "--preset", "fast"])).is_err());
        assert!(parse_args(&args(&["fastest"])).is_err());
    }
}
