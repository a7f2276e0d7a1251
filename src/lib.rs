//! # mpsched
//!
//! 멀티패스 스케줄러 평가 도구
//!
//! ## 핵심 특징
//! - **경로 텔레메트리**: RTT 기록, 지터, 송신률 기반 대역폭 추정
//! - **네 가지 정책**: min-RTT, 가중 라운드로빈, 중복 전송, 비용 기반 예측
//! - **디스패처**: 단위마다 정책 결정 → 전송 → 텔레메트리 갱신 → 결정 기록
//! - **결정 로그**: `runs/<policy>/client_log.json`으로 오프라인 분석용 저장
//! - **피어**: ACK 응답 + `runs/<policy>/server_log.json` 수신 기록

pub mod config;
pub mod decision_log;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod peer;
pub mod policy;
pub mod stats;
pub mod transport;

pub use config::{CostWeights, PolicyKind, SchedulerConfig};
pub use decision_log::{DecisionLog, DecisionRecord, PathSample};
pub use dispatcher::{Dispatcher, DispatcherState, PathSpec, RunSummary, StopHandle};
pub use error::{Error, Result};
pub use peer::{Peer, ReceiptRecord};
pub use policy::{build_policy, Decision, PathView, SchedulingPolicy};
pub use stats::{PathMonitor, PathTelemetry};
pub use transport::{RttCallback, StreamId, TransportAdapter, UdpTransport};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 매직 넘버 (패킷 식별용)
pub const MAGIC_NUMBER: u32 = 0x4D505343; // "MPSC"

/// 기본 포트
pub const DEFAULT_PORT: u16 = 4443;

/// 기본 데이터 단위 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// 기본 전송 단위 수
pub const DEFAULT_TOTAL_UNITS: u64 = 500;

/// RTT 샘플이 없을 때의 평균 RTT (초)
pub const DEFAULT_RTT_SECS: f64 = 0.03;

/// 대역폭 추정 하한 (bytes/sec)
pub const BANDWIDTH_FLOOR: f64 = 1.0;

/// 스케줄러 컨트롤 헤더 접두사
pub const CONTROL_PREFIX: &str = "SCHED:";

/// 피어 ACK 페이로드
pub const ACK_PAYLOAD: &[u8] = b"ACK";

/// 전송되지 못한 단위의 경로 라벨
pub const NO_PATH_LABEL: &str = "-";

/// 헤더를 받기 전 피어의 정책 이름
pub const UNKNOWN_POLICY: &str = "unknown";

/// 클라이언트 결정 로그 파일 이름
pub const CLIENT_LOG_FILE: &str = "client_log.json";

/// 피어 수신 로그 파일 이름
pub const SERVER_LOG_FILE: &str = "server_log.json";
