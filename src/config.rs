//! 스케줄러 설정

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_TOTAL_UNITS};

/// 스케줄링 정책 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// 평균 RTT가 가장 작은 경로
    MinRtt,

    /// 대역폭 가중 deficit 라운드로빈
    WeightedRoundRobin,

    /// 모든 경로로 동일 데이터 중복 전송
    Redundant,

    /// RTT + 지터 + 역대역폭 + 재정렬 패널티 비용 기반
    Predictive,
}

impl PolicyKind {
    /// 커맨드라인/로그 디렉토리에서 쓰는 이름
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::MinRtt => "minrtt",
            PolicyKind::WeightedRoundRobin => "wrr",
            PolicyKind::Redundant => "redundant",
            PolicyKind::Predictive => "predict",
        }
    }

    /// 선택 가능한 모든 정책
    pub fn all() -> [PolicyKind; 4] {
        [
            PolicyKind::MinRtt,
            PolicyKind::WeightedRoundRobin,
            PolicyKind::Redundant,
            PolicyKind::Predictive,
        ]
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PolicyKind::all()
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownPolicy { name: s.to_string() })
    }
}

/// Predictive 정책의 비용 가중치
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// 지터 가중치 (α)
    pub alpha: f64,

    /// 역대역폭 가중치 (β)
    pub beta: f64,

    /// 재정렬 패널티 가중치 (γ)
    pub gamma: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.8,
            gamma: 1.2,
        }
    }
}

/// 스케줄러 세션 설정
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 사용할 스케줄링 정책
    pub policy: PolicyKind,

    /// Predictive 비용 가중치
    pub weights: CostWeights,

    /// 데이터 단위 페이로드 크기 (바이트)
    pub chunk_size: usize,

    /// 전송할 총 데이터 단위 수
    pub total_units: u64,

    /// WRR 가중치 1 단위에 해당하는 대역폭 (bytes/sec)
    pub wrr_base_unit: f64,

    /// 연속 전송 실패 허용 횟수
    /// 초과하면 해당 경로는 선택 대상에서 제외됨
    pub max_consecutive_failures: u32,

    /// 로그 루트 디렉토리 (`<root>/<policy>/client_log.json`)
    pub output_root: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Predictive,
            weights: CostWeights::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            total_units: DEFAULT_TOTAL_UNITS,
            wrr_base_unit: 1000.0,
            max_consecutive_failures: 3,
            output_root: PathBuf::from("runs"),
        }
    }
}

impl SchedulerConfig {
    /// 정책만 지정한 기본 설정
    pub fn new(policy: PolicyKind) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// 재정렬을 강하게 억제하는 설정
    pub fn low_latency(policy: PolicyKind) -> Self {
        Self {
            policy,
            weights: CostWeights {
                alpha: 1.0,
                beta: 0.4,
                gamma: 2.5,
            },
            chunk_size: 300,
            ..Self::default()
        }
    }

    /// 대역폭 항을 강조하는 설정
    pub fn high_throughput(policy: PolicyKind) -> Self {
        Self {
            policy,
            weights: CostWeights {
                alpha: 0.25,
                beta: 2.0,
                gamma: 0.6,
            },
            chunk_size: 1200,
            total_units: 2000,
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        let CostWeights { alpha, beta, gamma } = self.weights;
        for (name, value) in [("alpha", alpha), ("beta", beta), ("gamma", gamma)] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config {
                    reason: format!("{name} 가중치는 0 이상의 유한값이어야 함: {value}"),
                });
            }
        }

        if self.chunk_size == 0 {
            return Err(Error::Config {
                reason: "chunk_size는 0보다 커야 함".into(),
            });
        }

        if !self.wrr_base_unit.is_finite() || self.wrr_base_unit <= 0.0 {
            return Err(Error::Config {
                reason: format!("wrr_base_unit은 양수여야 함: {}", self.wrr_base_unit),
            });
        }

        if self.max_consecutive_failures == 0 {
            return Err(Error::Config {
                reason: "max_consecutive_failures는 1 이상이어야 함".into(),
            });
        }

        Ok(())
    }

    /// 정책별 로그 디렉토리
    pub fn run_dir(&self) -> PathBuf {
        self.output_root.join(self.policy.name())
    }

    /// 클라이언트 결정 로그 경로
    pub fn client_log_path(&self) -> PathBuf {
        self.run_dir().join(crate::CLIENT_LOG_FILE)
    }
}
