//! 디스패처 (송신측)
//!
//! - 경로 연결 및 `SCHED:<policy>` 컨트롤 핸드쉐이크
//! - 데이터 단위마다 정책 결정 → 전송 → 텔레메트리 갱신 → 결정 기록
//! - 종료 시 결정 로그 저장

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::{PolicyKind, SchedulerConfig};
use crate::decision_log::{DecisionLog, DecisionRecord, PathSample};
use crate::policy::{build_policy, PathView, SchedulingPolicy};
use crate::stats::{PathMonitor, PathTelemetry};
use crate::transport::{StreamId, TransportAdapter};
use crate::{Error, Result, CONTROL_PREFIX, NO_PATH_LABEL};

/// 경로 선언 (라벨, 로컬 주소, 원격 주소)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub label: String,
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl PathSpec {
    pub fn new(label: impl Into<String>, local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            label: label.into(),
            local,
            remote,
        }
    }
}

/// 디스패처 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Stopped,
}

/// 세션 종료 요청 핸들
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 경로 하나의 디스패처측 상태
struct PathSlot<H> {
    label: String,
    handle: H,
    stream: StreamId,
    monitor: Arc<PathMonitor>,

    /// 마지막으로 배정된 시퀀스 번호 (-1 = 없음)
    last_seq: i64,

    /// WRR deficit 카운터
    deficit: i64,

    consecutive_failures: u32,

    /// 연속 실패로 선택 대상에서 제외됨
    failed: bool,

    /// 데이터 단위 전송 성공 횟수
    units_sent: u64,
}

/// 외부에서 보는 경로 상태
#[derive(Debug, Clone, PartialEq)]
pub struct PathStatus {
    pub label: String,
    pub last_seq: i64,
    pub deficit: i64,
    pub failed: bool,
    pub units_sent: u64,
    pub telemetry: PathTelemetry,
}

/// 한 단계 결과
#[derive(Debug)]
pub struct StepOutcome {
    pub seq: u64,

    /// 기록된 경로 라벨
    pub label: String,

    /// 이 단계에서 발생한 단위별 에러 (전송 실패, 경로 없음)
    pub errors: Vec<Error>,
}

/// 세션 요약
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub policy: PolicyKind,
    pub units: u64,
    pub failed_units: u64,
    /// 경로 라벨별 전송 성공 횟수
    pub units_per_path: Vec<(String, u64)>,
    pub log_path: PathBuf,
}

/// 세션 컨텍스트 (시퀀스 번호 + 결정 로그)
#[derive(Debug, Default)]
struct Session {
    next_seq: u64,
    failed_units: u64,
    log: DecisionLog,
}

/// 디스패처
pub struct Dispatcher<T: TransportAdapter> {
    config: SchedulerConfig,
    transport: T,
    policy: Box<dyn SchedulingPolicy>,
    paths: Vec<PathSlot<T::Handle>>,
    session: Session,
    state: DispatcherState,
    stop: StopHandle,
    payload: Bytes,
}

/// 현재 Unix 시각 (초)
fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn validate_labels(specs: &[PathSpec]) -> Result<()> {
    for (i, spec) in specs.iter().enumerate() {
        if spec.label.is_empty() || spec.label == NO_PATH_LABEL || spec.label.contains('+') {
            return Err(Error::Config {
                reason: format!("사용할 수 없는 경로 라벨: {:?}", spec.label),
            });
        }
        if specs[..i].iter().any(|s| s.label == spec.label) {
            return Err(Error::Config {
                reason: format!("중복된 경로 라벨: {}", spec.label),
            });
        }
    }
    Ok(())
}

impl<T: TransportAdapter> Dispatcher<T> {
    /// 경로 연결 + 핸드쉐이크
    ///
    /// 일부 경로 연결이 실패해도 하나 이상 남으면 계속 진행한다.
    pub async fn connect(config: SchedulerConfig, transport: T, specs: &[PathSpec]) -> Result<Self> {
        config.validate()?;
        validate_labels(specs)?;

        let mut paths = Vec::with_capacity(specs.len());
        for spec in specs {
            let handle = match transport.establish(spec.local, spec.remote).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(path = %spec.label, "경로 연결 실패: {}", e);
                    continue;
                }
            };

            let stream = match transport.open_stream(&handle) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(path = %spec.label, "스트림 생성 실패: {}", e);
                    continue;
                }
            };

            let monitor = Arc::new(PathMonitor::new());
            let sink = monitor.clone();
            transport.on_rtt_sample(&handle, Arc::new(move |rtt| sink.record_rtt_sample(rtt)));

            info!(path = %spec.label, "경로 연결: {} -> {}", spec.local, spec.remote);
            paths.push(PathSlot {
                label: spec.label.clone(),
                handle,
                stream,
                monitor,
                last_seq: -1,
                deficit: 0,
                consecutive_failures: 0,
                failed: false,
                units_sent: 0,
            });
        }

        if paths.is_empty() {
            return Err(Error::Connection {
                path: specs
                    .iter()
                    .map(|s| s.label.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: "연결된 경로 없음".into(),
            });
        }

        let mut dispatcher = Self {
            policy: build_policy(&config),
            payload: Bytes::from(vec![b'x'; config.chunk_size]),
            config,
            transport,
            paths,
            session: Session::default(),
            state: DispatcherState::Running,
            stop: StopHandle::default(),
        };
        dispatcher.handshake().await?;
        Ok(dispatcher)
    }

    /// 모든 경로에 `SCHED:<policy>` 전송
    ///
    /// 헤더를 보내지 못한 경로는 피어가 트래픽을 정책에 귀속시킬 수 없으므로 제외한다.
    async fn handshake(&mut self) -> Result<()> {
        let header = Bytes::from(format!("{}{}", CONTROL_PREFIX, self.config.policy.name()));

        for slot in self.paths.iter_mut() {
            if let Err(e) = self.transport.send(&slot.handle, slot.stream, header.clone()).await {
                warn!(path = %slot.label, "스케줄러 헤더 전송 실패: {}", e);
                slot.failed = true;
            }
        }

        if self.paths.iter().all(|p| p.failed) {
            return Err(Error::Connection {
                path: self.labels().join(","),
                reason: "스케줄러 헤더를 보낼 수 있는 경로 없음".into(),
            });
        }

        info!(policy = %self.config.policy, "스케줄러 헤더 전송 완료");
        Ok(())
    }

    /// 종료 요청 핸들
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 다음에 배정할 시퀀스 번호
    pub fn next_seq(&self) -> u64 {
        self.session.next_seq
    }

    pub fn log(&self) -> &DecisionLog {
        &self.session.log
    }

    /// 연결된 경로 라벨 (선언 순서)
    pub fn labels(&self) -> Vec<String> {
        self.paths.iter().map(|p| p.label.clone()).collect()
    }

    /// 경로 모니터 (전송 계층 밖에서 RTT 샘플을 넣을 때)
    pub fn monitor(&self, label: &str) -> Option<Arc<PathMonitor>> {
        self.paths
            .iter()
            .find(|p| p.label == label)
            .map(|p| p.monitor.clone())
    }

    pub fn path_status(&self) -> Vec<PathStatus> {
        self.paths
            .iter()
            .map(|p| PathStatus {
                label: p.label.clone(),
                last_seq: p.last_seq,
                deficit: p.deficit,
                failed: p.failed,
                units_sent: p.units_sent,
                telemetry: p.monitor.snapshot(),
            })
            .collect()
    }

    /// 다음 단위를 보낼 수 있는지 여부
    ///
    /// STOPPED 이후, 총 단위 수 도달 후, 로그 저장 후에는 더 보내지 않는다.
    fn can_step(&self) -> bool {
        self.state == DispatcherState::Running
            && self.session.next_seq < self.config.total_units
            && !self.session.log.is_flushed()
    }

    /// 데이터 단위 하나 처리
    ///
    /// 더 보낼 수 없으면 아무것도 전송하지 않고 `None`.
    pub async fn step(&mut self) -> Option<StepOutcome> {
        if !self.can_step() {
            debug!(seq = self.session.next_seq, state = ?self.state, "단위 전송 거부");
            return None;
        }

        let seq = self.session.next_seq;
        let mut errors = Vec::new();

        // 경로마다 한 번만 스냅샷을 떠서 정책 입력과 기록에 같이 쓴다
        let snapshots: Vec<PathTelemetry> = self.paths.iter().map(|p| p.monitor.snapshot()).collect();
        let views: Vec<PathView> = self
            .paths
            .iter()
            .zip(&snapshots)
            .enumerate()
            .filter(|(_, (slot, _))| !slot.failed)
            .map(|(index, (slot, telemetry))| PathView {
                index,
                telemetry: *telemetry,
                last_seq: slot.last_seq,
                deficit: slot.deficit,
            })
            .collect();

        let delivered = match self.policy.decide(seq, &views) {
            Ok(decision) => {
                for (index, deficit) in &decision.deficits {
                    self.paths[*index].deficit = *deficit;
                }
                self.transmit(seq, &decision.targets, &mut errors).await
            }
            Err(e) => {
                warn!(policy = %self.config.policy, seq, "경로 선택 실패: {}", e);
                errors.push(e);
                Vec::new()
            }
        };

        let label = if delivered.is_empty() {
            self.session.failed_units += 1;
            NO_PATH_LABEL.to_string()
        } else {
            delivered
                .iter()
                .map(|&i| self.paths[i].label.as_str())
                .collect::<Vec<_>>()
                .join("+")
        };

        let samples = self
            .paths
            .iter()
            .zip(&snapshots)
            .map(|(slot, t)| PathSample {
                label: slot.label.clone(),
                rtt: t.rtt,
                jitter: t.jitter,
                bandwidth: t.bandwidth,
            })
            .collect();

        if let Err(e) = self.session.log.append(DecisionRecord {
            seq,
            path: label.clone(),
            samples,
            time: unix_time(),
        }) {
            warn!("{}", e);
            errors.push(e);
        }
        self.session.next_seq += 1;

        debug!(seq, path = %label, "단위 전송");
        Some(StepOutcome { seq, label, errors })
    }

    /// 대상 경로로 같은 시퀀스 번호의 페이로드 전송, 성공한 경로 인덱스 반환
    async fn transmit(&mut self, seq: u64, targets: &[usize], errors: &mut Vec<Error>) -> Vec<usize> {
        let mut delivered = Vec::with_capacity(targets.len());

        for &index in targets {
            let slot = &mut self.paths[index];
            match self
                .transport
                .send(&slot.handle, slot.stream, self.payload.clone())
                .await
            {
                Ok(()) => {
                    slot.monitor.record_send(self.payload.len(), unix_time());
                    slot.last_seq = slot.last_seq.max(seq as i64);
                    slot.consecutive_failures = 0;
                    slot.units_sent += 1;
                    delivered.push(index);
                }
                Err(e) => {
                    let err = Error::Transport {
                        path: slot.label.clone(),
                        seq,
                        reason: e.to_string(),
                    };
                    warn!("{}", err);

                    slot.consecutive_failures += 1;
                    if slot.consecutive_failures >= self.config.max_consecutive_failures && !slot.failed {
                        slot.failed = true;
                        warn!(
                            path = %slot.label,
                            "연속 {}회 전송 실패, 경로 제외",
                            slot.consecutive_failures
                        );
                    }
                    errors.push(err);
                }
            }
        }

        delivered
    }

    fn all_paths_failed(&self) -> bool {
        self.paths.iter().all(|p| p.failed)
    }

    /// 총 단위 수에 도달하거나 종료 요청/전 경로 실패까지 전송 후 로그 저장
    pub async fn run(&mut self) -> Result<RunSummary> {
        info!(
            policy = %self.config.policy,
            paths = self.paths.len(),
            units = self.config.total_units,
            "디스패치 시작"
        );

        while self.state == DispatcherState::Running {
            if self.stop.is_stopped() {
                info!(seq = self.session.next_seq, "종료 요청, 디스패치 중단");
                self.state = DispatcherState::Stopped;
                break;
            }

            if self.step().await.is_none() {
                self.state = DispatcherState::Stopped;
                break;
            }

            if self.all_paths_failed() {
                warn!(seq = self.session.next_seq, "모든 경로 실패, 디스패치 중단");
                self.state = DispatcherState::Stopped;
                break;
            }

            // 스케줄링 지점: RTT 콜백과 다른 경로 I/O 처리 기회
            tokio::task::yield_now().await;
        }

        let log_path = self.flush()?;
        let summary = self.summary(log_path);
        info!(
            policy = %summary.policy,
            units = summary.units,
            failed = summary.failed_units,
            "디스패치 종료"
        );
        Ok(summary)
    }

    /// 결정 로그 저장 (`<root>/<policy>/client_log.json`)
    ///
    /// 실패해도 메모리 로그는 남으므로 다시 호출할 수 있다.
    pub fn flush(&mut self) -> Result<PathBuf> {
        let path = self.config.client_log_path();
        self.session.log.flush(&path)?;
        Ok(path)
    }

    fn summary(&self, log_path: PathBuf) -> RunSummary {
        RunSummary {
            policy: self.config.policy,
            units: self.session.next_seq,
            failed_units: self.session.failed_units,
            units_per_path: self
                .paths
                .iter()
                .map(|p| (p.label.clone(), p.units_sent))
                .collect(),
            log_path,
        }
    }
}
