//! 경로별 텔레메트리
//!
//! RTT 기록, 지터, 송신률 기반 대역폭 추정.
//! 디스패처와 전송 계층 RTT 콜백이 동시에 갱신하므로 경로마다 락으로 보호한다.

use parking_lot::Mutex;

use crate::{BANDWIDTH_FLOOR, DEFAULT_RTT_SECS};

/// 락 내부 상태
#[derive(Debug, Clone, Default)]
struct PathStats {
    /// RTT 샘플 (초)
    rtt_samples: Vec<f64>,

    /// RTT 합계
    rtt_sum: f64,

    /// 연속 샘플 간 절대 차이 합계
    abs_diff_sum: f64,

    /// 총 송신 바이트
    bytes_sent: u64,

    /// 첫 송신 시각 (Unix 초)
    first_send: Option<f64>,

    /// 마지막 송신 시각 (Unix 초)
    last_send: Option<f64>,
}

impl PathStats {
    fn mean_rtt(&self) -> f64 {
        if self.rtt_samples.is_empty() {
            return DEFAULT_RTT_SECS;
        }
        self.rtt_sum / self.rtt_samples.len() as f64
    }

    fn mean_jitter(&self) -> f64 {
        if self.rtt_samples.len() < 2 {
            return 0.0;
        }
        self.abs_diff_sum / (self.rtt_samples.len() - 1) as f64
    }

    fn bandwidth(&self) -> f64 {
        let (Some(first), Some(last)) = (self.first_send, self.last_send) else {
            return BANDWIDTH_FLOOR;
        };

        let elapsed = last - first;
        if elapsed <= 0.0 {
            return BANDWIDTH_FLOOR;
        }

        (self.bytes_sent as f64 / elapsed).max(BANDWIDTH_FLOOR)
    }

    fn bandwidth_at(&self, now: f64) -> f64 {
        let Some(first) = self.first_send else {
            return BANDWIDTH_FLOOR;
        };

        let elapsed = now - first;
        if elapsed <= 0.0 {
            return BANDWIDTH_FLOOR;
        }

        (self.bytes_sent as f64 / elapsed).max(BANDWIDTH_FLOOR)
    }
}

/// 한 시점의 경로 텔레메트리 사본
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathTelemetry {
    /// 평균 RTT (초)
    pub rtt: f64,

    /// 평균 지터 (초)
    pub jitter: f64,

    /// 대역폭 추정 (bytes/sec, 항상 > 0)
    pub bandwidth: f64,

    /// 총 송신 바이트
    pub bytes_sent: u64,

    /// RTT 샘플 수
    pub samples: usize,
}

/// 경로 모니터
///
/// `record_*`는 서로 다른 태스크에서 호출될 수 있다.
/// 정책은 [`PathMonitor::snapshot`]으로 얻은 일관된 사본만 읽는다.
#[derive(Debug, Default)]
pub struct PathMonitor {
    inner: Mutex<PathStats>,
}

impl PathMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 송신 기록
    pub fn record_send(&self, bytes: usize, timestamp: f64) {
        let mut stats = self.inner.lock();
        stats.bytes_sent += bytes as u64;
        if stats.first_send.is_none() {
            stats.first_send = Some(timestamp);
        }
        stats.last_send = Some(timestamp);
    }

    /// RTT 샘플 기록 (초)
    pub fn record_rtt_sample(&self, seconds: f64) {
        if !seconds.is_finite() || seconds < 0.0 {
            return;
        }

        let mut stats = self.inner.lock();
        if let Some(&prev) = stats.rtt_samples.last() {
            stats.abs_diff_sum += (seconds - prev).abs();
        }
        stats.rtt_sum += seconds;
        stats.rtt_samples.push(seconds);
    }

    /// 평균 RTT, 샘플이 없으면 0.03초
    pub fn mean_rtt(&self) -> f64 {
        self.inner.lock().mean_rtt()
    }

    /// 연속 RTT 샘플 간 평균 절대 차이, 샘플이 2개 미만이면 0
    pub fn mean_jitter(&self) -> f64 {
        self.inner.lock().mean_jitter()
    }

    /// 첫 송신부터 마지막 송신까지의 송신률 (bytes/sec), 최소 1.0
    ///
    /// 기록된 송신 시각만으로 정해지므로 같은 기록이면 언제 읽어도 같은 값이다.
    /// 대신 유휴 상태인 경로는 마지막 송신률을 그대로 유지하고,
    /// 송신이 한 번뿐인 경로는 하한에 머문다. 유휴 시간을 반영하려면
    /// [`PathMonitor::bandwidth_estimate_at`]을 쓴다.
    pub fn bandwidth_estimate(&self) -> f64 {
        self.inner.lock().bandwidth()
    }

    /// 첫 송신부터 `now`(Unix 초)까지의 송신률 (bytes/sec), 최소 1.0
    pub fn bandwidth_estimate_at(&self, now: f64) -> f64 {
        self.inner.lock().bandwidth_at(now)
    }

    /// 총 송신 바이트
    pub fn bytes_sent(&self) -> u64 {
        self.inner.lock().bytes_sent
    }

    /// RTT 기록 사본
    pub fn rtt_history(&self) -> Vec<f64> {
        self.inner.lock().rtt_samples.clone()
    }

    /// 한 번의 락으로 모든 파생값 계산
    pub fn snapshot(&self) -> PathTelemetry {
        let stats = self.inner.lock();
        PathTelemetry {
            rtt: stats.mean_rtt(),
            jitter: stats.mean_jitter(),
            bandwidth: stats.bandwidth(),
            bytes_sent: stats.bytes_sent,
            samples: stats.rtt_samples.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fresh_path_defaults() {
        let monitor = PathMonitor::new();
        assert_eq!(monitor.mean_rtt(), 0.03);
        assert_eq!(monitor.mean_jitter(), 0.0);
        assert_eq!(monitor.bandwidth_estimate(), 1.0);
    }

    #[test]
    fn test_mean_rtt_and_jitter() {
        let monitor = PathMonitor::new();
        monitor.record_rtt_sample(0.010);
        assert!((monitor.mean_rtt() - 0.010).abs() < 1e-12);
        assert_eq!(monitor.mean_jitter(), 0.0);

        monitor.record_rtt_sample(0.030);
        monitor.record_rtt_sample(0.020);
        assert!((monitor.mean_rtt() - 0.020).abs() < 1e-12);
        // |0.03-0.01| + |0.02-0.03| = 0.03, 2개 차이
        assert!((monitor.mean_jitter() - 0.015).abs() < 1e-12);
        assert_eq!(monitor.rtt_history(), vec![0.010, 0.030, 0.020]);
    }

    #[test]
    fn test_invalid_rtt_sample_ignored() {
        let monitor = PathMonitor::new();
        monitor.record_rtt_sample(f64::NAN);
        monitor.record_rtt_sample(-1.0);
        assert_eq!(monitor.snapshot().samples, 0);
    }

    #[test]
    fn test_bandwidth_estimate() {
        let monitor = PathMonitor::new();

        // 한 번만 송신하면 경과 시간 0 -> 하한
        monitor.record_send(500, 100.0);
        assert_eq!(monitor.bandwidth_estimate(), 1.0);

        monitor.record_send(500, 100.5);
        monitor.record_send(1000, 101.0);
        assert!((monitor.bandwidth_estimate() - 2000.0).abs() < 1e-9);
        assert_eq!(monitor.bytes_sent(), 2000);
    }

    #[test]
    fn test_bandwidth_at_decays_while_idle() {
        let monitor = PathMonitor::new();
        assert_eq!(monitor.bandwidth_estimate_at(50.0), 1.0);

        monitor.record_send(1000, 100.0);
        monitor.record_send(1000, 101.0);
        assert!((monitor.bandwidth_estimate() - 2000.0).abs() < 1e-9);
        assert!((monitor.bandwidth_estimate_at(101.0) - 2000.0).abs() < 1e-9);

        // 유휴 시간이 길어질수록 감소, 기록 기반 추정은 그대로
        assert!((monitor.bandwidth_estimate_at(110.0) - 200.0).abs() < 1e-9);
        assert!((monitor.bandwidth_estimate() - 2000.0).abs() < 1e-9);

        // 한 번만 보낸 경로도 시간이 지나면 하한을 벗어남
        let single = PathMonitor::new();
        single.record_send(500, 10.0);
        assert_eq!(single.bandwidth_estimate(), 1.0);
        assert!((single.bandwidth_estimate_at(12.0) - 250.0).abs() < 1e-9);
        assert_eq!(single.bandwidth_estimate_at(10.0), 1.0);
        assert_eq!(single.bandwidth_estimate_at(10_000.0), 1.0);
    }

    #[test]
    fn test_bandwidth_never_below_floor() {
        let monitor = PathMonitor::new();
        monitor.record_send(1, 0.0);
        monitor.record_send(0, 1000.0);
        assert_eq!(monitor.bandwidth_estimate(), 1.0);

        let monitor = PathMonitor::new();
        monitor.record_send(10, 5.0);
        monitor.record_send(10, 4.0);
        assert_eq!(monitor.bandwidth_estimate(), 1.0);
    }

    #[test]
    fn test_concurrent_writers_consistent() {
        let monitor = Arc::new(PathMonitor::new());

        let rtt_writer = {
            let monitor = monitor.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    monitor.record_rtt_sample(0.02);
                }
            })
        };
        let send_writer = {
            let monitor = monitor.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    monitor.record_send(10, i as f64);
                }
            })
        };

        rtt_writer.join().unwrap();
        send_writer.join().unwrap();

        let snap = monitor.snapshot();
        assert_eq!(snap.samples, 1000);
        assert_eq!(snap.bytes_sent, 10_000);
        assert!((snap.rtt - 0.02).abs() < 1e-12);
        assert!(snap.jitter.abs() < 1e-12);
    }
}
