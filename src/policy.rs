//! 스케줄링 정책
//!
//! 모든 정책은 [`PathView`] 스냅샷만 읽는 순수 함수다.
//! WRR deficit 카운터처럼 상태가 바뀌는 부분은 [`Decision`]에 담아 돌려주고
//! 디스패처가 전송 후 반영한다.
//!
//! 동점 규칙: 비용/RTT/카운터가 같으면 선언 순서상 뒤에 있는 경로를 고른다.
//! (A, B 두 경로에서 동점이면 B)

use crate::config::{CostWeights, PolicyKind, SchedulerConfig};
use crate::stats::PathTelemetry;
use crate::{Error, Result};

/// 정책이 보는 경로 한 개의 스냅샷
#[derive(Debug, Clone, PartialEq)]
pub struct PathView {
    /// 디스패처 경로 인덱스 (선언 순서)
    pub index: usize,

    /// 텔레메트리 사본
    pub telemetry: PathTelemetry,

    /// 이 경로에 마지막으로 배정된 시퀀스 번호 (-1 = 없음)
    pub last_seq: i64,

    /// WRR deficit 카운터
    pub deficit: i64,
}

/// 정책 결정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// 전송 대상 경로 인덱스 (선언 순서)
    pub targets: Vec<usize>,

    /// 반영할 deficit 카운터 (경로 인덱스, 새 값)
    pub deficits: Vec<(usize, i64)>,
}

impl Decision {
    fn single(index: usize) -> Self {
        Self {
            targets: vec![index],
            deficits: Vec::new(),
        }
    }

    /// 중복 전송 여부
    pub fn is_redundant(&self) -> bool {
        self.targets.len() > 1
    }
}

/// 스케줄링 정책
pub trait SchedulingPolicy: Send + Sync {
    /// 정책 종류
    fn kind(&self) -> PolicyKind;

    /// 시퀀스 번호 `seq`를 보낼 경로 결정
    ///
    /// `paths`는 선택 가능한 경로만 선언 순서대로 담고 있다.
    /// 비어 있으면 [`Error::NoPathAvailable`].
    fn decide(&self, seq: u64, paths: &[PathView]) -> Result<Decision>;
}

/// 키가 가장 작은 경로, 동점이면 뒤쪽
fn last_min_by<F>(paths: &[PathView], key: F) -> Option<&PathView>
where
    F: Fn(&PathView) -> f64,
{
    let mut best: Option<(&PathView, f64)> = None;
    for path in paths {
        let value = key(path);
        match best {
            Some((_, current)) if value > current => {}
            _ => best = Some((path, value)),
        }
    }
    best.map(|(path, _)| path)
}

/// 평균 RTT 최소 경로
#[derive(Debug, Default, Clone, Copy)]
pub struct MinRtt;

impl SchedulingPolicy for MinRtt {
    fn kind(&self) -> PolicyKind {
        PolicyKind::MinRtt
    }

    fn decide(&self, seq: u64, paths: &[PathView]) -> Result<Decision> {
        last_min_by(paths, |p| p.telemetry.rtt)
            .map(|p| Decision::single(p.index))
            .ok_or(Error::NoPathAvailable { seq })
    }
}

/// Smooth deficit 가중 라운드로빈
///
/// 매 단계 각 경로의 카운터에 가중치를 더하고, 카운터가 가장 큰 경로를 고른 뒤
/// 그 경로의 카운터에서 가중치 총합을 뺀다. 모든 카운터는 0에서 시작하므로
/// A=1, B=3이면 한 주기 선택 순서는 B, B, A, B.
#[derive(Debug, Clone, Copy)]
pub struct WeightedRoundRobin {
    base_unit: f64,
}

impl WeightedRoundRobin {
    pub fn new(base_unit: f64) -> Self {
        Self { base_unit }
    }

    /// `max(1, floor(bandwidth / base_unit))`
    pub fn weight(&self, telemetry: &PathTelemetry) -> i64 {
        let units = (telemetry.bandwidth / self.base_unit).floor();
        if units.is_finite() && units >= 1.0 {
            units.min(i64::MAX as f64) as i64
        } else {
            1
        }
    }
}

impl SchedulingPolicy for WeightedRoundRobin {
    fn kind(&self) -> PolicyKind {
        PolicyKind::WeightedRoundRobin
    }

    fn decide(&self, seq: u64, paths: &[PathView]) -> Result<Decision> {
        if paths.is_empty() {
            return Err(Error::NoPathAvailable { seq });
        }

        let weights: Vec<i64> = paths.iter().map(|p| self.weight(&p.telemetry)).collect();
        let total: i64 = weights.iter().sum();

        let mut counters: Vec<i64> = paths
            .iter()
            .zip(&weights)
            .map(|(p, w)| p.deficit.saturating_add(*w))
            .collect();

        let mut winner = 0;
        for (i, counter) in counters.iter().enumerate() {
            if *counter >= counters[winner] {
                winner = i;
            }
        }
        counters[winner] = counters[winner].saturating_sub(total);

        Ok(Decision {
            targets: vec![paths[winner].index],
            deficits: paths.iter().map(|p| p.index).zip(counters).collect(),
        })
    }
}

/// 모든 경로로 중복 전송
#[derive(Debug, Default, Clone, Copy)]
pub struct Redundant;

impl SchedulingPolicy for Redundant {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Redundant
    }

    fn decide(&self, seq: u64, paths: &[PathView]) -> Result<Decision> {
        if paths.is_empty() {
            return Err(Error::NoPathAvailable { seq });
        }
        Ok(Decision {
            targets: paths.iter().map(|p| p.index).collect(),
            deficits: Vec::new(),
        })
    }
}

/// 비용 함수 기반 예측 스케줄러
#[derive(Debug, Clone, Copy)]
pub struct Predictive {
    weights: CostWeights,
}

impl Predictive {
    pub fn new(weights: CostWeights) -> Self {
        Self { weights }
    }

    /// `rtt + α·jitter + β/bandwidth + γ·max(0, own_last_seq - peers_max_last_seq)`
    ///
    /// 가중치가 음수가 아니면 각 항에 대해 단조 비감소.
    pub fn cost(&self, telemetry: &PathTelemetry, own_last_seq: i64, peers_max_last_seq: i64) -> f64 {
        let CostWeights { alpha, beta, gamma } = self.weights;
        let reorder = own_last_seq.saturating_sub(peers_max_last_seq).max(0) as f64;

        telemetry.rtt + alpha * telemetry.jitter + beta * (1.0 / telemetry.bandwidth) + gamma * reorder
    }

    /// 스냅샷 안에서 경로 `pos`의 비용
    fn cost_in(&self, paths: &[PathView], pos: usize) -> f64 {
        let peers_max = paths
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != pos)
            .map(|(_, p)| p.last_seq)
            .max()
            .unwrap_or(paths[pos].last_seq);

        self.cost(&paths[pos].telemetry, paths[pos].last_seq, peers_max)
    }

    /// 스냅샷의 모든 경로 비용 (선언 순서)
    pub fn costs(&self, paths: &[PathView]) -> Vec<f64> {
        (0..paths.len()).map(|pos| self.cost_in(paths, pos)).collect()
    }
}

impl SchedulingPolicy for Predictive {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Predictive
    }

    fn decide(&self, seq: u64, paths: &[PathView]) -> Result<Decision> {
        let costs = self.costs(paths);
        let mut best: Option<usize> = None;
        for (pos, cost) in costs.iter().enumerate() {
            match best {
                Some(current) if *cost > costs[current] => {}
                _ => best = Some(pos),
            }
        }

        best.map(|pos| Decision::single(paths[pos].index))
            .ok_or(Error::NoPathAvailable { seq })
    }
}

/// 설정에 맞는 정책 생성
pub fn build_policy(config: &SchedulerConfig) -> Box<dyn SchedulingPolicy> {
    match config.policy {
        PolicyKind::MinRtt => Box::new(MinRtt),
        PolicyKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new(config.wrr_base_unit)),
        PolicyKind::Redundant => Box::new(Redundant),
        PolicyKind::Predictive => Box::new(Predictive::new(config.weights)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn telemetry(rtt: f64, jitter: f64, bandwidth: f64) -> PathTelemetry {
        PathTelemetry {
            rtt,
            jitter,
            bandwidth,
            bytes_sent: 0,
            samples: 0,
        }
    }

    fn view(index: usize, rtt: f64, jitter: f64, bandwidth: f64, last_seq: i64) -> PathView {
        PathView {
            index,
            telemetry: telemetry(rtt, jitter, bandwidth),
            last_seq,
            deficit: 0,
        }
    }

    #[test]
    fn test_min_rtt_picks_smallest() {
        let paths = [view(0, 0.05, 0.0, 1.0, -1), view(1, 0.02, 0.0, 1.0, -1), view(2, 0.04, 0.0, 1.0, -1)];
        assert_eq!(MinRtt.decide(0, &paths).unwrap().targets, vec![1]);
    }

    #[test]
    fn test_min_rtt_tie_goes_to_later_path() {
        let paths = [view(0, 0.03, 0.0, 1.0, -1), view(1, 0.03, 0.0, 1.0, -1)];
        assert_eq!(MinRtt.decide(0, &paths).unwrap().targets, vec![1]);

        let paths = [
            view(0, 0.01, 0.0, 1.0, -1),
            view(1, 0.01, 0.0, 1.0, -1),
            view(2, 0.09, 0.0, 1.0, -1),
        ];
        assert_eq!(MinRtt.decide(0, &paths).unwrap().targets, vec![1]);
    }

    #[test]
    fn test_min_rtt_property_random() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let n = rng.gen_range(1..6);
            let paths: Vec<PathView> = (0..n)
                .map(|i| view(i, rng.gen_range(0..5) as f64 * 0.01, 0.0, 1.0, -1))
                .collect();
            let chosen = MinRtt.decide(0, &paths).unwrap().targets[0];
            let chosen_rtt = paths[chosen].telemetry.rtt;
            assert!(paths.iter().all(|p| chosen_rtt <= p.telemetry.rtt));
            assert!(paths[chosen + 1..].iter().all(|p| p.telemetry.rtt > chosen_rtt));
        }
    }

    #[test]
    fn test_empty_snapshot_is_no_path() {
        let policies: Vec<Box<dyn SchedulingPolicy>> = vec![
            Box::new(MinRtt),
            Box::new(WeightedRoundRobin::new(1000.0)),
            Box::new(Redundant),
            Box::new(Predictive::new(CostWeights::default())),
        ];
        for policy in policies {
            assert!(matches!(
                policy.decide(9, &[]),
                Err(Error::NoPathAvailable { seq: 9 })
            ));
        }
    }

    #[test]
    fn test_wrr_weight_floor() {
        let wrr = WeightedRoundRobin::new(1000.0);
        assert_eq!(wrr.weight(&telemetry(0.03, 0.0, 1.0)), 1);
        assert_eq!(wrr.weight(&telemetry(0.03, 0.0, 2999.0)), 2);
        assert_eq!(wrr.weight(&telemetry(0.03, 0.0, 3000.0)), 3);
    }

    fn run_wrr(wrr: &WeightedRoundRobin, paths: &mut [PathView], steps: usize) -> Vec<usize> {
        let mut order = Vec::with_capacity(steps);
        for seq in 0..steps {
            let decision = wrr.decide(seq as u64, paths).unwrap();
            for (index, deficit) in decision.deficits {
                paths[index].deficit = deficit;
            }
            order.push(decision.targets[0]);
        }
        order
    }

    #[test]
    fn test_wrr_one_to_three_order() {
        let wrr = WeightedRoundRobin::new(1000.0);
        let mut paths = [view(0, 0.03, 0.0, 1000.0, -1), view(1, 0.03, 0.0, 3000.0, -1)];

        let order = run_wrr(&wrr, &mut paths, 4);
        assert_eq!(order, vec![1, 1, 0, 1]);
        // 한 주기 후 카운터는 원점으로
        assert_eq!(paths[0].deficit, 0);
        assert_eq!(paths[1].deficit, 0);
    }

    #[test]
    fn test_wrr_long_run_fairness() {
        let wrr = WeightedRoundRobin::new(1000.0);
        let mut paths = [
            view(0, 0.03, 0.0, 2000.0, -1),
            view(1, 0.03, 0.0, 5000.0, -1),
            view(2, 0.03, 0.0, 1500.0, -1),
        ];
        // 가중치 2, 5, 1 -> 합 8
        let steps = 8000;
        let order = run_wrr(&wrr, &mut paths, steps);

        let weights = [2.0, 5.0, 1.0];
        for (index, weight) in weights.iter().enumerate() {
            let count = order.iter().filter(|&&i| i == index).count() as f64;
            let expected = weight / 8.0;
            // 오차는 O(1/N)
            assert!((count / steps as f64 - expected).abs() <= 8.0 / steps as f64);
        }
    }

    #[test]
    fn test_redundant_selects_all_in_order() {
        let paths = [view(0, 0.01, 0.0, 1.0, 4), view(2, 0.05, 0.0, 1.0, 4)];
        let decision = Redundant.decide(5, &paths).unwrap();
        assert_eq!(decision.targets, vec![0, 2]);
        assert!(decision.is_redundant());
    }

    #[test]
    fn test_predictive_scenario_prefers_low_cost() {
        let policy = Predictive::new(CostWeights::default());
        let paths = [view(0, 0.01, 0.0, 1000.0, 3), view(1, 0.05, 0.0, 2000.0, 3)];

        let costs = policy.costs(&paths);
        assert!((costs[0] - 0.0108).abs() < 1e-12);
        assert!((costs[1] - 0.0504).abs() < 1e-12);
        assert_eq!(policy.decide(4, &paths).unwrap().targets, vec![0]);
    }

    #[test]
    fn test_predictive_reorder_penalty_shifts_choice() {
        let policy = Predictive::new(CostWeights::default());
        // A가 B보다 2 앞서 있으면 γ·2 = 2.4 패널티
        let paths = [view(0, 0.01, 0.0, 1000.0, 10), view(1, 0.05, 0.0, 2000.0, 8)];
        assert_eq!(policy.decide(11, &paths).unwrap().targets, vec![1]);
    }

    #[test]
    fn test_predictive_tie_goes_to_later_path() {
        let policy = Predictive::new(CostWeights::default());
        let paths = [view(0, 0.02, 0.0, 1.0, -1), view(1, 0.02, 0.0, 1.0, -1)];
        assert_eq!(policy.decide(0, &paths).unwrap().targets, vec![1]);
    }

    #[test]
    fn test_predictive_cost_monotonic() {
        let policy = Predictive::new(CostWeights::default());
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..1000 {
            let rtt = rng.gen_range(0.0..0.2);
            let jitter = rng.gen_range(0.0..0.05);
            let bandwidth = rng.gen_range(1.0..1e6);
            let own: i64 = rng.gen_range(-1..100);
            let peers: i64 = rng.gen_range(-1..100);
            let base = policy.cost(&telemetry(rtt, jitter, bandwidth), own, peers);

            let bump = rng.gen_range(0.0..0.1);
            assert!(policy.cost(&telemetry(rtt + bump, jitter, bandwidth), own, peers) >= base);
            assert!(policy.cost(&telemetry(rtt, jitter + bump, bandwidth), own, peers) >= base);
            // 대역폭이 줄면 역대역폭 증가
            assert!(policy.cost(&telemetry(rtt, jitter, bandwidth / 2.0), own, peers) >= base);
            assert!(policy.cost(&telemetry(rtt, jitter, bandwidth), own + 5, peers) >= base);
        }
    }

    #[test]
    fn test_build_policy_matches_kind() {
        for kind in PolicyKind::all() {
            let config = SchedulerConfig::new(kind);
            assert_eq!(build_policy(&config).kind(), kind);
        }
    }
}
