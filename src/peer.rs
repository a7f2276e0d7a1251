//! 피어 (수신측)
//!
//! - 경로마다 소켓 하나로 데이터 프레임 수신
//! - `SCHED:<policy>` 헤더로 현재 정책 식별
//! - 모든 데이터 프레임에 ACK 응답 (송신측 RTT 측정용)
//! - 종료 시 `<root>/<policy>/server_log.json` 저장

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::PolicyKind;
use crate::decision_log::persist_json;
use crate::message::{Frame, FrameType};
use crate::transport::StreamId;
use crate::{Error, Result, CONTROL_PREFIX, SERVER_LOG_FILE, UNKNOWN_POLICY};

/// 수신 기록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    /// Unix 타임스탬프 (초)
    pub timestamp: f64,

    /// 스트림 ID
    pub stream_id: StreamId,

    /// 페이로드 크기
    pub size: usize,
}

/// `SCHED:<policy>` 헤더에서 정책 이름 추출
///
/// 헤더가 아니면 `None`. 로그 디렉토리 이름으로 쓰이므로 알려진 정책이 아니면 `unknown`.
pub fn parse_control(payload: &[u8]) -> Option<String> {
    let rest = payload.strip_prefix(CONTROL_PREFIX.as_bytes())?;
    let name = String::from_utf8_lossy(rest);
    let policy = match name.trim().parse::<PolicyKind>() {
        Ok(kind) => kind.name(),
        Err(_) => UNKNOWN_POLICY,
    };
    Some(policy.to_string())
}

/// 소켓 태스크들이 공유하는 상태
#[derive(Debug)]
struct PeerState {
    policy: RwLock<String>,
    receipts: Mutex<Vec<ReceiptRecord>>,
    acks_sent: AtomicU64,
}

impl PeerState {
    /// 프레임 하나 처리, ACK을 보내야 하면 ACK 프레임 반환
    fn handle_frame(&self, frame: &Frame) -> Option<Frame> {
        if frame.header.frame_type != FrameType::Data {
            return None;
        }

        if let Some(policy) = parse_control(&frame.payload) {
            info!("스케줄러 감지: {}", policy);
            *self.policy.write() = policy;
        } else {
            self.receipts.lock().push(ReceiptRecord {
                timestamp: unix_time(),
                stream_id: frame.header.stream_id,
                size: frame.payload.len(),
            });
        }

        Some(Frame::ack_for(&frame.header))
    }
}

fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// 수신 루프
async fn serve_socket(socket: Arc<UdpSocket>, state: Arc<PeerState>) {
    let mut buf = vec![0u8; 65535];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset
                || e.kind() == std::io::ErrorKind::ConnectionRefused =>
            {
                debug!("수신 에러 무시: {}", e);
                continue;
            }
            Err(e) => {
                warn!("수신 에러: {}", e);
                break;
            }
        };

        let frame = match Frame::from_bytes(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("프레임 무시 ({}): {}", from, e);
                continue;
            }
        };

        let Some(ack) = state.handle_frame(&frame) else {
            continue;
        };

        match ack.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, from).await {
                    warn!("ACK 전송 실패: {}", e);
                } else {
                    state.acks_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => warn!("ACK 직렬화 실패: {}", e),
        }
    }
}

/// 멀티패스 피어
#[derive(Clone)]
pub struct Peer {
    sockets: Vec<Arc<UdpSocket>>,
    state: Arc<PeerState>,
}

impl Peer {
    /// 경로별 주소에 바인드
    pub async fn bind(addrs: &[SocketAddr]) -> Result<Self> {
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let socket = UdpSocket::bind(addr).await?;
            info!("피어 수신 대기: {}", socket.local_addr()?);
            sockets.push(Arc::new(socket));
        }

        Ok(Self {
            sockets,
            state: Arc::new(PeerState {
                policy: RwLock::new(UNKNOWN_POLICY.to_string()),
                receipts: Mutex::new(Vec::new()),
                acks_sent: AtomicU64::new(0),
            }),
        })
    }

    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.sockets
            .iter()
            .map(|s| s.local_addr().map_err(Error::from))
            .collect()
    }

    /// 마지막으로 감지한 정책 이름
    pub fn policy(&self) -> String {
        self.state.policy.read().clone()
    }

    pub fn receipts(&self) -> Vec<ReceiptRecord> {
        self.state.receipts.lock().clone()
    }

    pub fn receipt_count(&self) -> usize {
        self.state.receipts.lock().len()
    }

    pub fn acks_sent(&self) -> u64 {
        self.state.acks_sent.load(Ordering::Relaxed)
    }

    /// `shutdown`이 끝날 때까지 모든 경로에서 수신
    pub async fn serve<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let tasks: Vec<_> = self
            .sockets
            .iter()
            .map(|socket| tokio::spawn(serve_socket(socket.clone(), self.state.clone())))
            .collect();

        shutdown.await;

        for task in tasks {
            task.abort();
        }
        info!(
            "피어 종료: policy={}, receipts={}, acks={}",
            self.policy(),
            self.receipt_count(),
            self.acks_sent()
        );
    }

    /// 수신 기록 저장 (`<root>/<policy>/server_log.json`)
    pub fn flush(&self, root: &Path) -> Result<PathBuf> {
        let path = root.join(self.policy()).join(SERVER_LOG_FILE);
        let json = serde_json::to_string_pretty(&*self.state.receipts.lock())?;
        persist_json(&path, &json)?;
        info!("수신 로그 저장: {:?}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    use crate::config::SchedulerConfig;
    use crate::dispatcher::{Dispatcher, PathSpec};
    use crate::transport::UdpTransport;

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_control(b"SCHED:predict"), Some("predict".to_string()));
        assert_eq!(parse_control(b"SCHED: wrr \n"), Some("wrr".to_string()));
        assert_eq!(parse_control(b"SCHED:"), Some("unknown".to_string()));
        assert_eq!(parse_control(b"SCHED:../../etc"), Some("unknown".to_string()));
        assert_eq!(parse_control(b"xxxxSCHED:wrr"), None);
    }

    #[test]
    fn test_receipts_exclude_control_header() {
        let state = PeerState {
            policy: RwLock::new(UNKNOWN_POLICY.to_string()),
            receipts: Mutex::new(Vec::new()),
            acks_sent: AtomicU64::new(0),
        };

        let header = Frame::data(0, 0, Bytes::from_static(b"SCHED:redundant"));
        let ack = state.handle_frame(&header).unwrap();
        assert_eq!(ack.header.packet_number, 0);
        assert_eq!(*state.policy.read(), "redundant");
        assert!(state.receipts.lock().is_empty());

        let data = Frame::data(0, 1, Bytes::from(vec![b'x'; 500]));
        let ack = state.handle_frame(&data).unwrap();
        assert_eq!(ack.header.packet_number, 1);
        let receipts = state.receipts.lock();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].size, 500);

        // ACK에는 응답하지 않음
        assert!(state.handle_frame(&Frame::ack_for(&data.header)).is_none());
    }

    #[tokio::test]
    async fn test_loopback_session() {
        let dir = tempfile::tempdir().unwrap();
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let peer = Peer::bind(&[any, any]).await.unwrap();
        let addrs = peer.local_addrs().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = peer.clone();
        let serve_task = tokio::spawn(async move {
            server
                .serve(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let config = SchedulerConfig {
            total_units: 20,
            output_root: dir.path().to_path_buf(),
            ..SchedulerConfig::new(PolicyKind::MinRtt)
        };
        let specs = [PathSpec::new("A", any, addrs[0]), PathSpec::new("B", any, addrs[1])];
        let mut dispatcher = Dispatcher::connect(config, UdpTransport::new(), &specs)
            .await
            .unwrap();
        let summary = dispatcher.run().await.unwrap();
        assert_eq!(summary.units, 20);

        // 모든 데이터와 ACK이 도착할 때까지 대기
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while (peer.receipt_count() < 20 || peer.acks_sent() < 22)
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(peer.policy(), "minrtt");
        assert_eq!(peer.receipt_count(), 20);
        assert!(peer.receipts().iter().all(|r| r.size == 500));

        let samples: usize = dispatcher
            .path_status()
            .iter()
            .map(|s| s.telemetry.samples)
            .sum();
        assert!(samples > 0);

        let _ = stop_tx.send(());
        serve_task.await.unwrap();

        let path = peer.flush(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("minrtt").join("server_log.json"));
        let stored: Vec<ReceiptRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.len(), 20);
        assert!(summary.log_path.exists());
    }
}
