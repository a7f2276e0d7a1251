//! 전송 계층 어댑터
//!
//! 디스패처는 경로별 전송을 불투명한 send 프리미티브와 RTT 샘플 콜백으로만 다룬다.
//! [`UdpTransport`]는 경로마다 UDP 소켓 하나를 쓰는 기본 구현이다.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::message::{Frame, FrameType};
use crate::{Error, Result};

/// 스트림 ID
pub type StreamId = u32;

/// RTT 샘플 콜백 (초 단위)
pub type RttCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// 응답 없는 패킷 기록 상한
const MAX_IN_FLIGHT: usize = 4096;

/// 응답 없는 패킷 보관 시간
const IN_FLIGHT_TTL: Duration = Duration::from_secs(10);

/// 경로별 전송 프리미티브
pub trait TransportAdapter: Send + Sync {
    /// 경로 연결 핸들
    type Handle: Send + Sync;

    /// 로컬/원격 엔드포인트 사이 연결 수립
    fn establish(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// 새 송신 스트림
    fn open_stream(&self, handle: &Self::Handle) -> Result<StreamId>;

    /// 스트림에 바이트 쓰기
    fn send(
        &self,
        handle: &Self::Handle,
        stream: StreamId,
        payload: Bytes,
    ) -> impl Future<Output = Result<()>> + Send;

    /// RTT 추정이 갱신될 때마다 호출될 콜백 등록
    fn on_rtt_sample(&self, handle: &Self::Handle, callback: RttCallback);
}

/// UDP 경로 핸들
pub struct UdpPath {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    next_stream: AtomicU32,
    next_packet: AtomicU64,
    in_flight: Arc<DashMap<u64, Instant>>,
    callback: Arc<RwLock<Option<RttCallback>>>,
    recv_task: JoinHandle<()>,
}

impl UdpPath {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// ACK 대기 중인 패킷 수
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn send_error(&self, packet_number: u64, reason: impl std::fmt::Display) -> Error {
        Error::Transport {
            path: self.remote.to_string(),
            seq: packet_number,
            reason: reason.to_string(),
        }
    }
}

/// `newest`를 넣기 전에 ACK 대기 기록 정리
///
/// 상한을 넘으면 TTL이 지난 기록과 `newest` 기준 `MAX_IN_FLIGHT`개보다 오래된 기록을 버린다.
/// 패킷 번호는 단조 증가하므로 번호가 작을수록 오래된 기록이다.
fn prune_in_flight(in_flight: &DashMap<u64, Instant>, newest: u64, now: Instant) {
    if in_flight.len() < MAX_IN_FLIGHT {
        return;
    }
    in_flight.retain(|packet, sent| {
        newest.saturating_sub(*packet) < MAX_IN_FLIGHT as u64
            && now.duration_since(*sent) < IN_FLIGHT_TTL
    });
}

impl Drop for UdpPath {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// UDP 기반 전송 어댑터
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransport;

impl UdpTransport {
    pub fn new() -> Self {
        Self
    }
}

/// ACK 수신 루프
async fn ack_loop(
    socket: Arc<UdpSocket>,
    in_flight: Arc<DashMap<u64, Instant>>,
    callback: Arc<RwLock<Option<RttCallback>>>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!("피어 응답 없음: {}", e);
                continue;
            }
            Err(e) => {
                warn!("ACK 수신 에러: {}", e);
                break;
            }
        };

        let frame = match Frame::from_bytes(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("프레임 무시: {}", e);
                continue;
            }
        };

        if frame.header.frame_type != FrameType::Ack {
            continue;
        }

        if let Some((_, sent)) = in_flight.remove(&frame.header.packet_number) {
            let rtt = sent.elapsed().as_secs_f64();
            let cb = callback.read().clone();
            if let Some(cb) = cb {
                cb(rtt);
            }
        }
    }
}

impl TransportAdapter for UdpTransport {
    type Handle = UdpPath;

    async fn establish(&self, local: SocketAddr, remote: SocketAddr) -> Result<UdpPath> {
        let connection_error = |e: std::io::Error| Error::Connection {
            path: format!("{local}->{remote}"),
            reason: e.to_string(),
        };

        let socket = UdpSocket::bind(local).await.map_err(connection_error)?;
        socket.connect(remote).await.map_err(connection_error)?;
        let socket = Arc::new(socket);

        let in_flight = Arc::new(DashMap::new());
        let callback = Arc::new(RwLock::new(None));
        let recv_task = tokio::spawn(ack_loop(socket.clone(), in_flight.clone(), callback.clone()));

        debug!("경로 연결: {} -> {}", local, remote);

        Ok(UdpPath {
            socket,
            remote,
            next_stream: AtomicU32::new(0),
            next_packet: AtomicU64::new(0),
            in_flight,
            callback,
            recv_task,
        })
    }

    fn open_stream(&self, handle: &UdpPath) -> Result<StreamId> {
        Ok(handle.next_stream.fetch_add(1, Ordering::Relaxed))
    }

    async fn send(&self, handle: &UdpPath, stream: StreamId, payload: Bytes) -> Result<()> {
        let packet_number = handle.next_packet.fetch_add(1, Ordering::Relaxed);
        let bytes = Frame::data(stream, packet_number, payload)
            .to_bytes()
            .map_err(|e| handle.send_error(packet_number, e))?;

        let now = Instant::now();
        prune_in_flight(&handle.in_flight, packet_number, now);
        handle.in_flight.insert(packet_number, now);

        if let Err(e) = handle.socket.send(&bytes).await {
            handle.in_flight.remove(&packet_number);
            return Err(handle.send_error(packet_number, e));
        }
        Ok(())
    }

    fn on_rtt_sample(&self, handle: &UdpPath, callback: RttCallback) {
        *handle.callback.write() = Some(callback);
    }
}
