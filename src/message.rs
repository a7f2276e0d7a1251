//! UDP 경로 프레임 정의
//!
//! 데이터 프레임과 ACK 프레임 두 가지뿐이다.
//! ACK에는 데이터 프레임의 패킷 번호가 그대로 실려 송신측이 RTT를 계산한다.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::transport::StreamId;
use crate::{Error, Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 프레임 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// 스트림 데이터
    Data = 1,

    /// 데이터 수신 확인
    Ack = 2,
}

/// 프레임 헤더
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프로토콜 버전
    pub version: u8,

    /// 프레임 타입
    pub frame_type: FrameType,

    /// 스트림 ID
    pub stream_id: StreamId,

    /// 경로 내 패킷 번호
    pub packet_number: u64,

    /// 페이로드 CRC32
    pub crc32: u32,
}

/// 파싱된 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    fn new(frame_type: FrameType, stream_id: StreamId, packet_number: u64, payload: Bytes) -> Self {
        Self {
            header: FrameHeader {
                magic: MAGIC_NUMBER,
                version: PROTOCOL_VERSION,
                frame_type,
                stream_id,
                packet_number,
                crc32: crc32fast::hash(&payload),
            },
            payload,
        }
    }

    /// 데이터 프레임
    pub fn data(stream_id: StreamId, packet_number: u64, payload: Bytes) -> Self {
        Self::new(FrameType::Data, stream_id, packet_number, payload)
    }

    /// `data`에 대한 ACK 프레임
    pub fn ack_for(data: &FrameHeader) -> Self {
        Self::new(
            FrameType::Ack,
            data.stream_id,
            data.packet_number,
            Bytes::from_static(crate::ACK_PAYLOAD),
        )
    }

    /// 바이트로 직렬화 (헤더 길이 u16 + 헤더 + 페이로드)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header_bytes = bincode::serialize(&self.header)?;
        let header_len = u16::try_from(header_bytes.len()).map_err(|_| Error::MalformedFrame {
            reason: format!("헤더 크기 초과: {}", header_bytes.len()),
        })?;

        let mut buf = Vec::with_capacity(2 + header_bytes.len() + self.payload.len());
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// 바이트에서 역직렬화 (매직/버전/CRC 검증)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::MalformedFrame {
                reason: format!("너무 짧은 프레임: {} bytes", bytes.len()),
            });
        }

        let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() < 2 + header_len {
            return Err(Error::MalformedFrame {
                reason: format!("헤더 잘림: expected {}, got {}", header_len, bytes.len() - 2),
            });
        }

        let header: FrameHeader = bincode::deserialize(&bytes[2..2 + header_len])?;
        if header.magic != MAGIC_NUMBER {
            return Err(Error::MalformedFrame {
                reason: format!("매직 넘버 불일치: {:08X}", header.magic),
            });
        }
        if header.version != PROTOCOL_VERSION {
            return Err(Error::MalformedFrame {
                reason: format!("버전 불일치: {}", header.version),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[2 + header_len..]);
        if crc32fast::hash(&payload) != header.crc32 {
            return Err(Error::MalformedFrame {
                reason: format!("CRC 불일치: packet={}", header.packet_number),
            });
        }

        Ok(Self { header, payload })
    }
}
