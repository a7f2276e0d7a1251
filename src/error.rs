//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

/// 스케줄러 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("설정 에러: {reason}")]
    Config { reason: String },

    #[error("알 수 없는 스케줄러: {name} (minrtt|wrr|redundant|predict)")]
    UnknownPolicy { name: String },

    #[error("경로 연결 실패: path={path}, {reason}")]
    Connection { path: String, reason: String },

    #[error("전송 실패: path={path}, seq={seq}, {reason}")]
    Transport {
        path: String,
        seq: u64,
        reason: String,
    },

    #[error("사용 가능한 경로 없음: seq={seq}")]
    NoPathAvailable { seq: u64 },

    #[error("로그 저장 실패: {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("잘못된 프레임: {reason}")]
    MalformedFrame { reason: String },

    #[error("이미 저장된 로그에 기록 시도: seq={seq}")]
    LogSealed { seq: u64 },
}

impl Error {
    /// 세션을 중단해야 하는 에러인지 여부
    ///
    /// 단위별 전송 실패와 경로 선택 실패는 기록만 하고 루프를 계속한다.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Transport { .. } | Error::NoPathAvailable { .. } | Error::MalformedFrame { .. }
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
