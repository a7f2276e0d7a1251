//! 결정 로그
//!
//! 데이터 단위마다 한 개의 [`DecisionRecord`]를 추가하고 세션 종료 시 한 번 JSON으로 저장한다.
//!
//! 저장 형식 (레코드당 평탄한 객체, 경로 라벨 L마다 `rttL`/`jitL`/`bwL`):
//!
//! ```json
//! [{ "seq": 0, "path": "A", "rttA": 0.03, "rttB": 0.03, "jitA": 0.0, "jitB": 0.0,
//!    "bwA": 1.0, "bwB": 1.0, "time": 1700000000.123 }]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::info;

use crate::{Error, Result, NO_PATH_LABEL};

/// 결정 시점의 경로 텔레메트리
#[derive(Debug, Clone, PartialEq)]
pub struct PathSample {
    pub label: String,
    pub rtt: f64,
    pub jitter: f64,
    pub bandwidth: f64,
}

/// 데이터 단위 하나에 대한 결정 기록
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    /// 시퀀스 번호
    pub seq: u64,

    /// 실제 전송된 경로 라벨 (`A`, `A+B`, 실패 시 `-`)
    pub path: String,

    /// 선언 순서대로 모든 경로의 스냅샷
    pub samples: Vec<PathSample>,

    /// Unix 타임스탬프 (초)
    pub time: f64,
}

impl DecisionRecord {
    /// 전송에 실패한 단위인지 여부
    pub fn is_failed(&self) -> bool {
        self.path == NO_PATH_LABEL
    }
}

impl Serialize for DecisionRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3 + self.samples.len() * 3))?;
        map.serialize_entry("seq", &self.seq)?;
        map.serialize_entry("path", &self.path)?;
        for s in &self.samples {
            map.serialize_entry(&format!("rtt{}", s.label), &s.rtt)?;
        }
        for s in &self.samples {
            map.serialize_entry(&format!("jit{}", s.label), &s.jitter)?;
        }
        for s in &self.samples {
            map.serialize_entry(&format!("bw{}", s.label), &s.bandwidth)?;
        }
        map.serialize_entry("time", &self.time)?;
        map.end()
    }
}

/// 역직렬화 중 라벨별로 모으는 값
#[derive(Default)]
struct PartialSample {
    rtt: Option<f64>,
    jitter: Option<f64>,
    bandwidth: Option<f64>,
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = DecisionRecord;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decision record object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<DecisionRecord, A::Error> {
        let mut seq = None;
        let mut path = None;
        let mut time = None;
        // 라벨 등장 순서 유지
        let mut labels: Vec<String> = Vec::new();
        let mut partial: BTreeMap<String, PartialSample> = BTreeMap::new();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "seq" => seq = Some(map.next_value()?),
                "path" => path = Some(map.next_value()?),
                "time" => time = Some(map.next_value()?),
                _ => {
                    let field = ["rtt", "jit", "bw"]
                        .into_iter()
                        .find_map(|prefix| key.strip_prefix(prefix).map(|label| (prefix, label)));

                    let Some((prefix, label)) = field.filter(|(_, label)| !label.is_empty()) else {
                        map.next_value::<IgnoredAny>()?;
                        continue;
                    };

                    if !partial.contains_key(label) {
                        labels.push(label.to_string());
                    }
                    let entry = partial.entry(label.to_string()).or_default();
                    let value: f64 = map.next_value()?;
                    match prefix {
                        "rtt" => entry.rtt = Some(value),
                        "jit" => entry.jitter = Some(value),
                        _ => entry.bandwidth = Some(value),
                    }
                }
            }
        }

        let mut samples = Vec::with_capacity(labels.len());
        for label in labels {
            let p = partial.remove(&label).unwrap_or_default();
            match (p.rtt, p.jitter, p.bandwidth) {
                (Some(rtt), Some(jitter), Some(bandwidth)) => samples.push(PathSample {
                    label,
                    rtt,
                    jitter,
                    bandwidth,
                }),
                _ => {
                    return Err(de::Error::custom(format!(
                        "incomplete telemetry for path {label}"
                    )))
                }
            }
        }

        Ok(DecisionRecord {
            seq: seq.ok_or_else(|| de::Error::missing_field("seq"))?,
            path: path.ok_or_else(|| de::Error::missing_field("path"))?,
            samples,
            time: time.ok_or_else(|| de::Error::missing_field("time"))?,
        })
    }
}

impl<'de> Deserialize<'de> for DecisionRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}

/// JSON 문자열을 파일로 저장 (상위 디렉토리 생성)
pub(crate) fn persist_json(path: &Path, json: &str) -> Result<()> {
    let persist = |source| Error::Persistence {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(persist)?;
    }
    let mut file = fs::File::create(path).map_err(persist)?;
    file.write_all(json.as_bytes()).map_err(persist)?;
    file.sync_all().map_err(persist)?;
    Ok(())
}

/// 추가 전용 결정 로그
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecisionLog {
    records: Vec<DecisionRecord>,
    flushed: bool,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 레코드 추가
    ///
    /// 저장이 끝난 로그에는 추가할 수 없다.
    pub fn append(&mut self, record: DecisionRecord) -> Result<()> {
        if self.flushed {
            return Err(Error::LogSealed { seq: record.seq });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// JSON 문자열로 직렬화
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.records)?)
    }

    /// JSON 문자열에서 복원
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<DecisionRecord> = serde_json::from_str(json)?;
        Ok(Self {
            records,
            flushed: false,
        })
    }

    /// 디스크에 저장
    ///
    /// 성공한 뒤의 호출은 아무 일도 하지 않는다. 실패하면 메모리 로그는 그대로 남아 재시도할 수 있다.
    pub fn flush(&mut self, path: &Path) -> Result<()> {
        if self.flushed {
            return Ok(());
        }

        persist_json(path, &self.to_json()?)?;

        self.flushed = true;
        info!("결정 로그 저장: {:?} ({} records)", path, self.records.len());
        Ok(())
    }

    /// 저장된 로그 읽기
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// 라벨별 선택 횟수
    pub fn path_usage(&self) -> BTreeMap<String, usize> {
        let mut usage = BTreeMap::new();
        for record in &self.records {
            *usage.entry(record.path.clone()).or_insert(0) += 1;
        }
        usage
    }
}
