//! 주문 파이프라인 진단 이벤트.
//!
//! 파이프라인이 거부/조정/우회 결정을 내릴 때마다 구조화된 이벤트를
//! 남깁니다. 이벤트는 명령 단위로 수집되어 호출자에게 반환될 수 있고,
//! 동시에 tracing 로그로도 출력됩니다.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// 이벤트 타입
// =============================================================================

/// 진단 이벤트 수준.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    /// 디버그 (내부 계산 기록)
    Debug,
    /// 공지 (정보성)
    Notice,
    /// 성공
    Success,
    /// 경고 (조정되었지만 계속 진행)
    Warning,
    /// 오류 (명령 거부)
    Error,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventLevel::Debug => write!(f, "debug"),
            EventLevel::Notice => write!(f, "notice"),
            EventLevel::Success => write!(f, "success"),
            EventLevel::Warning => write!(f, "warning"),
            EventLevel::Error => write!(f, "error"),
        }
    }
}

/// 구조화된 진단 이벤트.
///
/// `code`는 기계 판독용 식별자이고 `args`는 코드별 보조 데이터입니다
/// (예: `order_over_maxsize`의 요청 수량과 조정 수량).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    /// 이벤트 수준
    pub level: EventLevel,
    /// 이벤트 코드 (예: "order_over_maxsize")
    pub code: String,
    /// 코드별 보조 데이터
    pub args: Value,
    /// 이 이벤트를 발생시킨 명령 ID
    pub command_id: Uuid,
    /// 발생 시각
    pub timestamp: DateTime<Utc>,
}

impl DiagnosticEvent {
    /// 새 이벤트를 생성합니다.
    pub fn new(level: EventLevel, code: impl Into<String>, args: Value, command_id: Uuid) -> Self {
        Self {
            level,
            code: code.into(),
            args,
            command_id,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// 싱크
// =============================================================================

/// 진단 이벤트 수신기.
pub trait DiagnosticsSink: Send + Sync {
    /// 이벤트를 기록합니다.
    fn record(&self, event: DiagnosticEvent);
}

/// 이벤트를 버리는 싱크.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&self, _event: DiagnosticEvent) {}
}

/// 이벤트를 메모리에 누적하는 싱크.
///
/// 테스트 검증과 명령 응답 구성에 사용합니다.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemorySink {
    /// 빈 싱크를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 기록된 이벤트의 스냅샷.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 기록된 이벤트 코드 목록.
    pub fn codes(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.code).collect()
    }

    /// 특정 코드의 이벤트가 기록되었는지 확인합니다.
    pub fn has_code(&self, code: &str) -> bool {
        self.events().iter().any(|e| e.code == code)
    }

    /// 누적 이벤트를 비웁니다.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, event: DiagnosticEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

// =============================================================================
// 명령 단위 핸들
// =============================================================================

/// 명령 단위 진단 핸들.
///
/// 명령 ID를 고정한 채 이벤트를 발행하며, 같은 이벤트를 tracing
/// 로그로도 내보냅니다. 파이프라인 전 단계에 복제되어 전달됩니다.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticsSink>,
    command_id: Uuid,
}

impl Diagnostics {
    /// 새 명령 ID로 핸들을 생성합니다.
    pub fn new(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            sink,
            command_id: Uuid::new_v4(),
        }
    }

    /// 기존 명령 ID를 이어받는 핸들을 생성합니다.
    pub fn with_command_id(sink: Arc<dyn DiagnosticsSink>, command_id: Uuid) -> Self {
        Self { sink, command_id }
    }

    /// 명령 ID.
    pub fn command_id(&self) -> Uuid {
        self.command_id
    }

    /// 디버그 이벤트를 발행합니다.
    pub fn debug(&self, code: &str, args: Value) {
        self.emit(EventLevel::Debug, code, args);
    }

    /// 공지 이벤트를 발행합니다.
    pub fn notice(&self, code: &str, args: Value) {
        self.emit(EventLevel::Notice, code, args);
    }

    /// 성공 이벤트를 발행합니다.
    pub fn success(&self, code: &str, args: Value) {
        self.emit(EventLevel::Success, code, args);
    }

    /// 경고 이벤트를 발행합니다.
    pub fn warning(&self, code: &str, args: Value) {
        self.emit(EventLevel::Warning, code, args);
    }

    /// 오류 이벤트를 발행합니다.
    pub fn error(&self, code: &str, args: Value) {
        self.emit(EventLevel::Error, code, args);
    }

    fn emit(&self, level: EventLevel, code: &str, args: Value) {
        match level {
            EventLevel::Debug => {
                tracing::debug!(command_id = %self.command_id, code, args = %args, "파이프라인 진단");
            }
            EventLevel::Notice | EventLevel::Success => {
                tracing::info!(command_id = %self.command_id, code, args = %args, "파이프라인 진단");
            }
            EventLevel::Warning => {
                tracing::warn!(command_id = %self.command_id, code, args = %args, "파이프라인 경고");
            }
            EventLevel::Error => {
                tracing::error!(command_id = %self.command_id, code, args = %args, "파이프라인 오류");
            }
        }
        self.sink
            .record(DiagnosticEvent::new(level, code, args, self.command_id));
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_memory_sink_accumulates() {
        let sink = Arc::new(MemorySink::new());
        let diag = Diagnostics::new(sink.clone());

        diag.warning("order_over_maxsize", json!(["2000", "1500"]));
        diag.error("position_none", json!("BTC/USDT"));

        assert_eq!(sink.codes(), vec!["order_over_maxsize", "position_none"]);
        assert!(sink.has_code("position_none"));
        assert!(!sink.has_code("unrelated"));
    }

    #[test]
    fn test_events_share_command_id() {
        let sink = Arc::new(MemorySink::new());
        let diag = Diagnostics::new(sink.clone());

        diag.notice("a", json!(null));
        diag.notice("b", json!(null));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].command_id, events[1].command_id);
        assert_eq!(events[0].command_id, diag.command_id());
    }

    #[test]
    fn test_null_sink_discards() {
        let diag = Diagnostics::new(Arc::new(NullSink));
        diag.error("ignored", json!(null));
    }
}
