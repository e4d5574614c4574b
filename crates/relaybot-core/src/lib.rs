//! 트레이딩 엔진 공용 코어.
//!
//! 이 crate는 다음을 제공합니다:
//! - 거래소 중립 도메인 타입 (마켓, 포지션, 잔고, 주문)
//! - 수량/가격 표현식 파서
//! - 동적 설정 저장소 추상화
//! - 명령 단위 진단 이벤트 수집
//!
//! 거래소 어댑터와 주문 파이프라인 crate가 공통으로 의존합니다.

pub mod config;
pub mod diagnostics;
pub mod domain;

// 주요 타입 재내보내기
pub use config::{ConfigStore, MemoryConfigStore, SCOPE_CONFIG, SCOPE_COUNTER};
pub use diagnostics::{
    DiagnosticEvent, Diagnostics, DiagnosticsSink, EventLevel, MemorySink, NullSink,
};
pub use domain::{
    floor_to_step, round_to_step, total_free_usd, AmountLimits, Balance, ExprError, LayerBound,
    MarginMode, Market, MarketPrecision, MarketType, OrderDescriptor, OrderKind, OrderSide,
    OrderSizing, OrderStatus, Position, PositionDirection, PositionMode, PriceExpression,
    PriceOffset, Sign, SizeUnit, SizingExpression, SubmittedOrder, TimeInForce, TriggerType,
    UsdConversion, DEFAULT_LAYER_LEVELS,
};
