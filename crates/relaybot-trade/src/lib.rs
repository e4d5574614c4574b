//! 거래 명령 실행 파이프라인.
//!
//! 이 crate는 다음을 제공합니다:
//! - 원시 문자열 파라미터를 타입 파라미터로 변환하는 파서
//! - 블랙/화이트리스트, 포지션 수 제한, 손실 청산 차단 등 사전 검증
//! - 상대/배수/계층 표현식 기반 주문 수량·가격 산출
//! - 손절/익절/추적 손절 연계를 포함한 명령 오케스트레이션
//! - 계정·심볼 단위로 직렬화되는 주문 제출 큐
//!
//! # 예제
//!
//! ```rust,ignore
//! use relaybot_trade::{RawParams, TradeOrchestrator};
//!
//! // 오케스트레이터 생성 (어댑터/설정/진단 싱크 주입)
//! let orchestrator = TradeOrchestrator::new("main", adapter, config, sink);
//!
//! // "usd 500 달러어치 시장가 매수" 명령 실행
//! let params: RawParams = [("symbol", "BTC/USDT"), ("usd", "500")]
//!     .into_iter()
//!     .collect();
//! let outcome = orchestrator.long(&params).await?;
//! ```

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod params;
pub mod price;
pub mod queue;
pub mod risk;
pub mod size;

// 주요 타입 재내보내기
pub use builder::{ConditionalSpec, OrderOptions};
pub use error::{RiskRejection, SizingError, TradeError, ValidationError};
pub use orchestrator::{CommandOutcome, CommandState, TradeOrchestrator};
pub use params::{
    CancelAllParams, CancelParams, CloseParams, ConditionalParams, LeverageParams, OpenParams,
    OrderCommand, ProtectionParams, RawParams,
};
pub use queue::{OrderQueue, QueueKey};
pub use size::{SizeInput, SizeOutcome};
