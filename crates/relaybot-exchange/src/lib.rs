//! 거래소 실행 어댑터 계층.
//!
//! 주문 파이프라인과 거래소 사이의 경계를 정의합니다:
//!
//! - `ExecutionAdapter` - 조회/실행 통합 어댑터 trait
//! - `AdapterSettings` - 거래소별 정적 특성 (수량 표기 단위)
//! - `MockExchangeAdapter` - 테스트용 인메모리 어댑터
//!
//! 실제 거래소 어댑터는 이 crate의 trait를 구현하여 추가합니다.

pub mod adapter;
pub mod mock;

// 주요 타입 재내보내기
pub use adapter::{AdapterError, AdapterSettings, ExecutionAdapter};
pub use mock::{LeverageCall, MockExchangeAdapter};
