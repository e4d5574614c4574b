//! 거래소 실행 어댑터 추상화.
//!
//! 주문 파이프라인이 거래소와 상호작용하는 유일한 경계입니다.
//! 마켓/포지션/잔고 조회, 주문 제출/취소, 포지션 모드와 레버리지
//! 변경을 거래소 중립적인 인터페이스로 제공합니다.
//!
//! 각 거래소 어댑터는 중립 `OrderDescriptor`를 자체 와이어 형식으로
//! 변환하는 책임을 가집니다 (파라미터 이름 매핑 포함).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use relaybot_core::domain::{
    Balance, MarginMode, Market, OrderDescriptor, OrderKind, OrderSizing, Position,
    PositionDirection, PositionMode, SubmittedOrder,
};

// =============================================================================
// 에러 타입
// =============================================================================

/// ExecutionAdapter 에러.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 인증 실패
    #[error("인증 실패: {0}")]
    Authentication(String),

    /// 거래소 API 에러
    #[error("API 에러: {0}")]
    Api(String),

    /// 응답 파싱 에러
    #[error("파싱 에러: {0}")]
    Parse(String),

    /// 마켓을 찾을 수 없음
    #[error("마켓을 찾을 수 없음: {0}")]
    MarketNotFound(String),

    /// 지원하지 않는 기능
    #[error("지원하지 않는 기능: {0}")]
    Unsupported(String),

    /// 기타 에러
    #[error("기타 에러: {0}")]
    Other(String),
}

// =============================================================================
// 어댑터 설정
// =============================================================================

/// 어댑터 정적 설정.
///
/// 거래소별로 고정된 특성으로, 파이프라인의 수량 변환 방식을
/// 결정합니다.
#[derive(Debug, Clone, Copy)]
pub struct AdapterSettings {
    /// 주문 수량 표기 단위 (기초 자산 / 호가 자산)
    pub order_sizing: OrderSizing,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            order_sizing: OrderSizing::Base,
        }
    }
}

// =============================================================================
// ExecutionAdapter Trait
// =============================================================================

/// 거래소 실행 어댑터 trait.
///
/// 조회(마켓, 포지션, 잔고, 주문)와 실행(주문 제출/취소, 포지션 모드,
/// 레버리지)을 모두 담당합니다. 각 거래소별로 이 trait를 구현하여
/// 파이프라인 코드를 거래소 중립적으로 유지합니다.
///
/// # 구현 예시
///
/// ```ignore
/// pub struct BybitAdapter {
///     client: Arc<BybitClient>,
/// }
///
/// #[async_trait]
/// impl ExecutionAdapter for BybitAdapter {
///     async fn market(&self, symbol: &str) -> Result<Market, AdapterError> {
///         // Bybit API 호출 및 중립 타입으로 변환
///     }
///
///     // ... 나머지 메서드 구현
/// }
/// ```
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// 거래소 이름.
    ///
    /// 로깅 및 디버깅 목적으로 사용됩니다.
    fn name(&self) -> &str;

    /// 어댑터 정적 설정.
    fn settings(&self) -> AdapterSettings;

    /// 마켓 정보 조회.
    ///
    /// # Errors
    ///
    /// - `AdapterError::MarketNotFound`: 심볼에 해당하는 마켓 없음
    /// - `AdapterError::Network`: 네트워크 연결 실패
    async fn market(&self, symbol: &str) -> Result<Market, AdapterError>;

    /// 전체 마켓 목록 조회.
    ///
    /// 전역 레버리지 설정처럼 모든 심볼을 순회하는 작업에 사용됩니다.
    ///
    /// # Errors
    ///
    /// - `AdapterError::Network`: 네트워크 연결 실패
    /// - `AdapterError::Api`: 거래소 API 에러
    async fn markets(&self) -> Result<Vec<Market>, AdapterError>;

    /// 전체 잔고 조회.
    ///
    /// # Errors
    ///
    /// - `AdapterError::Network`: 네트워크 연결 실패
    /// - `AdapterError::Authentication`: 인증 실패
    async fn balances(&self) -> Result<Vec<Balance>, AdapterError>;

    /// 특정 심볼의 포지션 조회.
    ///
    /// 헤지 모드 계정은 `direction`으로 롱/숏 포지션을 구분합니다.
    /// 포지션이 없으면 `None`을 반환합니다.
    ///
    /// # Errors
    ///
    /// - `AdapterError::Api`: 같은 심볼에 여러 포지션이 있는데
    ///   `direction`이 주어지지 않은 경우 등
    async fn position(
        &self,
        symbol: &str,
        direction: Option<PositionDirection>,
    ) -> Result<Option<Position>, AdapterError>;

    /// 전체 포지션 조회.
    ///
    /// # Returns
    ///
    /// 포지션 목록. 포지션이 없으면 빈 벡터 반환.
    async fn positions(&self) -> Result<Vec<Position>, AdapterError>;

    /// 특정 심볼의 미체결 주문 조회.
    async fn open_orders(&self, symbol: &str) -> Result<Vec<SubmittedOrder>, AdapterError>;

    /// 주문 이력 조회.
    ///
    /// `since` 이후의 체결/취소 주문을 포함한 전체 이력을 반환합니다.
    /// DCA 초기 주문 크기 추적에 사용됩니다.
    async fn order_history(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SubmittedOrder>, AdapterError>;

    /// 계정의 포지션 모드 조회.
    ///
    /// # Returns
    ///
    /// 포지션 모드를 지원하지 않는 마켓(현물 등)은 `None`을 반환합니다.
    async fn position_mode(&self, symbol: &str) -> Result<Option<PositionMode>, AdapterError>;

    /// 포지션 모드 변경.
    ///
    /// # Errors
    ///
    /// - `AdapterError::Api`: 포지션이 열려 있어 변경할 수 없는 경우
    /// - `AdapterError::Unsupported`: 포지션 모드를 지원하지 않는 마켓
    async fn set_position_mode(
        &self,
        symbol: &str,
        mode: PositionMode,
    ) -> Result<(), AdapterError>;

    /// 주문 제출.
    ///
    /// 중립 주문 기술자를 거래소 네이티브 요청으로 변환하여 제출합니다.
    ///
    /// # Errors
    ///
    /// - `AdapterError::Api`: 거래소 API 에러 (잔고 부족, 수량 초과 등)
    /// - `AdapterError::Network`: 네트워크 연결 실패
    async fn submit_order(&self, order: &OrderDescriptor) -> Result<SubmittedOrder, AdapterError>;

    /// 특정 주문 취소.
    ///
    /// # Errors
    ///
    /// - `AdapterError::Api`: 이미 체결되었거나 존재하지 않는 주문
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), AdapterError>;

    /// 심볼의 모든 미체결 주문 취소.
    ///
    /// # Returns
    ///
    /// 취소된 주문 ID 목록.
    async fn cancel_all(&self, symbol: &str) -> Result<Vec<String>, AdapterError>;

    /// 심볼의 특정 유형 조건부 주문 취소.
    ///
    /// 손절/익절 주문 갱신 전에 기존 주문을 제거할 때 사용합니다.
    ///
    /// # Returns
    ///
    /// 취소된 주문 ID 목록.
    async fn cancel_orders_of_kind(
        &self,
        symbol: &str,
        kind: OrderKind,
    ) -> Result<Vec<String>, AdapterError>;

    /// 심볼의 레버리지 설정.
    ///
    /// # Errors
    ///
    /// - `AdapterError::Unsupported`: 레버리지를 지원하지 않는 마켓 (현물)
    /// - `AdapterError::Api`: 거래소 API 에러
    async fn set_leverage(
        &self,
        symbol: &str,
        leverage: Decimal,
        margin_mode: MarginMode,
    ) -> Result<(), AdapterError>;
}
