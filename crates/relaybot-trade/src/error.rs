//! 주문 파이프라인 에러 분류.
//!
//! 실패는 발생 단계별로 구분됩니다:
//! - `ValidationError` - 명령 파라미터 검증 실패 (네트워크 호출 전)
//! - `RiskRejection` - 사전 리스크 점검 거부
//! - `SizingError` - 수량/가격 해석 실패
//! - `AdapterError` - 거래소 어댑터 에러 (relaybot-exchange)
//!
//! 모든 실패는 부분 결과 없이 명령 전체를 거부하며, 발생 지점에서
//! 에러 수준 진단 이벤트를 정확히 한 번 발행합니다.

use rust_decimal::Decimal;
use thiserror::Error;

use relaybot_exchange::AdapterError;

/// 명령 파라미터 검증 에러.
///
/// 필드 이름과 거부 사유를 함께 보존합니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("파라미터 검증 실패 ({field}): {reason}")]
pub struct ValidationError {
    /// 문제가 된 파라미터 이름
    pub field: String,
    /// 거부 사유
    pub reason: String,
}

impl ValidationError {
    /// 새 검증 에러를 생성합니다.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 필수 파라미터 누락.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "필수 파라미터 누락")
    }

    /// 값 해석 실패.
    pub fn invalid(field: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::new(field, reason.to_string())
    }
}

/// 사전 리스크 점검 거부.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskRejection {
    /// 최대 포지션 수 도달
    #[error("최대 포지션 수 도달: {0}")]
    MaxPositionCount(u64),

    /// 블랙리스트 심볼
    #[error("블랙리스트 심볼: {0}")]
    SymbolBlacklisted(String),

    /// 화이트리스트 미등록 심볼
    #[error("화이트리스트 미등록 심볼: {0}")]
    SymbolNotWhitelisted(String),

    /// 손실 포지션 청산 비활성화
    #[error("손실 포지션 청산이 비활성화되어 있습니다: {0}")]
    LossCloseDisabled(String),

    /// 헤지 모드 전환 실패 (방향 지정 명령)
    #[error("헤지 모드가 필요하지만 전환할 수 없습니다: {0}")]
    HedgeModeRequired(String),

    /// 단방향 모드 전환 실패 (숏 명령)
    #[error("단방향 모드가 필요하지만 전환할 수 없습니다: {0}")]
    SingleModeRequired(String),
}

/// 수량/가격 해석 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizingError {
    /// 배수/지분율이 base/quote 필드에 사용됨
    #[error("배수/지분율 사이징은 size/usd 필드에만 허용됩니다")]
    FactorOnlySize,

    /// 상대 사이징이 long/short 외 명령에 사용됨
    #[error("상대 사이징은 {0} 명령에 허용되지 않습니다")]
    RelativeNotAllowed(String),

    /// 상대 사이징에 maxsize 누락
    #[error("상대 사이징에는 maxsize가 필요합니다: {0}")]
    MaxSizeRequired(String),

    /// 포지션이 이미 최대 크기를 초과함
    #[error("포지션이 이미 최대 크기를 초과했습니다: 요청 {requested}")]
    OverMaxSize { requested: Decimal },

    /// 주문이 현재 포지션을 줄이는 방향임 (close 명령 사용 필요)
    #[error("{0} 주문이 현재 포지션보다 작습니다. close 명령을 사용하세요")]
    SizeExceedsPosition(String),

    /// 스케일 사이징에 필요한 포지션 없음
    #[error("스케일 사이징에는 열린 포지션이 필요합니다: {0}")]
    NoPositionForScale(String),

    /// 열린 포지션 없음
    #[error("열린 포지션이 없습니다: {0}")]
    NoPosition(String),

    /// 사이징 파라미터 없음
    #[error("사이징 파라미터가 없습니다")]
    NoSizing,

    /// USD 환산 정보 없음
    #[error("USD 환산에 필요한 마켓 정보가 없습니다: {0}")]
    UsdConversionUnavailable(String),

    /// 수량 계산 불능 (기준 가격 0 등)
    #[error("주문 수량을 계산할 수 없습니다: {0}")]
    AmountUnresolvable(String),

    /// 최소 주문 수량 미만
    #[error("주문 수량이 최소 한도 미만입니다: {amount} < {min}")]
    BelowMinAmount { amount: Decimal, min: Decimal },

    /// 최대 주문 수량 초과
    #[error("주문 수량이 최대 한도를 초과합니다: {amount} > {max}")]
    AboveMaxAmount { amount: Decimal, max: Decimal },

    /// 수량 스텝 미만의 주문
    #[error("주문 수량이 수량 스텝보다 작습니다: {amount}")]
    OrderTooSmall { amount: Decimal },

    /// 주문 방향 결정 불능
    #[error("주문 방향을 결정할 수 없습니다: {0}")]
    SideUnknown(String),

    /// 단일 가격으로 해석할 수 없는 가격 표현식
    #[error("단일 가격으로 해석할 수 없는 표현식입니다: {0}")]
    PriceUnresolvable(String),
}

/// 파이프라인 최상위 에러.
#[derive(Debug, Clone, Error)]
pub enum TradeError {
    /// 파라미터 검증 실패
    #[error("검증 실패: {0}")]
    Validation(#[from] ValidationError),

    /// 리스크 점검 거부
    #[error("리스크 거부: {0}")]
    Risk(#[from] RiskRejection),

    /// 수량/가격 해석 실패
    #[error("사이징 실패: {0}")]
    Sizing(#[from] SizingError),

    /// 거래소 어댑터 에러
    #[error("어댑터 에러: {0}")]
    Adapter(#[from] AdapterError),
}

// =============================================================================
// 테스트
// =============================================================================
