//! 주문 기술자 및 주문 관련 공통 타입.
//!
//! 이 모듈은 주문 파이프라인이 생성/소비하는 타입을 정의합니다:
//! - `OrderDescriptor` - 거래소 제출 전의 정규화된 주문
//! - `SubmittedOrder` - 거래소가 접수한 주문의 스냅샷
//! - `OrderSide`, `OrderKind`, `TriggerType` 등 주문 어휘

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// 주문 방향 / 유형
// =============================================================================

/// 주문 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl OrderSide {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// 와이어 문자열 표현.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// 시장가 주문
    Market,
    /// 지정가 주문
    Limit,
    /// 손절 주문 (트리거 도달 시 발동)
    StopLoss,
    /// 익절 주문 (트리거 도달 시 발동)
    TakeProfit,
    /// 트레일링 스톱 주문
    TrailingStop,
}

impl OrderKind {
    /// 와이어 문자열 표현.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "market",
            OrderKind::Limit => "limit",
            OrderKind::StopLoss => "stop_loss",
            OrderKind::TakeProfit => "take_profit",
            OrderKind::TrailingStop => "trailing_stop",
        }
    }

    /// 문자열에서 주문 유형을 해석합니다. 인식 불가 시 None.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "market" => Some(OrderKind::Market),
            "limit" => Some(OrderKind::Limit),
            "stoploss" | "stop_loss" => Some(OrderKind::StopLoss),
            "takeprofit" | "take_profit" => Some(OrderKind::TakeProfit),
            "trailstop" | "trailing_stop" => Some(OrderKind::TrailingStop),
            _ => None,
        }
    }

    /// 트리거 가격을 가진 조건부 주문인지 확인합니다.
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            OrderKind::StopLoss | OrderKind::TakeProfit | OrderKind::TrailingStop
        )
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 조건부 주문의 트리거 기준 가격.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// 마크 가격 기준
    Mark,
    /// 최종 체결가 기준
    Last,
    /// 인덱스 가격 기준
    Index,
}

impl TriggerType {
    /// 와이어 문자열 표현.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Mark => "mark_price",
            TriggerType::Last => "last_price",
            TriggerType::Index => "index_price",
        }
    }

    /// 문자열에서 트리거 기준을 해석합니다. 인식 불가 시 None.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "mark" | "mark_price" => Some(TriggerType::Mark),
            "last" | "last_price" => Some(TriggerType::Last),
            "index" | "index_price" => Some(TriggerType::Index),
            _ => None,
        }
    }
}

impl Default for TriggerType {
    fn default() -> Self {
        TriggerType::Mark
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 지정가 주문의 유효 기간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// 취소 전까지 유효 (거래소 기본값)
    Gtc,
    /// 즉시 체결 가능분만 체결, 잔량 취소
    Ioc,
    /// 전량 즉시 체결 또는 전체 취소
    Fok,
}

impl TimeInForce {
    /// 문자열에서 유효 기간을 해석합니다. 인식 불가 시 None.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "gtc" => Some(TimeInForce::Gtc),
            "ioc" => Some(TimeInForce::Ioc),
            "fok" => Some(TimeInForce::Fok),
            _ => None,
        }
    }

    /// 와이어 문자열 표현.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// 사이징 단위
// =============================================================================

/// 요청 측 사이징 단위.
///
/// 명령에 수량이 어떤 단위로 표기되었는지를 나타냅니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeUnit {
    /// 기초 자산 수량
    Base,
    /// 호가 자산 수량
    Quote,
    /// USD 환산 금액
    Usd,
}

impl std::fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeUnit::Base => write!(f, "base"),
            SizeUnit::Quote => write!(f, "quote"),
            SizeUnit::Usd => write!(f, "usd"),
        }
    }
}

/// 거래소 측 주문 수량 표기 단위.
///
/// 거래소가 주문 수량을 기초 자산으로 받는지 호가 자산으로 받는지를
/// 나타냅니다. 어댑터 설정에서 제공됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSizing {
    /// 기초 자산 수량으로 주문
    Base,
    /// 호가 자산 수량으로 주문
    Quote,
}

impl From<OrderSizing> for SizeUnit {
    fn from(sizing: OrderSizing) -> Self {
        match sizing {
            OrderSizing::Base => SizeUnit::Base,
            OrderSizing::Quote => SizeUnit::Quote,
        }
    }
}

// =============================================================================
// 포지션 모드
// =============================================================================

/// 파생 계정의 포지션 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    /// 헤지 모드 (롱/숏 동시 보유)
    Hedged,
    /// 단방향 모드
    OneWay,
}

impl PositionMode {
    /// 헤지 모드 여부.
    pub fn is_hedged(&self) -> bool {
        *self == PositionMode::Hedged
    }
}

/// 파생 포지션의 마진 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    /// 교차 마진
    Cross,
    /// 격리 마진
    Isolated,
}

impl MarginMode {
    /// 문자열에서 마진 모드를 해석합니다.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cross" => Some(MarginMode::Cross),
            "isolated" => Some(MarginMode::Isolated),
            _ => None,
        }
    }

    /// 와이어 문자열 표현.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMode::Cross => "cross",
            MarginMode::Isolated => "isolated",
        }
    }
}

impl std::fmt::Display for MarginMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// 주문 기술자 (OrderDescriptor)
// =============================================================================

/// 거래소 제출 전의 정규화된 주문.
///
/// 사이징/가격 해석이 끝난 뒤의 최종 형태이며, 어댑터는 이 기술자를
/// 거래소 네이티브 요청으로 변환합니다. `params`는 어댑터별 추가
/// 파라미터의 통로입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDescriptor {
    /// 통일 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: OrderSide,
    /// 주문 유형
    pub kind: OrderKind,
    /// 주문 수량 (거래소 사이징 단위 기준)
    pub amount: Decimal,
    /// 지정가 (시장가 주문이면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// 트리거 가격 (조건부 주문)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<Decimal>,
    /// 트리거 기준 가격 (조건부 주문)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<TriggerType>,
    /// 트레일링 오프셋 (부호 포함, 트레일링 스톱 전용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_by: Option<Decimal>,
    /// 포지션 축소 전용 여부
    pub reduce_only: bool,
    /// 메이커 전용 여부 (지정가 주문)
    pub post_only: bool,
    /// 유효 기간 (None이면 거래소 기본값)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
    /// 주문 태그 (레이어드 주문의 레벨 식별 등)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// 어댑터별 추가 파라미터
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl OrderDescriptor {
    /// 시장가 주문 기술자를 생성합니다.
    pub fn market(symbol: impl Into<String>, side: OrderSide, amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            amount,
            price: None,
            trigger_price: None,
            trigger_type: None,
            trail_by: None,
            reduce_only: false,
            post_only: false,
            time_in_force: None,
            tag: None,
            params: serde_json::Map::new(),
        }
    }

    /// 지정가 주문 기술자를 생성합니다.
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> Self {
        let mut order = Self::market(symbol, side, amount);
        order.kind = OrderKind::Limit;
        order.price = Some(price);
        order
    }

    /// 조건부 주문 기술자를 생성합니다.
    ///
    /// 지정가가 주어지면 트리거 후 지정가로, 없으면 시장가로 체결됩니다.
    pub fn conditional(
        symbol: impl Into<String>,
        side: OrderSide,
        kind: OrderKind,
        amount: Decimal,
        trigger_price: Decimal,
    ) -> Self {
        let mut order = Self::market(symbol, side, amount);
        order.kind = kind;
        order.trigger_price = Some(trigger_price);
        order.trigger_type = Some(TriggerType::default());
        order
    }

    /// 지정가를 설정합니다.
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// 트리거 기준 가격을 설정합니다.
    pub fn with_trigger_type(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = Some(trigger_type);
        self
    }

    /// 트레일링 오프셋을 설정합니다.
    pub fn with_trail_by(mut self, trail_by: Decimal) -> Self {
        self.trail_by = Some(trail_by);
        self
    }

    /// 포지션 축소 전용 여부를 설정합니다.
    pub fn with_reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }

    /// 메이커 전용 여부를 설정합니다.
    pub fn with_post_only(mut self, post_only: bool) -> Self {
        self.post_only = post_only;
        self
    }

    /// 유효 기간을 설정합니다.
    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = Some(time_in_force);
        self
    }

    /// 주문 태그를 설정합니다.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// 어댑터별 파라미터를 추가합니다.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// 조건부 주문 여부.
    pub fn is_conditional(&self) -> bool {
        self.kind.is_conditional()
    }
}

// =============================================================================
// 제출된 주문 (SubmittedOrder)
// =============================================================================

/// 주문 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// 미체결 (대기 중)
    Open,
    /// 전량 체결
    Closed,
    /// 취소됨
    Canceled,
}

/// 거래소가 접수한 주문의 스냅샷.
///
/// 미체결 주문 조회와 주문 이력 조회 양쪽에서 사용됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedOrder {
    /// 거래소 주문 ID
    pub id: String,
    /// 통일 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: OrderSide,
    /// 주문 유형
    pub kind: OrderKind,
    /// 주문 상태
    pub status: OrderStatus,
    /// 지정가 (시장가 주문이면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// 주문 수량
    pub amount: Decimal,
    /// 체결 수량
    pub filled: Decimal,
    /// 주문 시각
    pub timestamp: DateTime<Utc>,
}

impl SubmittedOrder {
    /// 미체결 주문 여부.
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    /// 포지션을 여는 방향의 일반 주문인지 확인합니다.
    ///
    /// 잠재 포지션 계산 시 시장가/지정가 주문만 집계 대상입니다.
    pub fn is_plain(&self) -> bool {
        matches!(self.kind, OrderKind::Market | OrderKind::Limit)
    }
}

// =============================================================================
// 테스트
// =============================================================================
