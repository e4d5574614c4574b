//! 명령 파라미터 정규화.
//!
//! 웹훅/API에서 들어온 문자열 키-값 쌍을 명령별 타입 구조체로 변환합니다.
//! 모든 표현식은 이 단계에서 한 번만 해석되며, 이후 파이프라인은
//! 해석된 타입만 다룹니다. 해석 불가능한 값은 즉시 `ValidationError`로
//! 거부되어 NaN 류의 오염이 하류로 전파되지 않습니다.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use relaybot_core::{
    MarginMode, OrderKind, OrderSide, PositionDirection, PriceExpression, SizingExpression,
    TimeInForce, TriggerType,
};

use crate::error::ValidationError;

// =============================================================================
// 원시 파라미터
// =============================================================================

/// 정규화 전의 원시 파라미터 집합.
///
/// 키는 소문자로 정규화되고 값은 앞뒤 공백이 제거됩니다.
/// 공백뿐인 값은 누락으로 취급합니다.
#[derive(Debug, Clone, Default)]
pub struct RawParams {
    entries: HashMap<String, String>,
}

impl RawParams {
    /// 빈 파라미터 집합을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 파라미터를 추가합니다.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().trim().to_lowercase();
        let value = value.into().trim().to_string();
        if !value.is_empty() {
            self.entries.insert(key, value);
        }
    }

    /// 파라미터 존재 여부.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 원시 문자열 값을 조회합니다.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// 필수 파라미터를 조회합니다.
    pub fn require(&self, key: &str) -> Result<&str, ValidationError> {
        self.get(key).ok_or_else(|| ValidationError::missing(key))
    }

    /// 십진수 값을 조회합니다.
    pub fn get_decimal(&self, key: &str) -> Result<Option<Decimal>, ValidationError> {
        match self.get(key) {
            Some(raw) => raw
                .parse::<Decimal>()
                .map(Some)
                .map_err(|err| ValidationError::invalid(key, err)),
            None => Ok(None),
        }
    }

    /// 불리언 값을 조회합니다 (`"true"` / `"false"`).
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ValidationError> {
        match self.get(key) {
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(ValidationError::invalid(key, "true 또는 false가 필요합니다")),
            },
            None => Ok(None),
        }
    }

    /// 수량 표현식을 조회합니다.
    pub fn get_sizing(&self, key: &str) -> Result<Option<SizingExpression>, ValidationError> {
        match self.get(key) {
            Some(raw) => SizingExpression::parse(raw)
                .map(Some)
                .map_err(|err| ValidationError::invalid(key, err)),
            None => Ok(None),
        }
    }

    /// 가격 표현식을 조회합니다 (레이어드 허용).
    pub fn get_price(&self, key: &str) -> Result<Option<PriceExpression>, ValidationError> {
        match self.get(key) {
            Some(raw) => PriceExpression::parse(raw)
                .map(Some)
                .map_err(|err| ValidationError::invalid(key, err)),
            None => Ok(None),
        }
    }

    /// 단일 가격 표현식을 조회합니다 (레이어드 거부).
    pub fn get_single_price(&self, key: &str) -> Result<Option<PriceExpression>, ValidationError> {
        match self.get_price(key)? {
            Some(expr) if expr.is_layered() => Err(ValidationError::invalid(
                key,
                "레이어드 표현식은 이 파라미터에 허용되지 않습니다",
            )),
            other => Ok(other),
        }
    }

    /// 절대 수량으로만 해석되는 레그 크기를 조회합니다.
    fn get_absolute(&self, key: &str) -> Result<Option<Decimal>, ValidationError> {
        match self.get_sizing(key)? {
            Some(SizingExpression::Absolute(value)) => Ok(Some(value)),
            Some(_) => Err(ValidationError::invalid(
                key,
                "절대 수량만 허용됩니다 (상대/배수 표현식 불가)",
            )),
            None => Ok(None),
        }
    }

    fn symbol(&self) -> Result<String, ValidationError> {
        Ok(self.require("symbol")?.to_uppercase())
    }

    fn direction(&self) -> Result<Option<PositionDirection>, ValidationError> {
        match self.get("direction") {
            Some(raw) => match raw.to_lowercase().as_str() {
                "long" => Ok(Some(PositionDirection::Long)),
                "short" => Ok(Some(PositionDirection::Short)),
                _ => Err(ValidationError::invalid(
                    "direction",
                    "long 또는 short가 필요합니다",
                )),
            },
            None => Ok(None),
        }
    }

    fn side(&self) -> Result<Option<OrderSide>, ValidationError> {
        match self.get("side") {
            Some(raw) => match raw.to_lowercase().as_str() {
                "buy" => Ok(Some(OrderSide::Buy)),
                "sell" => Ok(Some(OrderSide::Sell)),
                _ => Err(ValidationError::invalid("side", "buy 또는 sell이 필요합니다")),
            },
            None => Ok(None),
        }
    }

    fn time_in_force(&self) -> Result<Option<TimeInForce>, ValidationError> {
        match self.get("timeinforce") {
            Some(raw) => TimeInForce::parse(raw)
                .map(Some)
                .ok_or_else(|| ValidationError::invalid("timeinforce", "GTC/IOC/FOK가 필요합니다")),
            None => Ok(None),
        }
    }

    fn trigger_type(&self) -> Result<Option<TriggerType>, ValidationError> {
        match self.get("triggertype") {
            Some(raw) => TriggerType::parse(raw).map(Some).ok_or_else(|| {
                ValidationError::invalid("triggertype", "mark/last/index가 필요합니다")
            }),
            None => Ok(None),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = RawParams::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

// =============================================================================
// 명령 종류
// =============================================================================

/// 포지션 방향이 있는 주문 명령의 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCommand {
    /// 롱 포지션 목표 진입 (헤지 모드)
    Long,
    /// 숏 포지션 목표 진입 (헤지 모드)
    Short,
    /// 포지션 증가 매수 (단방향)
    Buy,
    /// 포지션 증가 매도 (단방향)
    Sell,
    /// 포지션 청산
    Close,
}

impl OrderCommand {
    /// 명령 이름 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderCommand::Long => "long",
            OrderCommand::Short => "short",
            OrderCommand::Buy => "buy",
            OrderCommand::Sell => "sell",
            OrderCommand::Close => "close",
        }
    }

    /// 목표 방향이 내재된 명령인지 확인합니다 (long/short).
    pub fn is_directional(&self) -> bool {
        matches!(self, OrderCommand::Long | OrderCommand::Short)
    }

    /// 포지션을 여는 명령인지 확인합니다.
    pub fn is_entry(&self) -> bool {
        !matches!(self, OrderCommand::Close)
    }

    /// 진입 주문의 체결 방향.
    pub fn entry_side(&self) -> Option<OrderSide> {
        match self {
            OrderCommand::Long | OrderCommand::Buy => Some(OrderSide::Buy),
            OrderCommand::Short | OrderCommand::Sell => Some(OrderSide::Sell),
            OrderCommand::Close => None,
        }
    }
}

impl std::fmt::Display for OrderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// 보호 주문 레그
// =============================================================================

/// 손절/익절 보호 레그 파라미터.
///
/// 진입 명령에 함께 실리거나 stoploss/takeprofit/tpsl 명령으로
/// 단독 지정됩니다. 레그 크기는 절대 수량만 허용되며, 익절의
/// `profitsize`에 한해 포지션 대비 퍼센트를 허용합니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtectionParams {
    /// 손절 트리거 가격
    pub stop_trigger: Option<PriceExpression>,
    /// 손절 지정가 (없으면 시장가 손절)
    pub stop_price: Option<PriceExpression>,
    /// 손절 수량 (베이스 통화)
    pub stop_base: Option<Decimal>,
    /// 손절 수량 (견적 통화)
    pub stop_quote: Option<Decimal>,
    /// 손절 수량 (USD)
    pub stop_usd: Option<Decimal>,
    /// 익절 트리거 가격
    pub profit_trigger: Option<PriceExpression>,
    /// 익절 지정가 (없으면 시장가 익절)
    pub profit_price: Option<PriceExpression>,
    /// 익절 수량 (베이스 통화)
    pub profit_base: Option<Decimal>,
    /// 익절 수량 (견적 통화)
    pub profit_quote: Option<Decimal>,
    /// 익절 수량 (USD)
    pub profit_usd: Option<Decimal>,
    /// 포지션 대비 익절 비율 (퍼센트)
    pub profit_size_percent: Option<Decimal>,
}

impl ProtectionParams {
    /// 원시 파라미터에서 보호 레그를 해석합니다.
    ///
    /// `stopsize`는 `stopquote`의 별칭이며 둘 다 주어지면 `stopsize`가
    /// 우선합니다. `profitsize`는 `%` 접미사가 있으면 포지션 비율,
    /// 없으면 견적 통화 수량입니다.
    pub fn from_raw(raw: &RawParams) -> Result<Self, ValidationError> {
        let mut params = Self {
            stop_trigger: raw.get_single_price("stoptrigger")?,
            stop_price: raw.get_single_price("stopprice")?,
            stop_base: raw.get_absolute("stopbase")?,
            stop_quote: raw.get_absolute("stopquote")?,
            stop_usd: raw.get_absolute("stopusd")?,
            profit_trigger: raw.get_single_price("profittrigger")?,
            profit_price: raw.get_single_price("profitprice")?,
            profit_base: raw.get_absolute("profitbase")?,
            profit_quote: raw.get_absolute("profitquote")?,
            profit_usd: raw.get_absolute("profitusd")?,
            profit_size_percent: None,
        };

        if let Some(value) = raw.get_absolute("stopsize")? {
            params.stop_quote = Some(value);
        }

        match raw.get_sizing("profitsize")? {
            Some(SizingExpression::Absolute(value)) => params.profit_quote = Some(value),
            Some(SizingExpression::Factor { sign: None, factor }) => {
                params.profit_size_percent = Some(factor * Decimal::ONE_HUNDRED);
            }
            Some(_) => {
                return Err(ValidationError::invalid(
                    "profitsize",
                    "절대 수량 또는 퍼센트만 허용됩니다",
                ));
            }
            None => {}
        }

        Ok(params)
    }

    /// 손절 레그 크기가 명시되었는지 확인합니다.
    pub fn has_stop_size(&self) -> bool {
        self.stop_base.is_some() || self.stop_quote.is_some() || self.stop_usd.is_some()
    }

    /// 익절 레그 크기가 명시되었는지 확인합니다.
    pub fn has_profit_size(&self) -> bool {
        self.profit_base.is_some()
            || self.profit_quote.is_some()
            || self.profit_usd.is_some()
            || self.profit_size_percent.is_some()
    }
}

// =============================================================================
// 진입 명령 파라미터
// =============================================================================

/// long/short/buy/sell 진입 명령 파라미터.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenParams {
    /// 마켓 심볼 (대문자 정규화)
    pub symbol: String,
    /// 헤지 모드 포지션 방향
    pub direction: Option<PositionDirection>,
    /// 사이징: size (USD 별칭)
    pub size: Option<SizingExpression>,
    /// 사이징: 베이스 통화 수량
    pub base: Option<SizingExpression>,
    /// 사이징: 견적 통화 수량
    pub quote: Option<SizingExpression>,
    /// 사이징: USD 수량
    pub usd: Option<SizingExpression>,
    /// 포지션 배수 스케일 (DCA)
    pub scale: Option<Decimal>,
    /// 상대 사이징의 최대 포지션 크기
    pub max_size: Option<Decimal>,
    /// 시그널 강도 (100 미만이면 수량 감쇠)
    pub signal_size: Option<Decimal>,
    /// 주문 가격 (없으면 시장가, 레이어드 허용)
    pub price: Option<PriceExpression>,
    /// 포스트 온리 주문 여부
    pub post_only: bool,
    /// 주문 유효 기간
    pub time_in_force: Option<TimeInForce>,
    /// 주문 태그
    pub tag: Option<String>,
    /// 제출 전 기존 주문 전체 취소 여부
    pub cancel_all: bool,
    /// 보호 레그 파라미터
    pub protection: ProtectionParams,
}

impl OpenParams {
    /// 원시 파라미터에서 진입 명령 파라미터를 해석합니다.
    pub fn from_raw(raw: &RawParams) -> Result<Self, ValidationError> {
        Ok(Self {
            symbol: raw.symbol()?,
            direction: raw.direction()?,
            size: raw.get_sizing("size")?,
            base: raw.get_sizing("base")?,
            quote: raw.get_sizing("quote")?,
            usd: raw.get_sizing("usd")?,
            scale: parse_scale(raw.get("scale"))?,
            max_size: raw.get_decimal("maxsize")?,
            signal_size: raw.get_decimal("signalsize")?,
            price: raw.get_price("price")?,
            post_only: raw.get_bool("post")?.unwrap_or(false),
            time_in_force: raw.time_in_force()?,
            tag: raw.get("tag").map(str::to_string),
            cancel_all: raw.get_bool("cancelall")?.unwrap_or(false),
            protection: ProtectionParams::from_raw(raw)?,
        })
    }

    /// 사이징 파라미터가 하나라도 주어졌는지 확인합니다.
    pub fn has_sizing(&self) -> bool {
        self.size.is_some()
            || self.base.is_some()
            || self.quote.is_some()
            || self.usd.is_some()
            || self.scale.is_some()
    }
}

/// `scale` 값을 해석합니다. `"2"`와 `"2x"` 모두 허용합니다.
fn parse_scale(raw: Option<&str>) -> Result<Option<Decimal>, ValidationError> {
    match raw {
        Some(value) => value
            .trim_end_matches(['x', 'X'])
            .parse::<Decimal>()
            .map(Some)
            .map_err(|err| ValidationError::invalid("scale", err)),
        None => Ok(None),
    }
}

// =============================================================================
// 청산 명령 파라미터
// =============================================================================

/// close 명령 파라미터.
///
/// 사이징이 없으면 전량 청산으로 간주합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseParams {
    /// 마켓 심볼 (대문자 정규화)
    pub symbol: String,
    /// 헤지 모드 포지션 방향
    pub direction: Option<PositionDirection>,
    /// 사이징: size (USD 별칭)
    pub size: Option<SizingExpression>,
    /// 사이징: 베이스 통화 수량
    pub base: Option<SizingExpression>,
    /// 사이징: 견적 통화 수량
    pub quote: Option<SizingExpression>,
    /// 사이징: USD 수량
    pub usd: Option<SizingExpression>,
    /// 청산 가격 (없으면 시장가)
    pub price: Option<PriceExpression>,
    /// 주문 태그
    pub tag: Option<String>,
    /// 손실 청산 가드 우회 여부
    pub force: bool,
    /// 감소 전용 플래그
    pub reduce: bool,
    /// 제출 전 기존 주문 전체 취소 여부
    ///
    /// 전량 청산(size 누락 또는 `"100%"`)이면 강제로 켜집니다.
    pub cancel_all: bool,
}

impl CloseParams {
    /// 원시 파라미터에서 청산 명령 파라미터를 해석합니다.
    pub fn from_raw(raw: &RawParams) -> Result<Self, ValidationError> {
        let size = raw.get_sizing("size")?;
        let full_close = match size {
            None => true,
            Some(SizingExpression::Factor { sign: None, factor }) => factor == Decimal::ONE,
            Some(_) => false,
        };
        Ok(Self {
            symbol: raw.symbol()?,
            direction: raw.direction()?,
            size,
            base: raw.get_sizing("base")?,
            quote: raw.get_sizing("quote")?,
            usd: raw.get_sizing("usd")?,
            price: raw.get_price("price")?,
            tag: raw.get("tag").map(str::to_string),
            force: raw.get_bool("force")?.unwrap_or(false),
            reduce: raw.get_bool("reduce")?.unwrap_or(false),
            cancel_all: raw.get_bool("cancelall")?.unwrap_or(false) || full_close,
        })
    }
}

// =============================================================================
// 조건부 명령 파라미터
// =============================================================================

/// stoploss/takeprofit/trailstop 조건부 명령 파라미터.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalParams {
    /// 마켓 심볼 (대문자 정규화)
    pub symbol: String,
    /// 헤지 모드 포지션 방향
    pub direction: Option<PositionDirection>,
    /// 명시적 주문 방향 (없으면 트리거 위치로 추론)
    pub side: Option<OrderSide>,
    /// 감소 전용 플래그 (기본 true)
    pub reduce: bool,
    /// 주문 태그
    pub tag: Option<String>,
    /// 같은 종류의 기존 조건부 주문 취소 여부
    pub cancel_all: bool,
    /// 트리거 가격 기준
    pub trigger_type: Option<TriggerType>,
    /// 트레일링 간격 (trailstop 전용)
    pub trailstop: Option<PriceExpression>,
    /// 손절/익절 레그 파라미터
    pub protection: ProtectionParams,
}

impl ConditionalParams {
    /// 원시 파라미터에서 조건부 명령 파라미터를 해석합니다.
    ///
    /// 레그 크기가 전혀 없고 `size`가 주어지면 견적 통화 수량으로
    /// 양쪽 레그에 적용합니다.
    pub fn from_raw(raw: &RawParams) -> Result<Self, ValidationError> {
        let mut protection = ProtectionParams::from_raw(raw)?;

        if let Some(size) = raw.get_absolute("size")? {
            if !protection.has_stop_size() {
                protection.stop_quote = Some(size);
            }
            if !protection.has_profit_size() {
                protection.profit_quote = Some(size);
            }
        }

        Ok(Self {
            symbol: raw.symbol()?,
            direction: raw.direction()?,
            side: raw.side()?,
            reduce: raw.get_bool("reduce")?.unwrap_or(true),
            tag: raw.get("tag").map(str::to_string),
            cancel_all: raw.get_bool("cancelall")?.unwrap_or(false),
            trigger_type: raw.trigger_type()?,
            trailstop: raw.get_single_price("trailstop")?,
            protection,
        })
    }
}

// =============================================================================
// 레버리지 / 취소 명령 파라미터
// =============================================================================

/// leverage/globalleverage 명령 파라미터.
#[derive(Debug, Clone, PartialEq)]
pub struct LeverageParams {
    /// 마켓 심볼 (globalleverage는 생략)
    pub symbol: Option<String>,
    /// 레버리지 배수 (기본 20, `"20x"` 허용)
    pub leverage: Decimal,
    /// 마진 모드
    pub margin_mode: MarginMode,
}

impl LeverageParams {
    /// 원시 파라미터에서 레버리지 명령 파라미터를 해석합니다.
    pub fn from_raw(raw: &RawParams) -> Result<Self, ValidationError> {
        let leverage = match raw.get("leverage") {
            Some(value) => value
                .trim_end_matches(['x', 'X'])
                .parse::<Decimal>()
                .map_err(|err| ValidationError::invalid("leverage", err))?,
            None => dec!(20),
        };
        let margin_mode = MarginMode::parse(raw.require("type")?)
            .ok_or_else(|| ValidationError::invalid("type", "cross 또는 isolated가 필요합니다"))?;
        Ok(Self {
            symbol: raw.get("symbol").map(str::to_uppercase),
            leverage,
            margin_mode,
        })
    }
}

/// cancel 명령 파라미터.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelParams {
    /// 마켓 심볼 (대문자 정규화)
    pub symbol: String,
    /// 취소할 주문 ID
    pub id: String,
}

impl CancelParams {
    /// 원시 파라미터에서 취소 명령 파라미터를 해석합니다.
    pub fn from_raw(raw: &RawParams) -> Result<Self, ValidationError> {
        Ok(Self {
            symbol: raw.symbol()?,
            id: raw.require("id")?.to_string(),
        })
    }
}

/// cancelall 명령 파라미터.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAllParams {
    /// 마켓 심볼 (대문자 정규화)
    pub symbol: String,
    /// 취소할 주문 종류 (없으면 전체)
    pub kind: Option<OrderKind>,
}

impl CancelAllParams {
    /// 원시 파라미터에서 전체 취소 명령 파라미터를 해석합니다.
    pub fn from_raw(raw: &RawParams) -> Result<Self, ValidationError> {
        let kind = match raw.get("type") {
            Some(value) => Some(OrderKind::parse(value).ok_or_else(|| {
                ValidationError::invalid("type", "알 수 없는 주문 종류입니다")
            })?),
            None => None,
        };
        Ok(Self {
            symbol: raw.symbol()?,
            kind,
        })
    }
}

// =============================================================================
// 테스트
// =============================================================================
