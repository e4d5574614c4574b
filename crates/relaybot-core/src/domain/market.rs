//! 거래소 중립 마켓 스냅샷.
//!
//! 사이징/가격 해석 파이프라인이 참조하는 마켓 정보를 통일된 형식으로 표현합니다.
//! 각 거래소 어댑터는 자체 마켓 응답을 이 타입으로 변환합니다.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

// =============================================================================
// 스텝 반올림 헬퍼
// =============================================================================

/// 값을 스텝 단위로 반올림합니다 (0.5는 항상 0에서 먼 쪽으로).
///
/// 스텝이 0 이하이면 값을 그대로 반환합니다.
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * step
}

/// 값을 스텝 단위로 내림합니다.
///
/// 현물 수량처럼 잔고를 초과하면 안 되는 값에 사용합니다.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

// =============================================================================
// 마켓 유형
// =============================================================================

/// 마켓 유형 (현물 / 파생).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    /// 현물 마켓
    Spot,
    /// 파생 마켓 (선물/스왑)
    Derivative,
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketType::Spot => write!(f, "spot"),
            MarketType::Derivative => write!(f, "derivative"),
        }
    }
}

// =============================================================================
// 정밀도 / 수량 한도
// =============================================================================

/// 가격/수량 스텝 정밀도.
///
/// 거래소가 허용하는 최소 증분 단위입니다 (예: 가격 0.01, 수량 0.001).
/// 스텝이 0이면 정밀도 처리를 생략합니다.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MarketPrecision {
    /// 가격 스텝
    pub price: Decimal,
    /// 수량 스텝
    pub amount: Decimal,
}

/// 주문 수량 한도.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AmountLimits {
    /// 최소 주문 수량
    pub min: Decimal,
    /// 최대 주문 수량 (일부 거래소에서 미제공)
    pub max: Option<Decimal>,
}

// =============================================================================
// USD 환산 단가
// =============================================================================

/// 기초/호가 자산의 단위당 USD 환산 단가.
///
/// 호가 자산이 USD 스테이블코인이 아닌 마켓에서 USD 사이징을
/// 변환할 때 사용합니다.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsdConversion {
    /// 기초 자산 1단위의 USD 가격
    pub base: Decimal,
    /// 호가 자산 1단위의 USD 가격
    pub quote: Decimal,
}

// =============================================================================
// 마켓
// =============================================================================

/// 거래소 중립 마켓 정보.
///
/// 최우선 호가, 정밀도, 수량 한도, 계약 크기 등
/// 주문 구성에 필요한 마켓 메타데이터를 담습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// 거래소 네이티브 마켓 ID (예: "BTCUSDT")
    pub id: String,
    /// 통일 심볼 (예: "BTC/USDT")
    pub symbol: String,
    /// 기초 자산 (예: "BTC")
    pub base: String,
    /// 호가 자산 (예: "USDT")
    pub quote: String,
    /// 마켓 유형
    pub market_type: MarketType,
    /// 매수 1호가
    pub bid: Decimal,
    /// 매도 1호가
    pub ask: Decimal,
    /// 평균가 (미제공 시 bid/ask 중간값 사용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<Decimal>,
    /// 가격/수량 스텝 정밀도
    pub precision: MarketPrecision,
    /// 주문 수량 한도
    pub limits: AmountLimits,
    /// 계약 1개가 나타내는 기초 자산 수량 (파생 마켓)
    pub contract_size: Decimal,
    /// USD 환산 단가 (미제공 시 USD 사이징 불가)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd: Option<UsdConversion>,
}

impl Market {
    /// 새 마켓 정보를 생성합니다.
    ///
    /// 기초/호가 자산은 심볼에서 분리합니다 ("BTC/USDT:USDT" 형식 지원).
    pub fn new(symbol: impl Into<String>, market_type: MarketType, bid: Decimal, ask: Decimal) -> Self {
        let symbol = symbol.into();
        let (base, quote) = split_symbol(&symbol);
        Self {
            id: symbol.clone(),
            symbol,
            base,
            quote,
            market_type,
            bid,
            ask,
            avg: None,
            precision: MarketPrecision::default(),
            limits: AmountLimits::default(),
            contract_size: Decimal::ONE,
            usd: None,
        }
    }

    /// 거래소 네이티브 ID를 설정합니다.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 정밀도를 설정합니다.
    pub fn with_precision(mut self, price: Decimal, amount: Decimal) -> Self {
        self.precision = MarketPrecision { price, amount };
        self
    }

    /// 수량 한도를 설정합니다.
    pub fn with_limits(mut self, min: Decimal, max: Option<Decimal>) -> Self {
        self.limits = AmountLimits { min, max };
        self
    }

    /// 계약 크기를 설정합니다.
    pub fn with_contract_size(mut self, contract_size: Decimal) -> Self {
        self.contract_size = contract_size;
        self
    }

    /// USD 환산 단가를 설정합니다.
    pub fn with_usd(mut self, base: Decimal, quote: Decimal) -> Self {
        self.usd = Some(UsdConversion { base, quote });
        self
    }

    /// 평균가를 설정합니다.
    pub fn with_avg(mut self, avg: Decimal) -> Self {
        self.avg = Some(avg);
        self
    }

    /// 현물 마켓 여부.
    pub fn is_spot(&self) -> bool {
        self.market_type == MarketType::Spot
    }

    /// 평균가. 미제공 시 bid/ask 중간값을 반환합니다.
    pub fn average_price(&self) -> Decimal {
        self.avg
            .unwrap_or_else(|| (self.bid + self.ask) / Decimal::TWO)
    }

    /// 가격을 가격 스텝으로 반올림합니다.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        round_to_step(price, self.precision.price)
    }

    /// 수량을 수량 스텝으로 반올림합니다.
    pub fn round_amount(&self, amount: Decimal) -> Decimal {
        round_to_step(amount, self.precision.amount)
    }

    /// 수량을 수량 스텝으로 내림합니다.
    pub fn floor_amount(&self, amount: Decimal) -> Decimal {
        floor_to_step(amount, self.precision.amount)
    }

    /// 수량을 마켓 유형에 맞게 정밀도 처리합니다.
    ///
    /// 현물은 잔고 초과를 막기 위해 내림, 파생은 반올림합니다.
    pub fn amount_to_precision(&self, amount: Decimal) -> Decimal {
        match self.market_type {
            MarketType::Spot => self.floor_amount(amount),
            MarketType::Derivative => self.round_amount(amount),
        }
    }
}

/// 심볼을 기초/호가 자산으로 분리합니다.
///
/// "BTC/USDT" -> ("BTC", "USDT"), "BTC/USD:BTC" -> ("BTC", "USD").
/// 구분자가 없으면 전체를 기초 자산으로 취급합니다.
fn split_symbol(symbol: &str) -> (String, String) {
    match symbol.split_once('/') {
        Some((base, rest)) => {
            let quote = rest.split_once(':').map_or(rest, |(q, _)| q);
            (base.to_string(), quote.to_string())
        }
        None => (symbol.to_string(), String::new()),
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_round_to_step_midpoint_away_from_zero() {
        // 12.5 스텝 -> 13 스텝 (은행가 반올림이면 12가 되므로 구분됨)
        assert_eq!(round_to_step(dec!(0.125), dec!(0.01)), dec!(0.13));
        assert_eq!(round_to_step(dec!(0.135), dec!(0.01)), dec!(0.14));
        assert_eq!(round_to_step(dec!(102.4), dec!(1)), dec!(102));
        assert_eq!(round_to_step(dec!(102.5), dec!(1)), dec!(103));
    }

    #[test]
    fn test_round_to_step_zero_step_passthrough() {
        assert_eq!(round_to_step(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
        assert_eq!(floor_to_step(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
    }

    #[test]
    fn test_floor_to_step() {
        assert_eq!(floor_to_step(dec!(0.0199), dec!(0.01)), dec!(0.01));
        assert_eq!(floor_to_step(dec!(0.0999), dec!(0.001)), dec!(0.099));
    }

    #[test]
    fn test_market_symbol_split() {
        let market = Market::new("BTC/USDT", MarketType::Derivative, dec!(49990), dec!(50010));
        assert_eq!(market.base, "BTC");
        assert_eq!(market.quote, "USDT");

        let inverse = Market::new("BTC/USD:BTC", MarketType::Derivative, dec!(49990), dec!(50010));
        assert_eq!(inverse.base, "BTC");
        assert_eq!(inverse.quote, "USD");
    }

    #[test]
    fn test_average_price_fallback() {
        let market = Market::new("BTC/USDT", MarketType::Spot, dec!(49990), dec!(50010));
        assert_eq!(market.average_price(), dec!(50000));

        let with_avg = market.with_avg(dec!(50005));
        assert_eq!(with_avg.average_price(), dec!(50005));
    }

    #[test]
    fn test_amount_to_precision_spot_floors() {
        let market = Market::new("BTC/USDT", MarketType::Spot, dec!(49990), dec!(50010))
            .with_precision(dec!(0.01), dec!(0.001));
        // 현물: 0.0199 -> 0.019 (내림)
        assert_eq!(market.amount_to_precision(dec!(0.0199)), dec!(0.019));
    }

    #[test]
    fn test_amount_to_precision_derivative_rounds() {
        let market = Market::new("BTC/USDT", MarketType::Derivative, dec!(49990), dec!(50010))
            .with_precision(dec!(0.01), dec!(0.001));
        // 파생: 0.0199 -> 0.02 (반올림)
        assert_eq!(market.amount_to_precision(dec!(0.0199)), dec!(0.02));
    }
}
