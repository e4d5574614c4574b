//! 가격 표현식 해석.
//!
//! 파싱된 `PriceExpression`을 마켓별 실제 가격으로 변환합니다.
//! 상대 표현식의 기준가는 호출자가 앵커를 주지 않는 한 `+`는 매도
//! 1호가, `-`는 매수 1호가입니다. 해석된 가격은 항상 마켓 가격
//! 정밀도로 반올림됩니다.

use rust_decimal::Decimal;
use serde_json::json;

use relaybot_core::{Diagnostics, LayerBound, Market, PriceExpression, PriceOffset, Sign};

use crate::error::SizingError;

/// 상대 가격의 기본 기준가를 선택합니다.
fn default_reference(market: &Market, sign: Sign) -> Decimal {
    match sign {
        Sign::Plus => market.ask,
        Sign::Minus => market.bid,
    }
}

fn describe_offset(sign: Sign, offset: &PriceOffset) -> String {
    match offset {
        PriceOffset::Literal(value) => format!("{sign}{value}"),
        PriceOffset::Percent(percent) => format!("{sign}{percent}%"),
    }
}

/// 단일 가격 표현식을 해석합니다.
///
/// `reference`가 주어지면 상대 표현식의 기준가로 사용합니다
/// (잠재 포지션 평균가 앵커링 등).
///
/// # Errors
///
/// 부호 없는 퍼센트와 레이어드 표현식은 단일 가격으로 해석할 수
/// 없으므로 `SizingError::PriceUnresolvable`을 반환합니다.
pub fn resolve_price(
    market: &Market,
    expr: &PriceExpression,
    reference: Option<Decimal>,
    diag: &Diagnostics,
) -> Result<Decimal, SizingError> {
    match expr {
        PriceExpression::Absolute(value) => Ok(market.round_price(*value)),
        PriceExpression::Relative { sign, offset } => {
            let reference = reference.unwrap_or_else(|| default_reference(market, *sign));
            let resolved = market.round_price(sign.apply(reference, offset.magnitude(reference)));
            diag.debug(
                "convert_rel_price",
                json!([reference, describe_offset(*sign, offset), resolved]),
            );
            Ok(resolved)
        }
        PriceExpression::Percent(percent) => {
            Err(SizingError::PriceUnresolvable(format!("{percent}%")))
        }
        PriceExpression::Layered { .. } => {
            Err(SizingError::PriceUnresolvable("layered".to_string()))
        }
    }
}

/// 레이어드 경계 하나를 해석합니다.
fn resolve_bound(market: &Market, bound: &LayerBound) -> Decimal {
    match bound {
        LayerBound::Absolute(value) => *value,
        LayerBound::Relative { sign, offset } => {
            let reference = default_reference(market, *sign);
            sign.apply(reference, offset.magnitude(reference))
        }
    }
}

/// 레이어드 가격 표현식을 오름차순 가격 수열로 해석합니다.
///
/// 두 경계를 해석한 뒤 낮은 쪽에서 높은 쪽으로 `levels`개의 가격을
/// 균등 분할하고 각각을 가격 정밀도로 반올림합니다. `levels`는 파싱
/// 단계에서 2 이상이 보장됩니다.
pub fn resolve_layered(
    market: &Market,
    lower: &LayerBound,
    upper: &LayerBound,
    levels: u32,
    diag: &Diagnostics,
) -> Vec<Decimal> {
    let a = resolve_bound(market, lower);
    let b = resolve_bound(market, upper);
    let (min, max) = if a <= b { (a, b) } else { (b, a) };

    let step = (max - min) / Decimal::from(levels - 1);
    let prices: Vec<Decimal> = (0..levels)
        .map(|level| market.round_price(min + step * Decimal::from(level)))
        .collect();

    diag.debug("convert_layered", json!([levels, min, max]));
    prices
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use relaybot_core::{Diagnostics, MarketType, NullSink};

    fn market() -> Market {
        Market::new("BTC/USDT", MarketType::Derivative, dec!(59990), dec!(60010))
            .with_precision(dec!(0.5), dec!(0.001))
    }

    fn diag() -> Diagnostics {
        Diagnostics::new(Arc::new(NullSink))
    }

    #[test]
    fn test_absolute_price_is_rounded() {
        let expr = PriceExpression::parse("60000.3").unwrap();
        let price = resolve_price(&market(), &expr, None, &diag()).unwrap();
        assert_eq!(price, dec!(60000.5));
    }

    #[test]
    fn test_relative_plus_anchors_to_ask() {
        let expr = PriceExpression::parse("+100").unwrap();
        let price = resolve_price(&market(), &expr, None, &diag()).unwrap();
        assert_eq!(price, dec!(60110));
    }

    #[test]
    fn test_relative_minus_percent_anchors_to_bid() {
        // 59990 - 1% = 59390.1 -> 0.5 스텝 반올림
        let expr = PriceExpression::parse("-1%").unwrap();
        let price = resolve_price(&market(), &expr, None, &diag()).unwrap();
        assert_eq!(price, dec!(59390));
    }

    #[test]
    fn test_explicit_reference_overrides_book() {
        let expr = PriceExpression::parse("-2%").unwrap();
        let price = resolve_price(&market(), &expr, Some(dec!(50000)), &diag()).unwrap();
        assert_eq!(price, dec!(49000));
    }

    #[test]
    fn test_unsigned_percent_is_not_a_single_price() {
        let expr = PriceExpression::parse("2%").unwrap();
        let err = resolve_price(&market(), &expr, None, &diag()).unwrap_err();
        assert!(matches!(err, SizingError::PriceUnresolvable(_)));
    }

    #[test]
    fn test_layered_levels_ascending_and_rounded() {
        let expr = PriceExpression::parse("59000,60000,5").unwrap();
        let PriceExpression::Layered { lower, upper, levels } = expr else {
            panic!("레이어드 표현식이어야 합니다");
        };
        let prices = resolve_layered(&market(), &lower, &upper, levels, &diag());
        assert_eq!(
            prices,
            vec![dec!(59000), dec!(59250), dec!(59500), dec!(59750), dec!(60000)]
        );
    }

    #[test]
    fn test_layered_bounds_reordered() {
        // 경계 순서가 뒤집혀도 오름차순으로 해석
        let expr = PriceExpression::parse("60000,59000,3").unwrap();
        let PriceExpression::Layered { lower, upper, levels } = expr else {
            panic!("레이어드 표현식이어야 합니다");
        };
        let prices = resolve_layered(&market(), &lower, &upper, levels, &diag());
        assert_eq!(prices, vec![dec!(59000), dec!(59500), dec!(60000)]);
    }

    #[test]
    fn test_layered_relative_bounds_share_sign() {
        // "+1%,3%,2": 매도 1호가 기준 +1% / +3%
        let expr = PriceExpression::parse("+1%,3%,2").unwrap();
        let PriceExpression::Layered { lower, upper, levels } = expr else {
            panic!("레이어드 표현식이어야 합니다");
        };
        let prices = resolve_layered(&market(), &lower, &upper, levels, &diag());
        assert_eq!(prices, vec![dec!(60610), dec!(61810.5)]);
    }
}
