//! 주문 기술자 조립.
//!
//! 해석된 수량(`SizeOutcome`)과 가격을 거래소 주문 단위로 변환하고
//! `OrderDescriptor`를 만듭니다. 수량 변환은 거래소 어댑터의 기본
//! 주문 단위(base/quote)를 따르며, 변환 기준가는 지정가 > 트리거 >
//! 방향별 호가 > 평균가 순으로 선택됩니다.

use rust_decimal::Decimal;
use serde_json::json;

use relaybot_core::{
    Diagnostics, Market, OrderDescriptor, OrderKind, OrderSide, OrderSizing, SizeUnit,
    TimeInForce, TriggerType,
};

use crate::error::SizingError;
use crate::size::SizeOutcome;

// =============================================================================
// 수량 변환
// =============================================================================

/// 사이징 단위의 수량을 거래소 주문 수량으로 변환합니다.
///
/// USD 수량은 견적 통화가 스테이블코인이면 견적 수량으로 그대로
/// 쓰고, 아니면 마켓의 USD 환산율로 변환합니다. 최종 수량은 마켓의
/// 최소/최대 한도를 점검한 뒤 수량 정밀도로 맞춥니다 (현물은 내림,
/// 파생상품은 반올림).
///
/// # Errors
///
/// USD 환산 불가, 기준가 0, 한도 위반은 `SizingError`로 반환됩니다.
#[allow(clippy::too_many_arguments)]
pub fn convert_amount(
    market: &Market,
    order_sizing: OrderSizing,
    unit: SizeUnit,
    value: Decimal,
    side: Option<OrderSide>,
    price: Option<Decimal>,
    stablecoins: &[String],
    diag: &Diagnostics,
) -> Result<Decimal, SizingError> {
    let reference = price.unwrap_or_else(|| match side {
        Some(OrderSide::Buy) => market.ask,
        Some(OrderSide::Sell) => market.bid,
        None => market.average_price(),
    });

    let mut base_size: Option<Decimal> = None;
    let mut quote_size: Option<Decimal> = None;
    match unit {
        SizeUnit::Base => base_size = Some(value),
        SizeUnit::Quote => quote_size = Some(value),
        SizeUnit::Usd => {
            let stable_quote = stablecoins
                .iter()
                .any(|coin| coin.eq_ignore_ascii_case(&market.quote));
            if stable_quote {
                quote_size = Some(value);
                diag.debug("convert_size_usd", json!([market.quote, value]));
            } else if let Some(usd) = &market.usd {
                if usd.base.is_zero() || usd.quote.is_zero() {
                    diag.error("convert_size_usd", json!([market.symbol]));
                    return Err(SizingError::UsdConversionUnavailable(market.symbol.clone()));
                }
                base_size = Some(value / usd.base);
                quote_size = Some(value / usd.quote);
                diag.debug("convert_size_pair", json!([market.symbol, value]));
            } else {
                diag.error("convert_size_usd", json!([market.symbol]));
                return Err(SizingError::UsdConversionUnavailable(market.symbol.clone()));
            }
        }
    }

    let amount = match order_sizing {
        OrderSizing::Base => {
            let amount = match (base_size, quote_size) {
                (Some(base), _) => base,
                (None, Some(quote)) => {
                    if reference.is_zero() {
                        diag.error("order_size_nan", json!([market.symbol]));
                        return Err(SizingError::AmountUnresolvable(market.symbol.clone()));
                    }
                    quote / reference
                }
                (None, None) => {
                    diag.error("order_size_nan", json!([market.symbol]));
                    return Err(SizingError::AmountUnresolvable(market.symbol.clone()));
                }
            };
            diag.debug("exchange_size_base", json!([market.base, amount]));
            amount
        }
        OrderSizing::Quote => {
            let quote = match (quote_size, base_size) {
                (Some(quote), _) => quote,
                (None, Some(base)) => base * reference,
                (None, None) => {
                    diag.error("order_size_nan", json!([market.symbol]));
                    return Err(SizingError::AmountUnresolvable(market.symbol.clone()));
                }
            };
            if market.contract_size.is_zero() {
                diag.error("order_size_nan", json!([market.symbol]));
                return Err(SizingError::AmountUnresolvable(market.symbol.clone()));
            }
            let amount = quote / market.contract_size;
            diag.debug("exchange_size_quote", json!([market.quote, amount]));
            amount
        }
    };

    if amount.abs() < market.limits.min {
        diag.error(
            "order_size_min",
            json!([amount, { "min": market.limits.min, "price": reference }]),
        );
        return Err(SizingError::BelowMinAmount {
            amount,
            min: market.limits.min,
        });
    }
    if let Some(max) = market.limits.max {
        if amount.abs() > max {
            diag.error(
                "order_size_max",
                json!([amount, { "max": max, "price": reference }]),
            );
            return Err(SizingError::AboveMaxAmount { amount, max });
        }
    }

    Ok(market.amount_to_precision(amount))
}

// =============================================================================
// 일반 주문
// =============================================================================

/// 일반 주문의 부가 속성.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderOptions<'a> {
    /// 감소 전용 (청산 주문 전용)
    pub reduce: bool,
    /// 포스트 온리
    pub post_only: bool,
    /// 주문 유효 기간 (GTC는 생략)
    pub time_in_force: Option<TimeInForce>,
    /// 주문 태그
    pub tag: Option<&'a str>,
}

/// 시장가/지정가 주문 기술자를 만듭니다.
///
/// 가격이 있으면 지정가, 없으면 시장가입니다. 감소 전용 플래그는
/// 청산으로 귀결되는 주문에만 적용됩니다.
///
/// # Errors
///
/// 변환된 수량이 수량 정밀도보다 작으면
/// `SizingError::OrderTooSmall`입니다.
pub fn build_standard(
    market: &Market,
    order_sizing: OrderSizing,
    outcome: &SizeOutcome,
    price: Option<Decimal>,
    options: &OrderOptions<'_>,
    stablecoins: &[String],
    diag: &Diagnostics,
) -> Result<OrderDescriptor, SizingError> {
    let amount = convert_amount(
        market,
        order_sizing,
        outcome.unit,
        outcome.order_size,
        Some(outcome.side),
        price,
        stablecoins,
        diag,
    )?;
    if amount.abs() < market.precision.amount {
        diag.error("order_too_small", json!([amount, market.precision.amount]));
        return Err(SizingError::OrderTooSmall { amount });
    }

    let mut order = match price {
        Some(price) => OrderDescriptor::limit(&market.symbol, outcome.side, amount, price),
        None => OrderDescriptor::market(&market.symbol, outcome.side, amount),
    };
    if outcome.is_close && options.reduce {
        order = order.with_reduce_only(true);
    }
    if options.post_only {
        order = order.with_post_only(true);
    }
    if let Some(tif) = options.time_in_force {
        if tif != TimeInForce::Gtc {
            order = order.with_time_in_force(tif);
        }
    }
    if let Some(tag) = options.tag {
        order = order.with_tag(tag);
    }
    Ok(order)
}

/// 레이어드 지정가 주문 묶음을 만듭니다.
///
/// 주문 크기를 레벨 수로 균등 분할해 가격 수열의 각 레벨에 지정가
/// 주문을 만듭니다. 태그가 있으면 레벨 번호가 접미사로 붙습니다
/// (`tag-1`, `tag-2`, ...).
pub fn build_layered(
    market: &Market,
    order_sizing: OrderSizing,
    outcome: &SizeOutcome,
    prices: &[Decimal],
    options: &OrderOptions<'_>,
    stablecoins: &[String],
    diag: &Diagnostics,
) -> Result<Vec<OrderDescriptor>, SizingError> {
    let per_level = outcome.order_size / Decimal::from(prices.len() as u64);
    let level_outcome = SizeOutcome {
        order_size: per_level,
        ..*outcome
    };

    let mut orders = Vec::with_capacity(prices.len());
    for (index, price) in prices.iter().enumerate() {
        let level_tag = options.tag.map(|tag| format!("{}-{}", tag, index + 1));
        let level_options = OrderOptions {
            tag: level_tag.as_deref(),
            ..*options
        };
        let order = build_standard(
            market,
            order_sizing,
            &level_outcome,
            Some(*price),
            &level_options,
            stablecoins,
            diag,
        )?;
        orders.push(order);
    }
    Ok(orders)
}

// =============================================================================
// 조건부 주문
// =============================================================================

/// 조건부 주문 명세.
///
/// 트리거와 지정가는 해석이 끝난 실제 가격입니다.
#[derive(Debug, Clone)]
pub struct ConditionalSpec<'a> {
    /// 주문 종류 (stoploss/takeprofit/trailstop)
    pub kind: OrderKind,
    /// 체결 방향 (없으면 트리거 위치로 추론)
    pub side: Option<OrderSide>,
    /// 트리거 가격
    pub trigger: Decimal,
    /// 트리거 후 지정가 (없으면 시장가)
    pub price: Option<Decimal>,
    /// 레그 크기 단위
    pub unit: SizeUnit,
    /// 레그 크기 (절댓값)
    pub value: Decimal,
    /// 트레일링 간격 (부호 포함, trailstop 전용)
    pub trail_by: Option<Decimal>,
    /// 감소 전용 플래그
    pub reduce: bool,
    /// 트리거 가격 기준
    pub trigger_type: TriggerType,
    /// 주문 태그
    pub tag: Option<&'a str>,
}

/// 트리거 위치로 조건부 주문의 방향을 추론합니다.
///
/// 손절과 트레일링은 트리거가 현재가 위면 매수(숏 보호), 아래면
/// 매도(롱 보호)입니다. 익절은 그 반대입니다.
fn infer_side(
    market: &Market,
    kind: OrderKind,
    trigger: Decimal,
    diag: &Diagnostics,
) -> Result<OrderSide, SizingError> {
    let avg = market.average_price();
    let side = if trigger > avg {
        match kind {
            OrderKind::TakeProfit => OrderSide::Sell,
            _ => OrderSide::Buy,
        }
    } else if trigger < avg {
        match kind {
            OrderKind::TakeProfit => OrderSide::Buy,
            _ => OrderSide::Sell,
        }
    } else {
        diag.error("order_side_unknown", json!([market.symbol]));
        return Err(SizingError::SideUnknown(market.symbol.clone()));
    };
    diag.debug("order_side_assumed", json!([side.as_str()]));
    Ok(side)
}

/// 조건부 주문 기술자를 만듭니다.
///
/// 수량 변환 기준가는 지정가가 있으면 지정가, 없으면 트리거입니다.
///
/// # Errors
///
/// 방향을 추론할 수 없거나(트리거 == 현재가) 수량이 한도를 벗어나면
/// `SizingError`입니다.
pub fn build_conditional(
    market: &Market,
    order_sizing: OrderSizing,
    spec: &ConditionalSpec<'_>,
    stablecoins: &[String],
    diag: &Diagnostics,
) -> Result<OrderDescriptor, SizingError> {
    let side = match spec.side {
        Some(side) => side,
        None => infer_side(market, spec.kind, spec.trigger, diag)?,
    };

    let reference = spec.price.unwrap_or(spec.trigger);
    let amount = convert_amount(
        market,
        order_sizing,
        spec.unit,
        spec.value,
        Some(side),
        Some(reference),
        stablecoins,
        diag,
    )?;
    if amount.abs() < market.precision.amount {
        diag.error("order_too_small", json!([amount, market.precision.amount]));
        return Err(SizingError::OrderTooSmall { amount });
    }

    let mut order =
        OrderDescriptor::conditional(&market.symbol, side, spec.kind, amount, spec.trigger)
            .with_trigger_type(spec.trigger_type);
    if let Some(price) = spec.price {
        order = order.with_price(price);
    }
    if let Some(trail) = spec.trail_by {
        order = order.with_trail_by(trail);
    }
    if spec.reduce {
        order = order.with_reduce_only(true);
    }
    if let Some(tag) = spec.tag {
        order = order.with_tag(tag);
    }
    Ok(order)
}

// =============================================================================
// 테스트
// =============================================================================
