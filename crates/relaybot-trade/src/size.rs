//! 주문 수량 해석.
//!
//! 사이징 파라미터(size/base/quote/usd/scale)와 현재 포지션, 가용
//! 자본을 조합해 주문 단위, 목표 크기, 주문 크기, 체결 방향을
//! 결정합니다. 해석 규칙:
//!
//! - `size`는 `usd`의 별칭이며 둘 다 주어지면 `size`가 우선
//! - 배수/지분율은 `size`/`usd`에만 허용 (부호 있으면 포지션 기준,
//!   없으면 가용 자본 기준, 0.05 USD 스텝 반올림)
//! - 상대 사이징(`+500`/`-500`)은 long/short 전용이며 maxsize 필요
//! - `scale`은 포지션 USD 크기의 배수로 주문
//! - close는 사이징이 없으면 전량 청산
//!
//! 모든 실패는 발생 지점에서 에러 이벤트를 발행하고 `SizingError`로
//! 반환됩니다. 큐는 이 단계에서 변경되지 않습니다.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde_json::json;

use relaybot_core::{
    round_to_step, ConfigStore, Diagnostics, Market, OrderSide, OrderSizing, Position,
    PositionDirection, Sign, SizeUnit, SizingExpression, SCOPE_CONFIG, SCOPE_COUNTER,
};

use crate::error::SizingError;
use crate::params::OrderCommand;

/// maxsize 미설정 경고 발행 상한.
const MAXSIZE_WARN_LIMIT: u64 = 5;

// =============================================================================
// 입력 / 결과
// =============================================================================

/// 수량 해석 입력.
#[derive(Debug, Clone)]
pub struct SizeInput<'a> {
    /// 명령 종류
    pub command: OrderCommand,
    /// 대상 마켓
    pub market: &'a Market,
    /// 현재 포지션 (해당 방향)
    pub position: Option<&'a Position>,
    /// 가용 자본 (USD)
    pub equity_usd: Decimal,
    /// 거래소 기본 주문 단위
    pub order_sizing: OrderSizing,
    /// 사이징: size (usd 별칭)
    pub size: Option<SizingExpression>,
    /// 사이징: 베이스 통화
    pub base: Option<SizingExpression>,
    /// 사이징: 견적 통화
    pub quote: Option<SizingExpression>,
    /// 사이징: USD
    pub usd: Option<SizingExpression>,
    /// 포지션 배수 스케일
    pub scale: Option<Decimal>,
    /// 최대 포지션 크기
    pub max_size: Option<Decimal>,
    /// 시그널 강도
    pub signal_size: Option<Decimal>,
    /// 레이어드 주문의 개별 레벨 여부
    pub layered: bool,
}

/// 수량 해석 결과.
///
/// `current`와 `target`은 부호 있는 크기(롱 양수, 숏 음수)이고
/// `order_size`는 부호 없는 주문 크기입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeOutcome {
    /// 주문 단위
    pub unit: SizeUnit,
    /// 현재 포지션 크기 (부호 포함)
    pub current: Decimal,
    /// 목표 포지션 크기 (부호 포함)
    pub target: Decimal,
    /// 주문 크기 (절댓값)
    pub order_size: Decimal,
    /// 체결 방향
    pub side: OrderSide,
    /// 포지션 청산으로 귀결되는 주문 여부
    pub is_close: bool,
    /// 포지션 방향 반전으로 귀결되는 주문 여부
    pub is_flip: bool,
    /// 전량 청산 여부
    pub close_all: bool,
}

// =============================================================================
// 해석
// =============================================================================

fn currency_name(market: &Market, unit: SizeUnit) -> String {
    match unit {
        SizeUnit::Base => market.base.clone(),
        SizeUnit::Quote => market.quote.clone(),
        SizeUnit::Usd => "USD".to_string(),
    }
}

fn unit_label(unit: SizeUnit) -> &'static str {
    match unit {
        SizeUnit::Base => "base",
        SizeUnit::Quote => "quote",
        SizeUnit::Usd => "USD",
    }
}

fn side_label(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

/// 배수/지분율 표현식을 USD 수량으로 해석합니다.
///
/// 부호가 있거나 close 명령이면 포지션 USD 크기, 아니면 가용 자본이
/// 기준입니다. close는 부호를 버리고 절대 수량을 돌려주며, 부호 있는
/// 배수는 상대 수량이 됩니다. 결과는 0.05 USD 스텝으로 반올림됩니다.
fn resolve_factor(
    command: OrderCommand,
    sign: Option<Sign>,
    factor: Decimal,
    position: Option<&Position>,
    equity_usd: Decimal,
    symbol: &str,
    diag: &Diagnostics,
) -> Result<SizingExpression, SizingError> {
    let (basis, basis_kind) = if command == OrderCommand::Close || sign.is_some() {
        match position {
            Some(position) => (position.usd_size.abs(), "position"),
            None => {
                diag.error("position_none", json!([symbol]));
                return Err(SizingError::NoPosition(symbol.to_string()));
            }
        }
    } else {
        (equity_usd, "balance")
    };

    let magnitude = round_to_step(basis * factor, dec!(0.05));
    let resolved = match (command, sign) {
        (OrderCommand::Close, _) | (_, None) => SizingExpression::Absolute(magnitude),
        (_, Some(sign)) => SizingExpression::Relative { sign, magnitude },
    };

    diag.debug(
        "order_size_factor",
        json!([
            SizingExpression::Factor { sign, factor }.to_string(),
            magnitude,
            format!("${} {} x {}", basis.floor(), basis_kind, factor),
        ]),
    );
    Ok(resolved)
}

/// 사이징 파라미터를 주문 크기와 방향으로 해석합니다.
///
/// # Errors
///
/// 사이징 규칙 위반은 `SizingError`로 반환됩니다. 필요한 포지션이
/// 없거나, 상대 사이징에 maxsize가 없거나, 주문이 한도를 벗어나는
/// 경우 등이 해당합니다.
pub async fn resolve(
    input: &SizeInput<'_>,
    config: &dyn ConfigStore,
    diag: &Diagnostics,
) -> Result<SizeOutcome, SizingError> {
    let market = input.market;
    let position = input.position;
    let symbol = market.symbol.as_str();

    let position_usd = position.map(|p| p.usd_size).unwrap_or_default();
    diag.debug(
        "position_size",
        json!([position_usd.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)]),
    );
    diag.debug(
        "balance_avail",
        json!([input
            .equity_usd
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)]),
    );

    // base/quote에는 배수 사이징 불가
    if input.base.is_some_and(|e| e.is_factor()) || input.quote.is_some_and(|e| e.is_factor()) {
        diag.error("factor_only_size", json!([]));
        return Err(SizingError::FactorOnlySize);
    }

    // close에 사이징이 없으면 전량 청산
    let mut close_all = false;
    let mut size = input.size;
    if input.command == OrderCommand::Close && !has_any_sizing(input) {
        size = Some(SizingExpression::Factor {
            sign: None,
            factor: Decimal::ONE,
        });
        close_all = true;
    }

    // size는 usd의 별칭이며 우선한다. 배수/지분율은 여기서 해석된다.
    let usd = match size.or(input.usd) {
        Some(SizingExpression::Factor { sign, factor }) => Some(resolve_factor(
            input.command,
            sign,
            factor,
            position,
            input.equity_usd,
            symbol,
            diag,
        )?),
        other => other,
    };

    // 단위 우선순위: base > quote > usd
    let selected = if let Some(expr) = input.base {
        Some((SizeUnit::Base, expr))
    } else if let Some(expr) = input.quote {
        Some((SizeUnit::Quote, expr))
    } else {
        usd.map(|expr| (SizeUnit::Usd, expr))
    };

    if selected.is_none() && input.scale.is_none() {
        diag.error("order_size_nan", json!([symbol]));
        return Err(SizingError::NoSizing);
    }

    let position_direction = position.map(|p| p.direction);
    let mut unit = selected.map(|(unit, _)| unit).unwrap_or(SizeUnit::Usd);
    let mut current = position
        .map(|p| p.signed_size(unit))
        .unwrap_or(Decimal::ZERO);

    // 상대 사이징 변환
    let mut is_relative = false;
    let mut requested = Decimal::ZERO;
    match selected.map(|(_, expr)| expr) {
        Some(SizingExpression::Absolute(value)) => requested = value,
        Some(SizingExpression::Relative { sign, magnitude }) => {
            if !input.command.is_directional() {
                diag.error("order_size_rel", json!([input.command.as_str()]));
                return Err(SizingError::RelativeNotAllowed(
                    input.command.as_str().to_string(),
                ));
            }
            if input.max_size.is_none() {
                let require_maxsize = config
                    .get_bool(SCOPE_CONFIG, "trade:require_maxsize", true)
                    .await;
                if require_maxsize {
                    diag.error("order_rel_req_max", json!([input.command.as_str()]));
                    return Err(SizingError::MaxSizeRequired(
                        input.command.as_str().to_string(),
                    ));
                }
                let warned = config.get_u64(SCOPE_COUNTER, "trade:warn_maxsize", 0).await;
                if warned < MAXSIZE_WARN_LIMIT {
                    diag.warning("maxsize_disabled", json!([warned + 1, MAXSIZE_WARN_LIMIT]));
                    config
                        .set(SCOPE_COUNTER, "trade:warn_maxsize", json!(warned + 1))
                        .await;
                }
            }
            let direction_sign = match position_direction {
                Some(PositionDirection::Short) => -Decimal::ONE,
                _ => Decimal::ONE,
            };
            requested = direction_sign * (current.abs() + sign.factor() * magnitude);
            is_relative = true;
        }
        // 배수는 위에서 모두 해석되므로 남아 있으면 거부 대상이다
        Some(SizingExpression::Factor { .. }) => {
            diag.error("factor_only_size", json!([]));
            return Err(SizingError::FactorOnlySize);
        }
        None => {}
    }

    // 스케일 사이징: 포지션 USD 크기의 배수
    if let Some(scale) = input.scale {
        let Some(position) = position else {
            diag.error("order_scale_nopos", json!([symbol]));
            return Err(SizingError::NoPositionForScale(symbol.to_string()));
        };
        unit = SizeUnit::Usd;
        current = position.signed_size(SizeUnit::Usd);
        requested = current * scale;
    }

    // 시그널 강도 감쇠 (진입 명령 전용)
    if input.command.is_entry() {
        if let Some(signal) = input.signal_size {
            if signal < Decimal::ONE_HUNDRED {
                let mut adjusted = requested * signal / Decimal::ONE_HUNDRED;
                if unit == SizeUnit::Usd {
                    adjusted = adjusted
                        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
                }
                diag.warning(
                    "signal_size",
                    json!([currency_name(market, unit), requested, signal, adjusted]),
                );
                requested = adjusted;
            }
        }
    }

    // 목표 포지션 크기 계산
    let mut is_close = false;
    let mut target = match input.command {
        OrderCommand::Buy => current + requested,
        OrderCommand::Sell => current - requested,
        OrderCommand::Long => requested,
        OrderCommand::Short => -requested.abs(),
        OrderCommand::Close => {
            let Some(position) = position else {
                diag.error("position_none", json!([symbol]));
                return Err(SizingError::NoPosition(symbol.to_string()));
            };
            is_close = true;
            if close_all {
                Decimal::ZERO
            } else if position.is_long() {
                current - requested.abs()
            } else {
                current + requested.abs()
            }
        }
    };

    // 최대 포지션 크기 점검
    if let Some(max_size) = input.max_size {
        let max_size = match input.command {
            OrderCommand::Short | OrderCommand::Sell => -max_size.abs(),
            _ => max_size,
        };
        let over = (is_relative
            && ((input.command == OrderCommand::Long && target > max_size)
                || (input.command == OrderCommand::Short && target < max_size)))
            || (input.command == OrderCommand::Buy && target > max_size)
            || (input.command == OrderCommand::Sell && target < max_size);
        if over {
            target = max_size;
            let new_size = target.abs() - current.abs();
            if new_size < Decimal::ZERO {
                diag.error("order_over_maxsize", json!([requested]));
                return Err(SizingError::OverMaxSize { requested });
            }
            diag.warning("order_over_maxsize", json!([requested, new_size]));
        }
    }

    // 절대 사이징이 현재 포지션보다 작으면 거부 (청산은 close 명령으로)
    if input.command != OrderCommand::Close
        && !input.layered
        && !is_relative
        && input.scale.is_none()
        && ((input.command == OrderCommand::Long && target < current)
            || (input.command == OrderCommand::Short && target > current))
    {
        diag.error("order_size_exceeds", json!([input.command.as_str()]));
        return Err(SizingError::SizeExceedsPosition(
            input.command.as_str().to_string(),
        ));
    }

    // 상대 사이징이 0을 넘어 반전하려 하면 청산에서 멈춘다
    if is_relative
        && ((input.command == OrderCommand::Long && target < Decimal::ZERO)
            || (input.command == OrderCommand::Short && target > Decimal::ZERO))
    {
        diag.warning("order_rel_close", json!([]));
        is_close = true;
        target = Decimal::ZERO;
    }

    // 청산 주문이 포지션 크기를 넘으면 전량 청산에서 멈춘다
    if input.command == OrderCommand::Close
        && ((target > Decimal::ZERO && current < Decimal::ZERO)
            || (target < Decimal::ZERO && current > Decimal::ZERO))
    {
        diag.debug("close_exceeds_pos", json!([requested, -current]));
        target = Decimal::ZERO;
    }

    // 포지션 방향 반전 감지
    let mut is_flip = false;
    if let Some(direction) = position_direction {
        if (direction == PositionDirection::Long && target < Decimal::ZERO)
            || (direction == PositionDirection::Short && target > Decimal::ZERO)
        {
            is_flip = true;
            let flipped = match direction {
                PositionDirection::Long => "short",
                PositionDirection::Short => "long",
            };
            diag.warning("order_will_flip", json!([direction.to_string(), flipped]));
        }
    }

    // 전량 청산은 거래소 기본 단위의 포지션 크기와 정확히 일치시킨다
    if is_close && close_all {
        if let Some(position) = position {
            unit = match input.order_sizing {
                OrderSizing::Base => SizeUnit::Base,
                OrderSizing::Quote => SizeUnit::Quote,
            };
            current = position.signed_size(unit);
            target = Decimal::ZERO;
        }
    }

    let order_size = target - current;
    let side = if order_size >= Decimal::ZERO {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };
    let order_size = order_size.abs();

    if !input.layered {
        let currency = currency_name(market, unit);
        let label = unit_label(unit);
        diag.debug("order_sizing_type", json!([currency, label]));
        diag.notice("order_sizing_cur", json!([label, currency, current]));
        diag.notice("order_sizing_tar", json!([label, currency, target]));
        diag.notice(
            "order_sizing_ord",
            json!([side_label(side), currency, order_size]),
        );
    }

    Ok(SizeOutcome {
        unit,
        current,
        target,
        order_size,
        side,
        is_close,
        is_flip,
        close_all,
    })
}

fn has_any_sizing(input: &SizeInput<'_>) -> bool {
    input.size.is_some() || input.base.is_some() || input.quote.is_some() || input.usd.is_some()
}

// =============================================================================
// 테스트
// =============================================================================
