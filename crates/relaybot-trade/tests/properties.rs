//! 파이프라인 불변식 속성 테스트
//!
//! proptest로 다음을 검증합니다:
//!
//! 1. 해석된 가격과 수량은 마켓 정밀도 스텝으로 나누어떨어진다
//! 2. 청산 주문 크기는 현재 포지션 크기를 넘지 않는다
//! 3. 계층 주문은 레벨 수와 경계 가격을 지키고 총량을 보존한다
//! 4. 0을 가로지르는 상대 사이징은 목표 0에서 멈춘다 (반전 금지)
//! 5. 절대 사이징 해석은 멱등하다

use std::sync::Arc;

use proptest::prelude::*;
use relaybot_core::{
    Diagnostics, LayerBound, Market, MarketType, MemoryConfigStore, NullSink, OrderSide,
    OrderSizing, Position, PositionDirection, PriceExpression, PriceOffset, Sign, SizeUnit,
    SizingExpression,
};
use relaybot_trade::{builder, price, size, OrderCommand, OrderOptions, SizeInput, SizeOutcome};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ============================================================================
// 테스트 헬퍼 함수
// ============================================================================

/// 호가 99/100, 가격 스텝 0.01, 수량 스텝 0.001 파생 마켓
fn market() -> Market {
    Market::new("BTC/USDT", MarketType::Derivative, dec!(99), dec!(100))
        .with_precision(dec!(0.01), dec!(0.001))
        .with_limits(dec!(0.001), None)
}

fn diag() -> Diagnostics {
    Diagnostics::new(Arc::new(NullSink))
}

fn stablecoins() -> Vec<String> {
    vec!["USDT".to_string()]
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("런타임 생성 실패")
        .block_on(future)
}

/// 포지션 없는 사이징 입력
fn size_input(market: &Market, command: OrderCommand) -> SizeInput<'_> {
    SizeInput {
        command,
        market,
        position: None,
        equity_usd: dec!(100000),
        order_sizing: OrderSizing::Base,
        size: None,
        base: None,
        quote: None,
        usd: None,
        scale: None,
        max_size: None,
        signal_size: None,
        layered: false,
    }
}

// ============================================================================
// proptest 전략
// ============================================================================

/// 소수 4자리 임의 가격 (10.0000 ~ 50000.0000)
fn arb_raw_price() -> impl Strategy<Value = Decimal> {
    (100_000i64..500_000_000).prop_map(|n| Decimal::new(n, 4))
}

/// 소수 2자리 임의 퍼센트 (0.01% ~ 10.00%)
fn arb_percent() -> impl Strategy<Value = Decimal> {
    (1i64..1000).prop_map(|n| Decimal::new(n, 2))
}

/// 소수 2자리 임의 USD 수량 (1.00 ~ 10000.00)
fn arb_usd() -> impl Strategy<Value = Decimal> {
    (100i64..1_000_000).prop_map(|n| Decimal::new(n, 2))
}

/// 소수 2자리 임의 베이스 수량 (0.01 ~ 100.00)
fn arb_base() -> impl Strategy<Value = Decimal> {
    (1i64..10_000).prop_map(|n| Decimal::new(n, 2))
}

// ============================================================================
// 1. 가격/수량 정밀도 정렬
// ============================================================================

proptest! {
    /// 절대 가격 해석 결과는 항상 가격 스텝의 배수다.
    #[test]
    fn test_absolute_price_aligns_to_step(raw in arb_raw_price()) {
        let market = market();
        let resolved =
            price::resolve_price(&market, &PriceExpression::Absolute(raw), None, &diag());
        prop_assert!(resolved.is_ok());
        prop_assert!((resolved.unwrap() % dec!(0.01)).is_zero());
    }

    /// 상대 가격 해석 결과도 가격 스텝의 배수다.
    #[test]
    fn test_relative_price_aligns_to_step(percent in arb_percent(), minus in any::<bool>()) {
        let market = market();
        let sign = if minus { Sign::Minus } else { Sign::Plus };
        let expr = PriceExpression::Relative {
            sign,
            offset: PriceOffset::Percent(percent),
        };
        let resolved = price::resolve_price(&market, &expr, None, &diag()).unwrap();
        prop_assert!(resolved > Decimal::ZERO);
        prop_assert!((resolved % dec!(0.01)).is_zero());
    }

    /// USD 수량을 베이스로 환산한 결과는 수량 스텝의 배수다.
    #[test]
    fn test_converted_amount_aligns_to_step(usd in arb_usd()) {
        let market = market();
        let amount = builder::convert_amount(
            &market,
            OrderSizing::Base,
            SizeUnit::Usd,
            usd,
            Some(OrderSide::Buy),
            None,
            &stablecoins(),
            &diag(),
        );
        prop_assert!(amount.is_ok());
        prop_assert!((amount.unwrap() % dec!(0.001)).is_zero());
    }
}

// ============================================================================
// 2. 청산 크기 상한
// ============================================================================

proptest! {
    /// 청산 주문은 요청이 아무리 커도 포지션 크기에서 멈춘다.
    #[test]
    fn test_close_never_exceeds_position(base in arb_base(), request in arb_usd()) {
        let market = market();
        let position = Position::new("BTC/USDT", PositionDirection::Long, base, dec!(100));
        let mut input = size_input(&market, OrderCommand::Close);
        input.position = Some(&position);
        input.size = Some(SizingExpression::Absolute(request));

        let config = MemoryConfigStore::new();
        let outcome = block_on(size::resolve(&input, &config, &diag())).unwrap();

        prop_assert_eq!(outcome.side, OrderSide::Sell);
        prop_assert!(outcome.order_size <= position.usd_size);
        prop_assert!(outcome.target >= Decimal::ZERO);
    }
}

// ============================================================================
// 3. 계층 주문 경계와 총량 보존
// ============================================================================

proptest! {
    /// 레벨 수는 요청대로, 양 끝 가격은 해석된 경계와 일치하고
    /// 수열은 오름차순이다.
    #[test]
    fn test_layered_prices_hit_bounds(
        levels in 2u32..12,
        low_pct in arb_percent(),
        high_pct in arb_percent(),
    ) {
        let market = market();
        let lower = LayerBound::Relative {
            sign: Sign::Minus,
            offset: PriceOffset::Percent(low_pct),
        };
        let upper = LayerBound::Relative {
            sign: Sign::Plus,
            offset: PriceOffset::Percent(high_pct),
        };
        let prices = price::resolve_layered(&market, &lower, &upper, levels, &diag());

        prop_assert_eq!(prices.len(), levels as usize);

        // 매수 1호가 - 퍼센트 / 매도 1호가 + 퍼센트가 두 경계
        let expected_low = market.round_price(dec!(99) - dec!(99) * low_pct / dec!(100));
        let expected_high = market.round_price(dec!(100) + dec!(100) * high_pct / dec!(100));
        prop_assert_eq!(prices[0], expected_low);
        prop_assert_eq!(*prices.last().unwrap(), expected_high);

        for pair in prices.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    /// 레벨별 주문의 명목 금액 합은 요청 총량과 반올림 허용 오차
    /// 안에서 일치한다.
    #[test]
    fn test_layered_amounts_preserve_total(levels in 2u32..12, usd in 5_000i64..500_000) {
        let market = market();
        let usd = Decimal::new(usd, 2); // 50.00 ~ 5000.00
        let lower = LayerBound::Relative {
            sign: Sign::Minus,
            offset: PriceOffset::Percent(dec!(1)),
        };
        let upper = LayerBound::Relative {
            sign: Sign::Plus,
            offset: PriceOffset::Percent(dec!(3)),
        };
        let prices = price::resolve_layered(&market, &lower, &upper, levels, &diag());

        let outcome = SizeOutcome {
            unit: SizeUnit::Usd,
            current: Decimal::ZERO,
            target: usd,
            order_size: usd,
            side: OrderSide::Buy,
            is_close: false,
            is_flip: false,
            close_all: false,
        };
        let options = OrderOptions {
            reduce: false,
            post_only: false,
            time_in_force: None,
            tag: None,
        };
        let orders = builder::build_layered(
            &market,
            OrderSizing::Base,
            &outcome,
            &prices,
            &options,
            &stablecoins(),
            &diag(),
        )
        .unwrap();

        prop_assert_eq!(orders.len(), levels as usize);

        let notional: Decimal = orders
            .iter()
            .map(|o| o.amount * o.price.unwrap())
            .sum();
        // 레벨마다 수량이 최대 한 스텝 반올림되므로 스텝 x 최고가 x 레벨 수가 상한
        let tolerance = Decimal::from(levels) * dec!(0.001) * dec!(110);
        prop_assert!((notional - usd).abs() <= tolerance);
    }
}

// ============================================================================
// 4. 상대 사이징 0 클램프
// ============================================================================

proptest! {
    /// 포지션보다 큰 상대 감축은 반전하지 않고 전량 청산에서 멈춘다.
    #[test]
    fn test_relative_reduction_stops_at_zero(base in arb_base(), extra in arb_usd()) {
        let market = market();
        let position = Position::new("BTC/USDT", PositionDirection::Long, base, dec!(100));
        let magnitude = position.usd_size + extra;

        let mut input = size_input(&market, OrderCommand::Long);
        input.position = Some(&position);
        input.size = Some(SizingExpression::Relative {
            sign: Sign::Minus,
            magnitude,
        });
        input.max_size = Some(dec!(1000000));

        let config = MemoryConfigStore::new();
        let outcome = block_on(size::resolve(&input, &config, &diag())).unwrap();

        prop_assert!(outcome.is_close);
        prop_assert!(!outcome.is_flip);
        prop_assert_eq!(outcome.target, Decimal::ZERO);
        prop_assert_eq!(outcome.side, OrderSide::Sell);
        prop_assert_eq!(outcome.order_size, position.usd_size);
    }
}

// ============================================================================
// 5. 절대 사이징 멱등성
// ============================================================================

proptest! {
    /// 동일한 절대 입력을 두 번 해석하면 결과가 완전히 같다.
    #[test]
    fn test_absolute_resolution_is_idempotent(usd in arb_usd()) {
        let market = market();
        let mut input = size_input(&market, OrderCommand::Long);
        input.usd = Some(SizingExpression::Absolute(usd));

        let config = MemoryConfigStore::new();
        let first = block_on(size::resolve(&input, &config, &diag())).unwrap();
        let second = block_on(size::resolve(&input, &config, &diag())).unwrap();

        prop_assert_eq!(first, second);
        prop_assert_eq!(first.order_size, usd);
        prop_assert_eq!(first.side, OrderSide::Buy);
    }
}
