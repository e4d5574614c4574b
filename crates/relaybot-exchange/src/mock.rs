//! Mock 실행 어댑터.
//!
//! 거래소 없이 주문 파이프라인을 검증하는 인메모리 어댑터입니다.
//! 마켓/포지션/잔고를 테스트가 직접 주입하고, 제출된 주문 기술자와
//! 레버리지 호출을 기록으로 남깁니다.
//!
//! # 거래소 중립성
//!
//! Mock 어댑터는 실제 거래소 어댑터와 동일한 `ExecutionAdapter`
//! 인터페이스를 제공합니다. 파이프라인 코드는 어댑터 종류와 무관하게
//! 동일한 방식으로 동작합니다.
//!
//! # 체결 모델
//!
//! 시장가 주문은 즉시 전량 체결로, 그 외 주문은 미체결로 기록합니다.
//! 체결에 따른 포지션/잔고 갱신은 수행하지 않습니다. 상태 전이가
//! 필요한 테스트는 `set_position` 등으로 상태를 직접 갱신합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use relaybot_core::domain::{
    Balance, MarginMode, Market, OrderDescriptor, OrderKind, OrderSizing, OrderStatus, Position,
    PositionDirection, PositionMode, SubmittedOrder,
};

use crate::adapter::{AdapterError, AdapterSettings, ExecutionAdapter};

/// 레버리지 설정 호출 기록.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeverageCall {
    /// 대상 심볼
    pub symbol: String,
    /// 레버리지 배율
    pub leverage: Decimal,
    /// 마진 모드
    pub margin_mode: MarginMode,
}

/// Mock 어댑터 내부 상태.
#[derive(Debug, Default)]
struct MockState {
    /// 심볼별 마켓
    markets: HashMap<String, Market>,
    /// 잔고 목록
    balances: Vec<Balance>,
    /// 포지션 목록
    positions: Vec<Position>,
    /// 미체결 주문
    open_orders: Vec<SubmittedOrder>,
    /// 주문 이력 (체결/취소 포함)
    history: Vec<SubmittedOrder>,
    /// 포지션 모드 (None이면 미지원 계정)
    position_mode: Option<PositionMode>,
    /// 포지션 모드 변경 잠금 (열린 포지션 시나리오)
    mode_locked: bool,
    /// 제출된 주문 기술자 기록
    submitted: Vec<OrderDescriptor>,
    /// 레버리지 호출 기록
    leverage_calls: Vec<LeverageCall>,
    /// 제출 순번별 실패 주입 (0부터 시작)
    submit_failures: HashMap<u64, String>,
    /// 레버리지 설정이 실패할 심볼
    leverage_failures: Vec<String>,
}

/// Mock 실행 어댑터.
///
/// 빌더로 초기 상태를 구성하고, 실행 중에는 async 메서드로 상태를
/// 조작/검사합니다.
///
/// ```ignore
/// let adapter = MockExchangeAdapter::new()
///     .with_market(Market::new("BTC/USDT", MarketType::Derivative, bid, ask))
///     .with_balance(Balance::new("USDT", dec!(10000), dec!(10000)))
///     .with_position_mode(PositionMode::OneWay);
/// ```
pub struct MockExchangeAdapter {
    /// 어댑터 이름
    name: String,
    /// 정적 설정
    settings: AdapterSettings,
    /// 내부 상태 (RwLock으로 동시 접근 보호)
    state: RwLock<MockState>,
    /// 주문 ID 시퀀스
    order_seq: AtomicU64,
}

impl Default for MockExchangeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchangeAdapter {
    /// 빈 상태의 Mock 어댑터 생성.
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            settings: AdapterSettings::default(),
            state: RwLock::new(MockState::default()),
            order_seq: AtomicU64::new(0),
        }
    }

    /// 주문 수량 표기 단위 설정 (빌더 패턴).
    pub fn with_order_sizing(mut self, sizing: OrderSizing) -> Self {
        self.settings.order_sizing = sizing;
        self
    }

    /// 마켓 추가 (빌더 패턴).
    pub fn with_market(mut self, market: Market) -> Self {
        let state = self.state.get_mut();
        state.markets.insert(market.symbol.clone(), market);
        self
    }

    /// 잔고 추가 (빌더 패턴).
    pub fn with_balance(mut self, balance: Balance) -> Self {
        self.state.get_mut().balances.push(balance);
        self
    }

    /// 포지션 추가 (빌더 패턴).
    pub fn with_position(mut self, position: Position) -> Self {
        self.state.get_mut().positions.push(position);
        self
    }

    /// 포지션 모드 설정 (빌더 패턴).
    pub fn with_position_mode(mut self, mode: PositionMode) -> Self {
        self.state.get_mut().position_mode = Some(mode);
        self
    }

    /// 포지션 모드 변경을 거부하도록 잠금 (빌더 패턴).
    pub fn with_locked_position_mode(mut self) -> Self {
        self.state.get_mut().mode_locked = true;
        self
    }

    /// 미체결 주문 추가 (빌더 패턴).
    pub fn with_open_order(mut self, order: SubmittedOrder) -> Self {
        self.state.get_mut().open_orders.push(order);
        self
    }

    /// 주문 이력 추가 (빌더 패턴).
    pub fn with_history_order(mut self, order: SubmittedOrder) -> Self {
        self.state.get_mut().history.push(order);
        self
    }

    /// n번째 제출(0부터 시작)이 실패하도록 주입 (빌더 패턴).
    ///
    /// 실패한 제출도 순번을 소비합니다.
    pub fn with_submit_failure(mut self, nth: u64, message: impl Into<String>) -> Self {
        self.state.get_mut().submit_failures.insert(nth, message.into());
        self
    }

    /// 지정 심볼의 레버리지 설정이 실패하도록 주입 (빌더 패턴).
    pub fn with_leverage_failure(mut self, symbol: impl Into<String>) -> Self {
        self.state.get_mut().leverage_failures.push(symbol.into());
        self
    }

    /// 포지션 교체 (같은 심볼/방향이 있으면 덮어쓰기).
    pub async fn set_position(&self, position: Position) {
        let mut state = self.state.write().await;
        state
            .positions
            .retain(|p| !(p.symbol == position.symbol && p.direction == position.direction));
        state.positions.push(position);
    }

    /// 지정 심볼의 포지션 제거.
    pub async fn clear_position(&self, symbol: &str) {
        let mut state = self.state.write().await;
        state.positions.retain(|p| p.symbol != symbol);
    }

    /// 제출된 주문 기술자 기록 조회.
    pub async fn submitted_orders(&self) -> Vec<OrderDescriptor> {
        self.state.read().await.submitted.clone()
    }

    /// 마지막으로 제출된 주문 기술자 조회.
    pub async fn last_submitted(&self) -> Option<OrderDescriptor> {
        self.state.read().await.submitted.last().cloned()
    }

    /// 레버리지 호출 기록 조회.
    pub async fn leverage_calls(&self) -> Vec<LeverageCall> {
        self.state.read().await.leverage_calls.clone()
    }

    /// 미체결 주문 수 조회.
    pub async fn open_order_count(&self) -> usize {
        self.state.read().await.open_orders.len()
    }
}

#[async_trait]
impl ExecutionAdapter for MockExchangeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> AdapterSettings {
        self.settings
    }

    async fn market(&self, symbol: &str) -> Result<Market, AdapterError> {
        self.state
            .read()
            .await
            .markets
            .get(symbol)
            .cloned()
            .ok_or_else(|| AdapterError::MarketNotFound(symbol.to_string()))
    }

    async fn markets(&self) -> Result<Vec<Market>, AdapterError> {
        let state = self.state.read().await;
        let mut markets: Vec<Market> = state.markets.values().cloned().collect();
        // 결정적 순회를 위해 심볼 정렬
        markets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(markets)
    }

    async fn balances(&self) -> Result<Vec<Balance>, AdapterError> {
        Ok(self.state.read().await.balances.clone())
    }

    async fn position(
        &self,
        symbol: &str,
        direction: Option<PositionDirection>,
    ) -> Result<Option<Position>, AdapterError> {
        let state = self.state.read().await;
        let matches: Vec<&Position> =
            state.positions.iter().filter(|p| p.symbol == symbol).collect();

        match direction {
            Some(dir) => Ok(matches.into_iter().find(|p| p.direction == dir).cloned()),
            None => {
                if matches.len() > 1 {
                    return Err(AdapterError::Api(format!(
                        "포지션 방향 미지정 (헤지 모드): {}",
                        symbol
                    )));
                }
                Ok(matches.into_iter().next().cloned())
            }
        }
    }

    async fn positions(&self) -> Result<Vec<Position>, AdapterError> {
        Ok(self.state.read().await.positions.clone())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<SubmittedOrder>, AdapterError> {
        let state = self.state.read().await;
        Ok(state
            .open_orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn order_history(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SubmittedOrder>, AdapterError> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|o| o.symbol == symbol && o.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn position_mode(&self, _symbol: &str) -> Result<Option<PositionMode>, AdapterError> {
        Ok(self.state.read().await.position_mode)
    }

    async fn set_position_mode(
        &self,
        symbol: &str,
        mode: PositionMode,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        if state.position_mode.is_none() {
            return Err(AdapterError::Unsupported(format!(
                "포지션 모드 미지원 마켓: {}",
                symbol
            )));
        }
        if state.mode_locked {
            return Err(AdapterError::Api(format!(
                "포지션 모드 변경 거부: {}",
                symbol
            )));
        }
        state.position_mode = Some(mode);
        Ok(())
    }

    async fn submit_order(&self, order: &OrderDescriptor) -> Result<SubmittedOrder, AdapterError> {
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;

        if let Some(message) = state.submit_failures.remove(&seq) {
            debug!(seq, %message, "주문 제출 실패 주입");
            return Err(AdapterError::Api(message));
        }

        let price = order
            .price
            .or_else(|| state.markets.get(&order.symbol).map(|m| m.average_price()));

        // 시장가는 즉시 전량 체결, 그 외는 미체결로 기록
        let (status, filled) = match order.kind {
            OrderKind::Market => (OrderStatus::Closed, order.amount),
            _ => (OrderStatus::Open, Decimal::ZERO),
        };

        let submitted = SubmittedOrder {
            id: format!("mock-{}", seq + 1),
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            status,
            price,
            amount: order.amount,
            filled,
            timestamp: Utc::now(),
        };

        state.submitted.push(order.clone());
        if submitted.is_open() {
            state.open_orders.push(submitted.clone());
        }
        state.history.push(submitted.clone());

        Ok(submitted)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        let index = state
            .open_orders
            .iter()
            .position(|o| o.symbol == symbol && o.id == order_id)
            .ok_or_else(|| AdapterError::Api(format!("취소할 주문 없음: {}", order_id)))?;

        state.open_orders.remove(index);
        if let Some(entry) = state.history.iter_mut().find(|o| o.id == order_id) {
            entry.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn cancel_all(&self, symbol: &str) -> Result<Vec<String>, AdapterError> {
        let mut state = self.state.write().await;
        let canceled: Vec<String> = state
            .open_orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .map(|o| o.id.clone())
            .collect();

        state.open_orders.retain(|o| o.symbol != symbol);
        for id in &canceled {
            if let Some(entry) = state.history.iter_mut().find(|o| &o.id == id) {
                entry.status = OrderStatus::Canceled;
            }
        }
        Ok(canceled)
    }

    async fn cancel_orders_of_kind(
        &self,
        symbol: &str,
        kind: OrderKind,
    ) -> Result<Vec<String>, AdapterError> {
        let mut state = self.state.write().await;
        let canceled: Vec<String> = state
            .open_orders
            .iter()
            .filter(|o| o.symbol == symbol && o.kind == kind)
            .map(|o| o.id.clone())
            .collect();

        state
            .open_orders
            .retain(|o| !(o.symbol == symbol && o.kind == kind));
        for id in &canceled {
            if let Some(entry) = state.history.iter_mut().find(|o| &o.id == id) {
                entry.status = OrderStatus::Canceled;
            }
        }
        Ok(canceled)
    }

    async fn set_leverage(
        &self,
        symbol: &str,
        leverage: Decimal,
        margin_mode: MarginMode,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        if state.leverage_failures.iter().any(|s| s == symbol) {
            return Err(AdapterError::Api(format!("레버리지 설정 거부: {}", symbol)));
        }
        state.leverage_calls.push(LeverageCall {
            symbol: symbol.to_string(),
            leverage,
            margin_mode,
        });
        Ok(())
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use relaybot_core::domain::{MarketType, OrderSide};

    use super::*;

    fn btc_market() -> Market {
        Market::new(
            "BTC/USDT:USDT",
            MarketType::Derivative,
            dec!(49990),
            dec!(50010),
        )
    }

    fn open_limit(id: &str, symbol: &str, side: OrderSide, kind: OrderKind) -> SubmittedOrder {
        SubmittedOrder {
            id: id.to_string(),
            symbol: symbol.to_string(),
            side,
            kind,
            status: OrderStatus::Open,
            price: Some(dec!(50000)),
            amount: dec!(1),
            filled: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_immediately() {
        let adapter = MockExchangeAdapter::new().with_market(btc_market());

        let order = OrderDescriptor::market("BTC/USDT:USDT", OrderSide::Buy, dec!(0.5));
        let submitted = adapter.submit_order(&order).await.unwrap();

        assert_eq!(submitted.id, "mock-1");
        assert_eq!(submitted.status, OrderStatus::Closed);
        assert_eq!(submitted.filled, dec!(0.5));
        // 가격 미지정 시 마켓 평균가 사용
        assert_eq!(submitted.price, Some(dec!(50000)));
        assert_eq!(adapter.open_order_count().await, 0);
        assert_eq!(adapter.submitted_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_limit_order_stays_open() {
        let adapter = MockExchangeAdapter::new().with_market(btc_market());

        let order = OrderDescriptor::limit("BTC/USDT:USDT", OrderSide::Buy, dec!(1), dec!(48000));
        let submitted = adapter.submit_order(&order).await.unwrap();

        assert!(submitted.is_open());
        assert_eq!(adapter.open_order_count().await, 1);
    }

    #[tokio::test]
    async fn test_submit_failure_consumes_sequence() {
        let adapter = MockExchangeAdapter::new()
            .with_market(btc_market())
            .with_submit_failure(0, "잔고 부족");

        let order = OrderDescriptor::market("BTC/USDT:USDT", OrderSide::Buy, dec!(1));

        let first = adapter.submit_order(&order).await;
        assert!(matches!(first, Err(AdapterError::Api(_))));

        // 실패한 제출도 순번을 소비하므로 다음 제출은 성공
        let second = adapter.submit_order(&order).await.unwrap();
        assert_eq!(second.id, "mock-2");
    }

    #[tokio::test]
    async fn test_position_direction_filter() {
        let adapter = MockExchangeAdapter::new()
            .with_position(Position::new(
                "BTC/USDT:USDT",
                PositionDirection::Long,
                dec!(1),
                dec!(50000),
            ))
            .with_position(Position::new(
                "BTC/USDT:USDT",
                PositionDirection::Short,
                dec!(0.5),
                dec!(51000),
            ));

        let long = adapter
            .position("BTC/USDT:USDT", Some(PositionDirection::Long))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(long.base_size, dec!(1));

        // 헤지 포지션 두 개에 방향 미지정은 에러
        let ambiguous = adapter.position("BTC/USDT:USDT", None).await;
        assert!(matches!(ambiguous, Err(AdapterError::Api(_))));

        // 포지션이 없는 심볼은 None
        let none = adapter.position("ETH/USDT:USDT", None).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_cancel_all_returns_only_symbol_orders() {
        let adapter = MockExchangeAdapter::new()
            .with_open_order(open_limit("a", "BTC/USDT:USDT", OrderSide::Buy, OrderKind::Limit))
            .with_open_order(open_limit("b", "BTC/USDT:USDT", OrderSide::Sell, OrderKind::Limit))
            .with_open_order(open_limit("c", "ETH/USDT:USDT", OrderSide::Buy, OrderKind::Limit));

        let canceled = adapter.cancel_all("BTC/USDT:USDT").await.unwrap();
        assert_eq!(canceled, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(adapter.open_order_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_orders_of_kind() {
        let adapter = MockExchangeAdapter::new()
            .with_open_order(open_limit("a", "BTC/USDT:USDT", OrderSide::Buy, OrderKind::Limit))
            .with_open_order(open_limit(
                "b",
                "BTC/USDT:USDT",
                OrderSide::Sell,
                OrderKind::StopLoss,
            ));

        let canceled = adapter
            .cancel_orders_of_kind("BTC/USDT:USDT", OrderKind::StopLoss)
            .await
            .unwrap();
        assert_eq!(canceled, vec!["b".to_string()]);

        // 지정가 주문은 남는다
        let remaining = adapter.open_orders("BTC/USDT:USDT").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, OrderKind::Limit);
    }

    #[tokio::test]
    async fn test_position_mode_change() {
        let adapter = MockExchangeAdapter::new().with_position_mode(PositionMode::OneWay);

        adapter
            .set_position_mode("BTC/USDT:USDT", PositionMode::Hedged)
            .await
            .unwrap();
        let mode = adapter.position_mode("BTC/USDT:USDT").await.unwrap();
        assert_eq!(mode, Some(PositionMode::Hedged));
    }

    #[tokio::test]
    async fn test_position_mode_locked() {
        let adapter = MockExchangeAdapter::new()
            .with_position_mode(PositionMode::OneWay)
            .with_locked_position_mode();

        let result = adapter
            .set_position_mode("BTC/USDT:USDT", PositionMode::Hedged)
            .await;
        assert!(matches!(result, Err(AdapterError::Api(_))));

        // 모드는 유지
        let mode = adapter.position_mode("BTC/USDT:USDT").await.unwrap();
        assert_eq!(mode, Some(PositionMode::OneWay));
    }

    #[tokio::test]
    async fn test_position_mode_unsupported() {
        let adapter = MockExchangeAdapter::new();
        let result = adapter
            .set_position_mode("BTC/USDT", PositionMode::Hedged)
            .await;
        assert!(matches!(result, Err(AdapterError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_leverage_recording_and_failure() {
        let adapter = MockExchangeAdapter::new().with_leverage_failure("ETH/USDT:USDT");

        adapter
            .set_leverage("BTC/USDT:USDT", dec!(20), MarginMode::Isolated)
            .await
            .unwrap();
        let result = adapter
            .set_leverage("ETH/USDT:USDT", dec!(20), MarginMode::Isolated)
            .await;
        assert!(result.is_err());

        let calls = adapter.leverage_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].symbol, "BTC/USDT:USDT");
        assert_eq!(calls[0].leverage, dec!(20));
    }

    #[tokio::test]
    async fn test_order_history_since_filter() {
        let old = SubmittedOrder {
            timestamp: Utc::now() - chrono::Duration::days(10),
            ..open_limit("old", "BTC/USDT:USDT", OrderSide::Buy, OrderKind::Limit)
        };
        let recent = SubmittedOrder {
            timestamp: Utc::now() - chrono::Duration::days(1),
            ..open_limit("recent", "BTC/USDT:USDT", OrderSide::Buy, OrderKind::Limit)
        };

        let adapter = MockExchangeAdapter::new()
            .with_history_order(old)
            .with_history_order(recent);

        let since = Utc::now() - chrono::Duration::days(7);
        let history = adapter
            .order_history("BTC/USDT:USDT", since)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "recent");
    }
}
