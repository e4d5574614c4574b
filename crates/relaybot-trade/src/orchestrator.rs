//! 거래 명령 오케스트레이터.
//!
//! 원시 파라미터를 받아 검증 → 리스크 점검 → 사이징 → 주문 생성 →
//! 큐 제출까지의 수명 주기를 한 번에 실행합니다. 진입 명령이 성공하면
//! 보호 레그(손절/익절)를 이어서 배치합니다.
//!
//! 모든 명령은 `(계정, 심볼)` 큐 락 안에서 제출 단계를 수행하므로 같은
//! 심볼에 대한 동시 명령은 순차화됩니다. 제출 이전 단계(검증, 사이징,
//! 생성)에서 실패하면 큐와 거래소에는 아무 변화가 없습니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use relaybot_core::{
    total_free_usd, Balance, ConfigStore, Diagnostics, DiagnosticsSink, Market, OrderDescriptor,
    OrderKind, OrderSide, OrderSizing, Position, PositionDirection, PositionMode, PriceExpression,
    Sign, SizeUnit, SizingExpression, SubmittedOrder,
};
use relaybot_exchange::{AdapterError, ExecutionAdapter};

use crate::builder::{self, ConditionalSpec, OrderOptions};
use crate::error::{SizingError, TradeError, ValidationError};
use crate::params::{
    CancelAllParams, CancelParams, CloseParams, ConditionalParams, LeverageParams, OpenParams,
    OrderCommand, ProtectionParams, RawParams,
};
use crate::price::{resolve_layered, resolve_price};
use crate::queue::{OrderQueue, QueueKey};
use crate::risk;
use crate::size::{self, SizeInput};

// =============================================================================
// 명령 수명 주기
// =============================================================================

/// 명령 처리 단계.
///
/// 단계 전이는 `command_state` 디버그 이벤트로 발행됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// 파라미터 해석과 사전 점검
    Validating,
    /// 주문 크기 산출
    Sizing,
    /// 주문 기술자 생성
    Building,
    /// 큐 등록 (락 획득 포함)
    Queued,
    /// 거래소 제출
    Submitting,
    /// 정상 종료
    Done,
    /// 실패 종료
    Failed,
}

impl CommandState {
    /// 이벤트 인자용 문자열 표현.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Validating => "validating",
            CommandState::Sizing => "sizing",
            CommandState::Building => "building",
            CommandState::Queued => "queued",
            CommandState::Submitting => "submitting",
            CommandState::Done => "done",
            CommandState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 명령 처리 결과.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// 이벤트 상관관계용 명령 ID
    pub command_id: Uuid,
    /// 종료 상태
    pub state: CommandState,
    /// 제출된 주문 목록
    pub orders: Vec<SubmittedOrder>,
    /// 명령 시작부터 종료까지의 시간
    pub elapsed: Duration,
}

/// 현재 포지션, 미체결 일반 주문, 큐 대기 주문을 합산한 잠재 포지션.
///
/// 보호 레그의 방향/수량/앵커 가격을 결정할 때 사용합니다.
#[derive(Debug, Clone, Copy)]
struct PotentialPosition {
    unit: SizeUnit,
    amount: Decimal,
    price: Decimal,
    side: OrderSide,
}

// =============================================================================
// TradeOrchestrator
// =============================================================================

/// 계정 하나에 대한 거래 명령 실행기.
///
/// 어댑터, 설정 저장소, 진단 싱크를 주입받아 명령별로 독립된
/// [`Diagnostics`] 컨텍스트를 생성합니다.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use relaybot_core::{MemoryConfigStore, NullSink};
/// use relaybot_exchange::MockExchangeAdapter;
/// use relaybot_trade::{RawParams, TradeOrchestrator};
///
/// # async fn run() -> Result<(), relaybot_trade::TradeError> {
/// let orchestrator = TradeOrchestrator::new(
///     "main",
///     Arc::new(MockExchangeAdapter::new()),
///     Arc::new(MemoryConfigStore::new()),
///     Arc::new(NullSink),
/// );
/// let params: RawParams = [("symbol", "BTC/USDT"), ("usd", "500")]
///     .into_iter()
///     .collect();
/// let outcome = orchestrator.long(&params).await?;
/// println!("{} orders submitted", outcome.orders.len());
/// # Ok(())
/// # }
/// ```
pub struct TradeOrchestrator {
    account: String,
    adapter: Arc<dyn ExecutionAdapter>,
    config: Arc<dyn ConfigStore>,
    sink: Arc<dyn DiagnosticsSink>,
    queue: OrderQueue,
    stablecoins: Vec<String>,
}

impl TradeOrchestrator {
    /// 새 오케스트레이터를 생성합니다.
    pub fn new(
        account: impl Into<String>,
        adapter: Arc<dyn ExecutionAdapter>,
        config: Arc<dyn ConfigStore>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            account: account.into(),
            adapter,
            config,
            sink,
            queue: OrderQueue::new(),
            stablecoins: vec!["USDT".to_string()],
        }
    }

    /// USD와 등가로 취급할 스테이블코인 목록을 교체합니다.
    pub fn with_stablecoins(mut self, stablecoins: Vec<String>) -> Self {
        self.stablecoins = stablecoins;
        self
    }

    /// 계정 이름.
    pub fn account(&self) -> &str {
        &self.account
    }

    // =========================================================================
    // 명령 디스패치
    // =========================================================================

    /// 명령 이름으로 디스패치합니다.
    ///
    /// # Errors
    ///
    /// 알 수 없는 명령이면 `TradeError::Validation`을 반환합니다.
    pub async fn execute(
        &self,
        command: &str,
        raw: &RawParams,
    ) -> Result<CommandOutcome, TradeError> {
        match command.trim().to_lowercase().as_str() {
            "long" => self.long(raw).await,
            "short" => self.short(raw).await,
            "buy" => self.buy(raw).await,
            "sell" => self.sell(raw).await,
            "close" => self.close(raw).await,
            "closeall" => self.close_all().await,
            "stoploss" | "stop_loss" => self.stoploss(raw).await,
            "takeprofit" | "take_profit" => self.takeprofit(raw).await,
            "tpsl" => self.tpsl(raw).await,
            "trailstop" | "trailing_stop" => self.trailstop(raw).await,
            "leverage" => self.leverage(raw).await,
            "globalleverage" => self.global_leverage(raw).await,
            "cancel" => self.cancel(raw).await,
            "cancelall" => self.cancel_all(raw).await,
            other => Err(ValidationError::invalid(
                "command",
                format!("알 수 없는 명령입니다: {other}"),
            )
            .into()),
        }
    }

    /// 롱 진입 (헤지 모드에서는 롱 방향 포지션).
    pub async fn long(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        self.run_open(OrderCommand::Long, raw).await
    }

    /// 숏 진입 (헤지 모드에서는 숏 방향 포지션).
    pub async fn short(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        self.run_open(OrderCommand::Short, raw).await
    }

    /// 매수 주문.
    pub async fn buy(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        self.run_open(OrderCommand::Buy, raw).await
    }

    /// 매도 주문.
    pub async fn sell(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        self.run_open(OrderCommand::Sell, raw).await
    }

    /// 포지션 청산. 사이징이 없으면 전량 청산으로 처리합니다.
    pub async fn close(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, "close", CommandState::Validating);
        match self.close_inner(raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, "close", err)),
        }
    }

    /// 계정의 모든 포지션을 전량 청산합니다.
    ///
    /// 심볼별 청산 실패는 자체 이벤트를 남기고 다음 포지션으로
    /// 진행합니다.
    pub async fn close_all(&self) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, "closeall", CommandState::Validating);
        match self.close_all_inner(&diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, "closeall", err)),
        }
    }

    /// 손절 주문.
    pub async fn stoploss(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        self.run_conditional(OrderKind::StopLoss, raw).await
    }

    /// 익절 주문.
    pub async fn takeprofit(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        self.run_conditional(OrderKind::TakeProfit, raw).await
    }

    /// 손절과 익절을 한 번에 배치합니다.
    ///
    /// 감소 전용과 동종 주문 취소가 강제되며, 트리거가 없는 레그는
    /// 조용히 건너뜁니다. 한쪽 레그의 실패가 다른 쪽을 막지 않으며
    /// 실패한 레그가 있으면 첫 에러를 반환합니다.
    pub async fn tpsl(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, "tpsl", CommandState::Validating);
        match self.tpsl_inner(raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, "tpsl", err)),
        }
    }

    /// 트레일링 스톱 주문. 포지션이 반드시 필요합니다.
    pub async fn trailstop(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, "trailstop", CommandState::Validating);
        match self.trailstop_inner(raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, "trailstop", err)),
        }
    }

    /// 심볼의 레버리지와 마진 모드를 설정합니다.
    pub async fn leverage(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, "leverage", CommandState::Validating);
        match self.leverage_inner(raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, "leverage", err)),
        }
    }

    /// 모든 마켓에 같은 레버리지를 적용합니다.
    ///
    /// 일부 심볼이 실패해도 나머지 심볼을 계속 처리하고, 실패가
    /// 있으면 마지막 에러를 반환합니다.
    pub async fn global_leverage(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, "globalleverage", CommandState::Validating);
        match self.global_leverage_inner(raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, "globalleverage", err)),
        }
    }

    /// 특정 주문을 취소합니다.
    pub async fn cancel(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, "cancel", CommandState::Validating);
        match self.cancel_inner(raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, "cancel", err)),
        }
    }

    /// 심볼의 미체결 주문을 전부 또는 종류별로 취소합니다.
    pub async fn cancel_all(&self, raw: &RawParams) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, "cancelall", CommandState::Validating);
        match self.cancel_all_inner(raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, "cancelall", err)),
        }
    }

    // =========================================================================
    // 진입 명령 흐름
    // =========================================================================

    async fn run_open(
        &self,
        command: OrderCommand,
        raw: &RawParams,
    ) -> Result<CommandOutcome, TradeError> {
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, command.as_str(), CommandState::Validating);
        match self.open_inner(command, raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, command.as_str(), err)),
        }
    }

    async fn open_inner(
        &self,
        command: OrderCommand,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let label = command.as_str();
        let mut params = OpenParams::from_raw(raw)?;

        risk::check_ignored(&self.account, &params.symbol, self.config.as_ref(), diag).await?;

        let market = self.fetch_market(&params.symbol, diag).await?;
        let (balances, positions) = self.snapshot(diag).await?;

        // 사이징이 전혀 없으면 DCA 스케일 / 기본 크기 설정을 적용
        if !params.has_sizing() {
            self.apply_order_defaults(&mut params, &positions, &market, diag)
                .await?;
        }
        if !params.has_sizing() {
            return Err(ValidationError::missing("size").into());
        }

        params.direction = risk::negotiate_position_mode(
            self.adapter.as_ref(),
            &params.symbol,
            command,
            params.direction,
            diag,
        )
        .await?;

        risk::check_max_position_count(
            &self.account,
            &params.symbol,
            &positions,
            self.config.as_ref(),
            diag,
        )
        .await?;

        let position = find_position(&positions, &params.symbol, params.direction)?;

        self.transition(diag, label, CommandState::Sizing);
        let outcome = size::resolve(
            &SizeInput {
                command,
                market: &market,
                position,
                equity_usd: total_free_usd(&balances),
                order_sizing: self.adapter.settings().order_sizing,
                size: params.size.clone(),
                base: params.base.clone(),
                quote: params.quote.clone(),
                usd: params.usd.clone(),
                scale: params.scale,
                max_size: params.max_size,
                signal_size: params.signal_size,
                layered: params.price.as_ref().is_some_and(|price| price.is_layered()),
            },
            self.config.as_ref(),
            diag,
        )
        .await?;

        self.transition(diag, label, CommandState::Building);
        let options = OrderOptions {
            reduce: false,
            post_only: params.post_only,
            time_in_force: params.time_in_force,
            tag: params.tag.as_deref(),
        };
        let orders = self.build_orders(&market, &outcome, params.price.as_ref(), &options, diag)?;

        let submitted = self
            .submit_stage(
                label,
                &params.symbol,
                params.cancel_all,
                None,
                orders,
                started,
                diag,
            )
            .await?;

        // 진입이 체결 경로에 오르면 보호 레그를 이어서 배치한다
        if !submitted.is_empty() {
            self.chain_protection(command, &params, &market, diag).await;
        }

        self.transition(diag, label, CommandState::Done);
        Ok(self.finish(diag, started, submitted))
    }

    async fn close_inner(
        &self,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let params = CloseParams::from_raw(raw)?;

        risk::check_ignored(&self.account, &params.symbol, self.config.as_ref(), diag).await?;

        let market = self.fetch_market(&params.symbol, diag).await?;
        let (balances, positions) = self.snapshot(diag).await?;

        let direction = risk::negotiate_position_mode(
            self.adapter.as_ref(),
            &params.symbol,
            OrderCommand::Close,
            params.direction,
            diag,
        )
        .await?;
        let position = find_position(&positions, &params.symbol, direction)?;

        if !params.force {
            risk::check_close_at_loss(&self.account, position, self.config.as_ref(), diag).await?;
        }

        self.transition(diag, "close", CommandState::Sizing);
        let outcome = size::resolve(
            &SizeInput {
                command: OrderCommand::Close,
                market: &market,
                position,
                equity_usd: total_free_usd(&balances),
                order_sizing: self.adapter.settings().order_sizing,
                size: params.size.clone(),
                base: params.base.clone(),
                quote: params.quote.clone(),
                usd: params.usd.clone(),
                scale: None,
                max_size: None,
                signal_size: None,
                layered: params.price.as_ref().is_some_and(|price| price.is_layered()),
            },
            self.config.as_ref(),
            diag,
        )
        .await?;

        self.transition(diag, "close", CommandState::Building);
        let options = OrderOptions {
            reduce: params.reduce,
            post_only: false,
            time_in_force: None,
            tag: params.tag.as_deref(),
        };
        let orders = self.build_orders(&market, &outcome, params.price.as_ref(), &options, diag)?;

        let submitted = self
            .submit_stage(
                "close",
                &params.symbol,
                params.cancel_all,
                None,
                orders,
                started,
                diag,
            )
            .await?;

        self.transition(diag, "close", CommandState::Done);
        Ok(self.finish(diag, started, submitted))
    }

    async fn close_all_inner(
        &self,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let positions = self.adapter.positions().await?;

        let mut orders = Vec::new();
        for position in &positions {
            let mut raw = RawParams::new();
            raw.insert("symbol", &position.symbol);
            raw.insert("cancelall", "true");
            // 헤지 모드에서만 방향을 지정해 양방향 레그를 구분한다
            if matches!(
                self.adapter.position_mode(&position.symbol).await?,
                Some(PositionMode::Hedged)
            ) {
                raw.insert("direction", position.direction.to_string());
            }
            // 실패한 심볼은 자체 이벤트를 남기고 계속 진행
            if let Ok(mut outcome) = self.close(&raw).await {
                orders.append(&mut outcome.orders);
            }
        }

        self.transition(diag, "closeall", CommandState::Done);
        Ok(self.finish(diag, started, orders))
    }

    // =========================================================================
    // 조건부 명령 흐름
    // =========================================================================

    async fn run_conditional(
        &self,
        kind: OrderKind,
        raw: &RawParams,
    ) -> Result<CommandOutcome, TradeError> {
        let label = conditional_label(kind);
        let started = Instant::now();
        let diag = Diagnostics::new(Arc::clone(&self.sink));
        self.transition(&diag, label, CommandState::Validating);
        match self.conditional_inner(kind, raw, &diag, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.command_failed(&diag, label, err)),
        }
    }

    async fn conditional_inner(
        &self,
        kind: OrderKind,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let params = ConditionalParams::from_raw(raw)?;
        let market = self.fetch_market(&params.symbol, diag).await?;
        let submitted = self.protection_leg(kind, &params, &market, false, diag).await?;
        self.transition(diag, conditional_label(kind), CommandState::Done);
        Ok(self.finish(diag, started, submitted))
    }

    async fn tpsl_inner(
        &self,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let mut params = ConditionalParams::from_raw(raw)?;
        params.reduce = true;
        params.cancel_all = true;

        let market = self.fetch_market(&params.symbol, diag).await?;

        let mut orders = Vec::new();
        let mut first_error = None;
        for kind in [OrderKind::StopLoss, OrderKind::TakeProfit] {
            match self.protection_leg(kind, &params, &market, true, diag).await {
                Ok(mut submitted) => orders.append(&mut submitted),
                Err(err) => {
                    diag.warning(
                        "order_leg_failed",
                        json!([conditional_label(kind), err.to_string()]),
                    );
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        self.transition(diag, "tpsl", CommandState::Done);
        Ok(self.finish(diag, started, orders))
    }

    /// 손절/익절 레그 하나를 배치합니다.
    ///
    /// 트리거와 레그 크기가 모두 명시되면 잠재 포지션 계산 없이 바로
    /// 주문하고, 그 외에는 잠재 포지션에서 방향/수량/앵커 가격을
    /// 가져옵니다. `chained`가 참이면 트리거나 잠재 포지션이 없을 때
    /// 에러 대신 빈 결과로 건너뜁니다.
    async fn protection_leg(
        &self,
        kind: OrderKind,
        params: &ConditionalParams,
        market: &Market,
        chained: bool,
        diag: &Diagnostics,
    ) -> Result<Vec<SubmittedOrder>, TradeError> {
        let label = conditional_label(kind);
        let started = Instant::now();

        let (explicit_trigger, default_key, default_code, trigger_field) = match kind {
            OrderKind::TakeProfit => (
                params.protection.profit_trigger.clone(),
                "defprofittrigger",
                "order_tp_default",
                "profittrigger",
            ),
            _ => (
                params.protection.stop_trigger.clone(),
                "defstoptrigger",
                "order_sl_default",
                "stoptrigger",
            ),
        };
        let has_explicit_leg = match kind {
            OrderKind::TakeProfit => params.protection.has_profit_size(),
            _ => params.protection.has_stop_size(),
        };
        let direct = explicit_trigger.is_some() && has_explicit_leg;

        if !direct {
            risk::check_ignored(&self.account, &params.symbol, self.config.as_ref(), diag).await?;
        }

        let mut trigger_expr = match explicit_trigger {
            Some(expr) => expr,
            None => {
                match self
                    .default_trigger(&params.symbol, default_key, default_code, trigger_field, diag)
                    .await?
                {
                    Some(expr) => expr,
                    None if chained => return Ok(Vec::new()),
                    None => return Err(ValidationError::missing(trigger_field).into()),
                }
            }
        };

        // 퍼센트 레그 환산에 쓰이는 현재 포지션
        let position = self.adapter.position(&params.symbol, params.direction).await?;

        self.transition(diag, label, CommandState::Sizing);
        let mut side = params.side;
        let mut anchor = None;

        let (unit, value) = if direct {
            match leg_size_values(&params.protection, kind, position.as_ref()) {
                Some(leg) => leg,
                None => return Err(SizingError::NoPosition(params.symbol.clone()).into()),
            }
        } else {
            // 상대 트리거의 부호로 방향 추론
            if side.is_none() {
                if let PriceExpression::Relative { sign, .. } = &trigger_expr {
                    side = Some(protective_side(kind, *sign));
                }
            }
            // 절대 트리거의 호가 위치로 방향 추론
            if side.is_none() {
                if let PriceExpression::Absolute(value) = &trigger_expr {
                    if *value < market.bid {
                        side = Some(match kind {
                            OrderKind::TakeProfit => OrderSide::Buy,
                            _ => OrderSide::Sell,
                        });
                    } else if *value > market.ask {
                        side = Some(match kind {
                            OrderKind::TakeProfit => OrderSide::Sell,
                            _ => OrderSide::Buy,
                        });
                    }
                }
            }

            let filter = side.map(|side| side.opposite());
            let potential = self
                .potential_position(&params.symbol, params.direction, filter, market, diag)
                .await?;
            let Some(potential) = potential else {
                if params.cancel_all {
                    let canceled = self.adapter.cancel_orders_of_kind(&params.symbol, kind).await?;
                    diag.notice("orders_cancel", json!([canceled.len()]));
                }
                diag.notice("position_nopotential", json!([params.symbol]));
                if chained {
                    return Ok(Vec::new());
                }
                return Err(SizingError::NoPosition(params.symbol.clone()).into());
            };
            if side.is_none() {
                side = Some(potential.side.opposite());
            }
            anchor = Some(market.round_price(potential.price));
            (potential.unit, potential.amount)
        };

        // 부호 없는 퍼센트 트리거에 방향 부호를 입힌다
        if matches!(trigger_expr, PriceExpression::Percent(_)) {
            let sign = match (kind, side) {
                (OrderKind::TakeProfit, Some(OrderSide::Sell)) => Sign::Plus,
                (OrderKind::TakeProfit, _) => Sign::Minus,
                (_, Some(OrderSide::Sell)) => Sign::Minus,
                (_, _) => Sign::Plus,
            };
            trigger_expr = trigger_expr.with_sign(sign);
        }

        let trigger_price = resolve_price(market, &trigger_expr, anchor, diag)?;
        let limit_expr = match kind {
            OrderKind::TakeProfit => params.protection.profit_price.clone(),
            _ => params.protection.stop_price.clone(),
        };
        let limit_price = match &limit_expr {
            Some(expr) => Some(resolve_price(market, expr, None, diag)?),
            None => None,
        };

        self.transition(diag, label, CommandState::Building);
        let spec = ConditionalSpec {
            kind,
            side,
            trigger: trigger_price,
            price: limit_price,
            unit,
            value,
            trail_by: None,
            reduce: params.reduce,
            trigger_type: params.trigger_type.unwrap_or_default(),
            tag: params.tag.as_deref(),
        };
        let order = builder::build_conditional(
            market,
            self.adapter.settings().order_sizing,
            &spec,
            &self.stablecoins,
            diag,
        )?;

        self.submit_stage(
            label,
            &params.symbol,
            params.cancel_all,
            Some(kind),
            vec![order],
            started,
            diag,
        )
        .await
    }

    async fn trailstop_inner(
        &self,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let params = ConditionalParams::from_raw(raw)?;
        let Some(trail_expr) = params.trailstop.clone() else {
            return Err(ValidationError::missing("trailstop").into());
        };

        risk::check_ignored(&self.account, &params.symbol, self.config.as_ref(), diag).await?;

        let market = self.fetch_market(&params.symbol, diag).await?;
        let Some(position) = self.adapter.position(&params.symbol, params.direction).await? else {
            diag.notice("position_nopotential", json!([params.symbol]));
            return Err(SizingError::NoPosition(params.symbol.clone()).into());
        };

        self.transition(diag, "trailstop", CommandState::Sizing);
        let anchor = market.average_price();

        // 트레일링 간격: 퍼센트는 현재 평균가 기준, 부호가 없으면
        // 포지션 방향으로 결정한다 (롱은 아래로, 숏은 위로 따라간다)
        let trail_by = match &trail_expr {
            PriceExpression::Absolute(value) => {
                -position.direction.sign() * market.round_price(value.abs())
            }
            PriceExpression::Percent(percent) => {
                let offset = market.round_price((anchor * *percent / Decimal::ONE_HUNDRED).abs());
                -position.direction.sign() * offset
            }
            PriceExpression::Relative { sign, offset } => {
                sign.factor() * market.round_price(offset.magnitude(anchor))
            }
            PriceExpression::Layered { .. } => {
                return Err(
                    ValidationError::invalid("trailstop", "레이어드 가격은 허용되지 않습니다")
                        .into(),
                );
            }
        };
        let trigger_price = market.round_price(market.average_price() + trail_by);

        let (unit, value) =
            match leg_size_values(&params.protection, OrderKind::StopLoss, Some(&position)) {
                Some(leg) => leg,
                None => match self.adapter.settings().order_sizing {
                    OrderSizing::Base => (SizeUnit::Base, position.base_size),
                    OrderSizing::Quote => (SizeUnit::Quote, position.quote_size),
                },
            };

        self.transition(diag, "trailstop", CommandState::Building);
        let limit_price = match &params.protection.stop_price {
            Some(expr) => Some(resolve_price(&market, expr, None, diag)?),
            None => None,
        };
        let spec = ConditionalSpec {
            kind: OrderKind::TrailingStop,
            side: Some(position.close_side()),
            trigger: trigger_price,
            price: limit_price,
            unit,
            value,
            trail_by: Some(trail_by),
            reduce: params.reduce,
            trigger_type: params.trigger_type.unwrap_or_default(),
            tag: params.tag.as_deref(),
        };
        let order = builder::build_conditional(
            &market,
            self.adapter.settings().order_sizing,
            &spec,
            &self.stablecoins,
            diag,
        )?;

        let submitted = self
            .submit_stage(
                "trailstop",
                &params.symbol,
                params.cancel_all,
                Some(OrderKind::TrailingStop),
                vec![order],
                started,
                diag,
            )
            .await?;

        self.transition(diag, "trailstop", CommandState::Done);
        Ok(self.finish(diag, started, submitted))
    }

    /// 진입 성공 후 보호 레그를 이어서 배치합니다.
    ///
    /// 레그 실패는 경고 이벤트로만 남기고 진입 결과에는 영향을 주지
    /// 않습니다.
    async fn chain_protection(
        &self,
        command: OrderCommand,
        params: &OpenParams,
        market: &Market,
        diag: &Diagnostics,
    ) {
        let Some(entry_side) = command.entry_side() else {
            return;
        };
        let leg_params = ConditionalParams {
            symbol: params.symbol.clone(),
            direction: params.direction,
            side: Some(entry_side.opposite()),
            reduce: true,
            tag: params.tag.clone(),
            cancel_all: true,
            trigger_type: None,
            trailstop: None,
            protection: params.protection.clone(),
        };
        for kind in [OrderKind::StopLoss, OrderKind::TakeProfit] {
            if let Err(err) = self.protection_leg(kind, &leg_params, market, true, diag).await {
                diag.warning(
                    "order_leg_failed",
                    json!([conditional_label(kind), err.to_string()]),
                );
            }
        }
    }

    // =========================================================================
    // 레버리지 / 취소 명령 흐름
    // =========================================================================

    async fn leverage_inner(
        &self,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let params = LeverageParams::from_raw(raw)?;
        let Some(symbol) = params.symbol else {
            return Err(ValidationError::missing("symbol").into());
        };

        match self
            .adapter
            .set_leverage(&symbol, params.leverage, params.margin_mode)
            .await
        {
            Ok(()) => {
                diag.success(
                    "leverage_set",
                    json!([symbol, params.leverage, params.margin_mode.as_str()]),
                );
            }
            Err(err) => {
                diag.error("leverage_set", json!([symbol, err.to_string()]));
                return Err(err.into());
            }
        }

        self.transition(diag, "leverage", CommandState::Done);
        Ok(self.finish(diag, started, Vec::new()))
    }

    async fn global_leverage_inner(
        &self,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let params = LeverageParams::from_raw(raw)?;
        let markets = self.adapter.markets().await?;

        let mut failures = 0usize;
        let mut last_error = None;
        for market in &markets {
            diag.debug("leverage_set", json!([market.symbol, params.leverage]));
            if let Err(err) = self
                .adapter
                .set_leverage(&market.symbol, params.leverage, params.margin_mode)
                .await
            {
                failures += 1;
                last_error = Some(err);
            }
        }

        if let Some(err) = last_error {
            diag.error("leverage_set_all", json!([failures, markets.len()]));
            return Err(err.into());
        }
        diag.success(
            "leverage_set_all",
            json!([params.leverage, params.margin_mode.as_str(), markets.len()]),
        );

        self.transition(diag, "globalleverage", CommandState::Done);
        Ok(self.finish(diag, started, Vec::new()))
    }

    async fn cancel_inner(
        &self,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let params = CancelParams::from_raw(raw)?;

        match self.adapter.cancel_order(&params.symbol, &params.id).await {
            Ok(()) => diag.notice("order_cancel", json!([params.id])),
            Err(err) => {
                diag.error("order_cancel", json!([params.id, err.to_string()]));
                return Err(err.into());
            }
        }

        self.transition(diag, "cancel", CommandState::Done);
        Ok(self.finish(diag, started, Vec::new()))
    }

    async fn cancel_all_inner(
        &self,
        raw: &RawParams,
        diag: &Diagnostics,
        started: Instant,
    ) -> Result<CommandOutcome, TradeError> {
        let params = CancelAllParams::from_raw(raw)?;

        let canceled = match params.kind {
            Some(kind) => {
                self.adapter
                    .cancel_orders_of_kind(&params.symbol, kind)
                    .await?
            }
            None => self.adapter.cancel_all(&params.symbol).await?,
        };
        diag.notice("orders_cancel", json!([canceled.len()]));

        self.transition(diag, "cancelall", CommandState::Done);
        Ok(self.finish(diag, started, Vec::new()))
    }

    // =========================================================================
    // 공통 단계
    // =========================================================================

    async fn fetch_market(
        &self,
        symbol: &str,
        diag: &Diagnostics,
    ) -> Result<Market, TradeError> {
        match self.adapter.market(symbol).await {
            Ok(market) => Ok(market),
            Err(err) => {
                diag.error("market_retrieve", json!([symbol]));
                Err(err.into())
            }
        }
    }

    async fn snapshot(
        &self,
        diag: &Diagnostics,
    ) -> Result<(Vec<Balance>, Vec<Position>), TradeError> {
        match tokio::try_join!(self.adapter.balances(), self.adapter.positions()) {
            Ok((balances, positions)) => {
                diag.debug("account_snapshot", json!([balances.len(), positions.len()]));
                Ok((balances, positions))
            }
            Err(err) => {
                diag.error("account_snapshot", json!([err.to_string()]));
                Err(err.into())
            }
        }
    }

    /// 사이징이 없는 진입 명령에 DCA 스케일과 기본 크기 설정을
    /// 적용합니다.
    ///
    /// 포지션 보유 중이고 `dcascale`이 설정되어 있으면 최초 진입
    /// 주문의 견적 가치에 스케일을 곱해 `quote` 사이징으로 주입하고,
    /// 그래도 사이징이 없으면 `defsize`를 `size`로 주입합니다.
    async fn apply_order_defaults(
        &self,
        params: &mut OpenParams,
        positions: &[Position],
        market: &Market,
        diag: &Diagnostics,
    ) -> Result<(), TradeError> {
        let position = find_position(positions, &params.symbol, params.direction)?;

        if let Some(position) = position.filter(|position| !position.usd_size.is_zero()) {
            if let Some((key, value)) = self.scoped_config(&params.symbol, "dcascale").await {
                diag.debug("order_dca_default", json!([key, value]));
                let scale = value
                    .trim_end_matches(['x', 'X'])
                    .parse::<Decimal>()
                    .map_err(|err| ValidationError::invalid("dcascale", err))?;
                match self.dca_initial(&params.symbol, position, market).await? {
                    Some(initial) => {
                        let quote = initial * scale;
                        params.quote = Some(SizingExpression::Absolute(quote));
                        diag.notice("order_sizing_dca", json!([scale, initial, initial + quote]));
                    }
                    None => diag.warning("dca_fallback", json!([])),
                }
            }
        }

        if params.quote.is_none() && params.scale.is_none() {
            if let Some((key, value)) = self.scoped_config(&params.symbol, "defsize").await {
                diag.debug("order_size_default", json!([key, value]));
                params.size = Some(
                    SizingExpression::parse(&value)
                        .map_err(|err| ValidationError::invalid("defsize", err))?,
                );
            }
        }
        Ok(())
    }

    /// 7일간의 주문 이력을 최신순으로 걸어 내려가 현재 포지션의
    /// 최초 진입 주문을 찾고 그 견적 가치를 반환합니다.
    ///
    /// 이력의 서명 수량 합이 포지션과 맞아떨어지지 않으면 `None`을
    /// 반환합니다 (이력 창 밖에서 시작된 포지션).
    async fn dca_initial(
        &self,
        symbol: &str,
        position: &Position,
        market: &Market,
    ) -> Result<Option<Decimal>, TradeError> {
        let since = Utc::now() - chrono::Duration::days(7);
        let mut history = self.adapter.order_history(symbol, since).await?;
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let entry_side = position.direction.open_side();
        let mut balance = position.signed_size(SizeUnit::Base);
        let mut entries = Vec::new();
        let mut matched = false;
        for order in &history {
            if order.filled.is_zero() {
                continue;
            }
            match order.side {
                OrderSide::Sell => balance += order.filled,
                OrderSide::Buy => balance -= order.filled,
            }
            if order.side == entry_side {
                entries.push(order);
            }
            if balance.is_zero() {
                matched = true;
                break;
            }
        }
        if !matched {
            return Ok(None);
        }
        // 최신순 수집이므로 마지막 항목이 최초 진입 주문
        Ok(entries.last().map(|order| {
            let price = order.price.unwrap_or_else(|| market.average_price());
            order.filled * price
        }))
    }

    /// 현재 포지션, 거래소에 걸려 있는 일반 주문의 미체결 잔량,
    /// 큐에 대기 중인 일반 주문을 합산합니다.
    ///
    /// `side_filter`가 주어지면 그 방향의 물량만 집계하고, 없으면
    /// 포지션 방향을, 포지션도 없으면 첫 주문의 방향을 따릅니다.
    async fn potential_position(
        &self,
        symbol: &str,
        direction: Option<PositionDirection>,
        side_filter: Option<OrderSide>,
        market: &Market,
        diag: &Diagnostics,
    ) -> Result<Option<PotentialPosition>, TradeError> {
        let order_sizing = self.adapter.settings().order_sizing;
        let mut side = side_filter;
        let mut levels: Vec<(Decimal, Decimal)> = Vec::new();

        if let Some(position) = self.adapter.position(symbol, direction).await? {
            let position_side = position.direction.open_side();
            if side.is_none() {
                side = Some(position_side);
            }
            if side == Some(position_side) {
                levels.push((position.entry_price, position.base_size));
            }
        }

        for order in self.adapter.open_orders(symbol).await? {
            if !order.is_open() || !order.is_plain() {
                continue;
            }
            if side.is_none() {
                side = Some(order.side);
            }
            if Some(order.side) != side {
                continue;
            }
            // 체결분은 이미 포지션에 반영되어 있으므로 잔량만 더한다
            let remaining = order.amount - order.filled;
            let price = order.price.unwrap_or_else(|| market.average_price());
            if remaining <= Decimal::ZERO || price <= Decimal::ZERO {
                continue;
            }
            let base = match order_sizing {
                OrderSizing::Base => remaining,
                OrderSizing::Quote => remaining * market.contract_size / price,
            };
            levels.push((price, base));
        }

        let key = QueueKey::new(self.account.clone(), symbol);
        for item in self.queue.snapshot(&key).await {
            if item.is_conditional() {
                continue;
            }
            if side.is_none() {
                side = Some(item.side);
            }
            if Some(item.side) != side {
                continue;
            }
            let price = item.price.unwrap_or_else(|| market.average_price());
            if price <= Decimal::ZERO {
                continue;
            }
            let base = match order_sizing {
                OrderSizing::Base => item.amount,
                OrderSizing::Quote => item.amount * market.contract_size / price,
            };
            levels.push((price, base));
        }

        let total_base: Decimal = levels.iter().map(|(_, base)| *base).sum();
        if total_base <= Decimal::ZERO {
            return Ok(None);
        }
        let Some(side) = side else {
            return Ok(None);
        };
        let total_value: Decimal = levels.iter().map(|(price, base)| *price * *base).sum();
        let average = total_value / total_base;

        let (unit, amount) = match order_sizing {
            OrderSizing::Base => (SizeUnit::Base, total_base),
            OrderSizing::Quote => (SizeUnit::Quote, total_value),
        };
        diag.debug(
            "potential_position",
            json!([amount, unit.to_string(), average, side.as_str()]),
        );
        Ok(Some(PotentialPosition {
            unit,
            amount,
            price: average,
            side,
        }))
    }

    fn build_orders(
        &self,
        market: &Market,
        outcome: &size::SizeOutcome,
        price: Option<&PriceExpression>,
        options: &OrderOptions<'_>,
        diag: &Diagnostics,
    ) -> Result<Vec<OrderDescriptor>, TradeError> {
        let order_sizing = self.adapter.settings().order_sizing;
        match price {
            Some(PriceExpression::Layered { lower, upper, levels }) => {
                let prices = resolve_layered(market, lower, upper, *levels, diag);
                Ok(builder::build_layered(
                    market,
                    order_sizing,
                    outcome,
                    &prices,
                    options,
                    &self.stablecoins,
                    diag,
                )?)
            }
            Some(expr) => {
                let resolved = resolve_price(market, expr, None, diag)?;
                Ok(vec![builder::build_standard(
                    market,
                    order_sizing,
                    outcome,
                    Some(resolved),
                    options,
                    &self.stablecoins,
                    diag,
                )?])
            }
            None => Ok(vec![builder::build_standard(
                market,
                order_sizing,
                outcome,
                None,
                options,
                &self.stablecoins,
                diag,
            )?]),
        }
    }

    /// 큐 락 안에서 기존 주문 취소, 큐 교체, 순차 제출을 수행합니다.
    ///
    /// `order_completed` 통지는 제출 결과와 무관하게 발행됩니다.
    async fn submit_stage(
        &self,
        label: &str,
        symbol: &str,
        cancel_existing: bool,
        cancel_kind: Option<OrderKind>,
        orders: Vec<OrderDescriptor>,
        started: Instant,
        diag: &Diagnostics,
    ) -> Result<Vec<SubmittedOrder>, TradeError> {
        let key = QueueKey::new(self.account.clone(), symbol);
        self.transition(diag, label, CommandState::Queued);
        let _guard = self.queue.acquire(&key).await;

        if cancel_existing {
            let canceled = match cancel_kind {
                Some(kind) => self.adapter.cancel_orders_of_kind(symbol, kind).await,
                None => self.adapter.cancel_all(symbol).await,
            };
            // 취소 실패는 제출을 막지 않는다
            match canceled {
                Ok(ids) => diag.notice("orders_cancel", json!([ids.len()])),
                Err(err) => diag.notice("orders_cancel", json!([0, err.to_string()])),
            }
        }

        self.queue.clear(&key).await;
        self.queue.add(&key, orders).await;
        self.transition(diag, label, CommandState::Submitting);
        let result = self.queue.process(&key, self.adapter.as_ref(), diag).await;
        diag.notice("order_completed", json!([started.elapsed().as_secs_f64()]));
        Ok(result?)
    }

    /// 계정 설정을 심볼 우선으로 조회합니다.
    ///
    /// 반환되는 키는 실제로 매칭된 전체 키(소문자)입니다.
    async fn scoped_config(&self, symbol: &str, key: &str) -> Option<(String, String)> {
        let symbol_key = format!("{symbol}:{key}");
        if let Some(value) = self.config.get_string(&self.account, &symbol_key).await {
            let matched = format!("{}:{}", self.account, symbol_key).to_lowercase();
            return Some((matched, value));
        }
        let value = self.config.get_string(&self.account, key).await?;
        let matched = format!("{}:{}", self.account, key).to_lowercase();
        Some((matched, value))
    }

    /// 설정에서 기본 트리거를 읽어 해석합니다.
    async fn default_trigger(
        &self,
        symbol: &str,
        key: &str,
        code: &str,
        field: &str,
        diag: &Diagnostics,
    ) -> Result<Option<PriceExpression>, TradeError> {
        let Some((matched_key, value)) = self.scoped_config(symbol, key).await else {
            return Ok(None);
        };
        diag.debug(code, json!([matched_key, value]));
        let expr = PriceExpression::parse(&value)
            .map_err(|err| ValidationError::invalid(field, err))?;
        if expr.is_layered() {
            return Err(
                ValidationError::invalid(field, "레이어드 가격은 허용되지 않습니다").into(),
            );
        }
        Ok(Some(expr))
    }

    fn transition(&self, diag: &Diagnostics, label: &str, state: CommandState) {
        diag.debug("command_state", json!([label, state.as_str()]));
    }

    fn command_failed(&self, diag: &Diagnostics, label: &str, err: TradeError) -> TradeError {
        if let TradeError::Validation(validation) = &err {
            diag.error(
                "command_params",
                json!([validation.field, validation.reason]),
            );
        }
        self.transition(diag, label, CommandState::Failed);
        err
    }

    fn finish(
        &self,
        diag: &Diagnostics,
        started: Instant,
        orders: Vec<SubmittedOrder>,
    ) -> CommandOutcome {
        CommandOutcome {
            command_id: diag.command_id(),
            state: CommandState::Done,
            orders,
            elapsed: started.elapsed(),
        }
    }
}

// =============================================================================
// 보조 함수
// =============================================================================

/// 포지션 스냅샷에서 심볼/방향이 일치하는 포지션을 찾습니다.
///
/// # Errors
///
/// 방향이 지정되지 않았는데 같은 심볼에 양방향 포지션이 있으면
/// `AdapterError::Api`를 반환합니다.
fn find_position<'a>(
    positions: &'a [Position],
    symbol: &str,
    direction: Option<PositionDirection>,
) -> Result<Option<&'a Position>, AdapterError> {
    let mut matches = positions
        .iter()
        .filter(|position| position.symbol == symbol)
        .filter(|position| direction.map_or(true, |d| position.direction == d));
    let first = matches.next();
    if direction.is_none() && matches.next().is_some() {
        return Err(AdapterError::Api(format!(
            "{symbol} 심볼에 방향이 다른 포지션이 둘 이상 있습니다"
        )));
    }
    Ok(first)
}

/// 보호 레그의 명시적 크기. 우선순위는 base > quote > usd이며,
/// 익절의 퍼센트 크기는 포지션 기초 수량에 대한 비율입니다.
fn leg_size_values(
    protection: &ProtectionParams,
    kind: OrderKind,
    position: Option<&Position>,
) -> Option<(SizeUnit, Decimal)> {
    match kind {
        OrderKind::TakeProfit => {
            if let (Some(percent), Some(position)) = (protection.profit_size_percent, position) {
                return Some((
                    SizeUnit::Base,
                    position.base_size * percent / Decimal::ONE_HUNDRED,
                ));
            }
            if let Some(base) = protection.profit_base {
                return Some((SizeUnit::Base, base));
            }
            if let Some(quote) = protection.profit_quote {
                return Some((SizeUnit::Quote, quote));
            }
            protection.profit_usd.map(|usd| (SizeUnit::Usd, usd))
        }
        _ => {
            if let Some(base) = protection.stop_base {
                return Some((SizeUnit::Base, base));
            }
            if let Some(quote) = protection.stop_quote {
                return Some((SizeUnit::Quote, quote));
            }
            protection.stop_usd.map(|usd| (SizeUnit::Usd, usd))
        }
    }
}

/// 상대 트리거 부호가 가리키는 보호 주문 방향.
///
/// 손절은 `-`가 매도(롱 보호), 익절은 `+`가 매도입니다.
fn protective_side(kind: OrderKind, sign: Sign) -> OrderSide {
    let sell_sign = if kind == OrderKind::TakeProfit {
        Sign::Plus
    } else {
        Sign::Minus
    };
    if sign == sell_sign {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

fn conditional_label(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::TakeProfit => "takeprofit",
        OrderKind::TrailingStop => "trailstop",
        _ => "stoploss",
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RiskRejection;
    use relaybot_core::{
        Balance, MarketType, MemoryConfigStore, MemorySink, OrderStatus, TriggerType,
    };
    use relaybot_exchange::MockExchangeAdapter;
    use rust_decimal_macros::dec;

    struct Harness {
        orchestrator: TradeOrchestrator,
        adapter: Arc<MockExchangeAdapter>,
        config: Arc<MemoryConfigStore>,
        sink: Arc<MemorySink>,
    }

    fn harness(adapter: MockExchangeAdapter) -> Harness {
        let adapter = Arc::new(adapter);
        let config = Arc::new(MemoryConfigStore::new());
        let sink = Arc::new(MemorySink::new());
        let orchestrator = TradeOrchestrator::new(
            "main",
            Arc::clone(&adapter) as Arc<dyn ExecutionAdapter>,
            Arc::clone(&config) as Arc<dyn ConfigStore>,
            Arc::clone(&sink) as Arc<dyn DiagnosticsSink>,
        );
        Harness {
            orchestrator,
            adapter,
            config,
            sink,
        }
    }

    fn raw(pairs: &[(&str, &str)]) -> RawParams {
        pairs.iter().copied().collect()
    }

    // 매수 1호가 99 / 매도 1호가 101, 중간가 100
    fn spot_market() -> Market {
        Market::new("BTC/USDT", MarketType::Spot, dec!(99), dec!(101))
            .with_precision(dec!(0.01), dec!(0.0001))
            .with_limits(dec!(0.0001), None)
    }

    fn long_position(base: Decimal) -> Position {
        Position::new("BTC/USDT", PositionDirection::Long, base, dec!(100))
    }

    fn usdt_balance() -> Balance {
        Balance::new("USDT", dec!(5000), dec!(5000))
    }

    fn history_order(
        id: &str,
        side: OrderSide,
        filled: Decimal,
        price: Decimal,
        hours_ago: i64,
    ) -> SubmittedOrder {
        SubmittedOrder {
            id: id.to_string(),
            symbol: "BTC/USDT".to_string(),
            side,
            kind: OrderKind::Market,
            status: OrderStatus::Closed,
            price: Some(price),
            amount: filled,
            filled,
            timestamp: Utc::now() - chrono::Duration::hours(hours_ago),
        }
    }

    fn open_limit_order(id: &str) -> SubmittedOrder {
        SubmittedOrder {
            id: id.to_string(),
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            kind: OrderKind::Limit,
            status: OrderStatus::Open,
            price: Some(dec!(95)),
            amount: dec!(1),
            filled: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    fn open_stop_order(id: &str) -> SubmittedOrder {
        SubmittedOrder {
            id: id.to_string(),
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Sell,
            kind: OrderKind::StopLoss,
            status: OrderStatus::Open,
            price: None,
            amount: dec!(1),
            filled: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_buy_usd_submits_market_order() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance()),
        );

        let outcome = h
            .orchestrator
            .buy(&raw(&[("symbol", "BTC/USDT"), ("usd", "500")]))
            .await
            .unwrap();

        assert_eq!(outcome.state, CommandState::Done);
        assert_eq!(outcome.orders.len(), 1);
        let order = h.adapter.last_submitted().await.unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.kind, OrderKind::Market);
        // 500 USDT / 매도 1호가 101, 스텝 0.0001 내림
        assert_eq!(order.amount, dec!(4.9504));
        assert!(h.sink.has_code("order_sizing_ord"));
        assert!(h.sink.has_code("order_completed"));
    }

    #[tokio::test]
    async fn test_open_uses_default_size_from_config() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance()),
        );
        h.config.set("main", "defsize", json!("250")).await;

        h.orchestrator
            .buy(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap();

        assert!(h.sink.has_code("order_size_default"));
        let order = h.adapter.last_submitted().await.unwrap();
        assert_eq!(order.amount, dec!(2.4752));
    }

    #[tokio::test]
    async fn test_open_without_sizing_fails_validation() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance()),
        );

        let err = h
            .orchestrator
            .buy(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap_err();

        assert!(matches!(err, TradeError::Validation(_)));
        assert!(h.sink.has_code("command_params"));
        // 제출 이전 실패는 거래소에 아무 변화가 없다
        assert!(h.adapter.submitted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_sizing_failure_keeps_existing_orders() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance())
                .with_open_order(open_limit_order("o1")),
        );

        // 상대 사이징에 maxsize가 없으면 거부된다
        let err = h
            .orchestrator
            .long(&raw(&[("symbol", "BTC/USDT"), ("size", "+500")]))
            .await
            .unwrap_err();

        assert!(matches!(err, TradeError::Sizing(_)));
        assert!(h.sink.has_code("order_rel_req_max"));
        assert_eq!(h.adapter.open_order_count().await, 1);
        assert!(h.adapter.submitted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_full_cancels_resting_orders() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance())
                .with_position(long_position(dec!(2)))
                .with_open_order(open_limit_order("o1")),
        );

        let outcome = h
            .orchestrator
            .close(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap();

        assert_eq!(outcome.orders.len(), 1);
        let order = h.adapter.last_submitted().await.unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.kind, OrderKind::Market);
        // 전량 청산은 포지션 수량으로 정산된다
        assert_eq!(order.amount, dec!(2));
        // 전량 청산은 기존 주문을 먼저 취소한다
        assert_eq!(h.adapter.open_order_count().await, 0);
        assert!(h.sink.has_code("orders_cancel"));
    }

    #[tokio::test]
    async fn test_close_at_loss_blocked_unless_forced() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance())
                .with_position(long_position(dec!(1)).with_pnl(dec!(-40))),
        );
        h.config.set("main", "disablelossclose", json!(true)).await;

        let err = h
            .orchestrator
            .close(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradeError::Risk(RiskRejection::LossCloseDisabled(_))
        ));
        assert!(h.sink.has_code("position_lossclose"));

        // force 플래그는 가드를 우회한다
        let outcome = h
            .orchestrator
            .close(&raw(&[("symbol", "BTC/USDT"), ("force", "true")]))
            .await
            .unwrap();
        assert_eq!(outcome.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_dca_scale_derives_quote_from_history() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance())
                .with_position(long_position(dec!(1)))
                .with_history_order(history_order("h1", OrderSide::Buy, dec!(1), dec!(100), 2)),
        );
        h.config.set("main", "dcascale", json!("2")).await;

        h.orchestrator
            .buy(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap();

        assert!(h.sink.has_code("order_dca_default"));
        assert!(h.sink.has_code("order_sizing_dca"));
        assert!(!h.sink.has_code("order_size_default"));
        let order = h.adapter.last_submitted().await.unwrap();
        // 최초 진입 100 USDT × 2 = 200 USDT → 200/101 내림
        assert_eq!(order.amount, dec!(1.9801));
    }

    #[tokio::test]
    async fn test_dca_walk_mismatch_falls_back() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance())
                .with_position(long_position(dec!(1)))
                .with_history_order(history_order("h1", OrderSide::Buy, dec!(0.4), dec!(100), 2)),
        );
        h.config.set("main", "dcascale", json!("2")).await;

        let err = h
            .orchestrator
            .buy(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap_err();

        // 이력이 포지션과 맞지 않으면 기본 크기 없이는 실패한다
        assert!(h.sink.has_code("dca_fallback"));
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stoploss_derives_side_and_size_from_position() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_position(long_position(dec!(1))),
        );

        let outcome = h
            .orchestrator
            .stoploss(&raw(&[("symbol", "BTC/USDT"), ("stoptrigger", "-5%")]))
            .await
            .unwrap();

        assert_eq!(outcome.orders.len(), 1);
        let order = h.adapter.last_submitted().await.unwrap();
        assert_eq!(order.kind, OrderKind::StopLoss);
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.amount, dec!(1));
        // 진입가 100 기준 -5%
        assert_eq!(order.trigger_price, Some(dec!(95.00)));
        assert_eq!(order.trigger_type, Some(TriggerType::Mark));
        assert!(order.reduce_only);
        assert!(h.sink.has_code("potential_position"));
    }

    #[tokio::test]
    async fn test_stoploss_without_position_errors() {
        let h = harness(MockExchangeAdapter::new().with_market(spot_market()));

        let err = h
            .orchestrator
            .stoploss(&raw(&[("symbol", "BTC/USDT"), ("stoptrigger", "-5%")]))
            .await
            .unwrap_err();

        assert!(matches!(err, TradeError::Sizing(SizingError::NoPosition(_))));
        assert!(h.sink.has_code("position_nopotential"));
    }

    #[tokio::test]
    async fn test_stoploss_sizes_from_resting_entry_order() {
        // 포지션은 없지만 매수 지정가 1개(1 BTC @ 95)가 걸려 있다
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_open_order(open_limit_order("o1")),
        );

        let outcome = h
            .orchestrator
            .stoploss(&raw(&[("symbol", "BTC/USDT"), ("stoptrigger", "-5%")]))
            .await
            .unwrap();

        assert_eq!(outcome.orders.len(), 1);
        let order = h.adapter.last_submitted().await.unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        // 잠재 포지션 = 미체결 잔량 1, 앵커 = 지정가 95
        assert_eq!(order.amount, dec!(1));
        assert_eq!(order.trigger_price, Some(dec!(90.25)));
        assert!(h.sink.has_code("potential_position"));
    }

    #[tokio::test]
    async fn test_stoploss_uses_config_default_trigger() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_position(long_position(dec!(1))),
        );
        h.config
            .set("main", "BTC/USDT:defstoptrigger", json!("-10%"))
            .await;

        h.orchestrator
            .stoploss(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap();

        assert!(h.sink.has_code("order_sl_default"));
        let order = h.adapter.last_submitted().await.unwrap();
        assert_eq!(order.trigger_price, Some(dec!(90.00)));
    }

    #[tokio::test]
    async fn test_tpsl_places_both_legs() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_position(long_position(dec!(1))),
        );

        let outcome = h
            .orchestrator
            .tpsl(&raw(&[
                ("symbol", "BTC/USDT"),
                ("stoptrigger", "-5%"),
                ("profittrigger", "+10%"),
            ]))
            .await
            .unwrap();

        assert_eq!(outcome.orders.len(), 2);
        let orders = h.adapter.submitted_orders().await;
        assert_eq!(orders[0].kind, OrderKind::StopLoss);
        assert_eq!(orders[0].trigger_price, Some(dec!(95.00)));
        assert_eq!(orders[1].kind, OrderKind::TakeProfit);
        assert_eq!(orders[1].trigger_price, Some(dec!(110.00)));
        // 양쪽 레그 모두 감소 전용 매도
        assert!(orders.iter().all(|o| o.side == OrderSide::Sell && o.reduce_only));
    }

    #[tokio::test]
    async fn test_tpsl_skips_leg_without_trigger() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_position(long_position(dec!(1))),
        );

        let outcome = h
            .orchestrator
            .tpsl(&raw(&[("symbol", "BTC/USDT"), ("stoptrigger", "-5%")]))
            .await
            .unwrap();

        // 익절 트리거가 없으면 손절 레그만 배치된다
        assert_eq!(outcome.orders.len(), 1);
        assert_eq!(
            h.adapter.last_submitted().await.unwrap().kind,
            OrderKind::StopLoss
        );
    }

    #[tokio::test]
    async fn test_trailstop_percent_follows_position() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_position(long_position(dec!(2))),
        );

        let outcome = h
            .orchestrator
            .trailstop(&raw(&[("symbol", "BTC/USDT"), ("trailstop", "2%")]))
            .await
            .unwrap();

        assert_eq!(outcome.orders.len(), 1);
        let order = h.adapter.last_submitted().await.unwrap();
        assert_eq!(order.kind, OrderKind::TrailingStop);
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.amount, dec!(2));
        // 평균가 100의 2%, 롱이므로 아래로 따라간다
        assert_eq!(order.trail_by, Some(dec!(-2.00)));
        assert_eq!(order.trigger_price, Some(dec!(98.00)));
        assert!(order.reduce_only);
    }

    #[tokio::test]
    async fn test_trailstop_requires_param_and_position() {
        let h = harness(MockExchangeAdapter::new().with_market(spot_market()));

        let err = h
            .orchestrator
            .trailstop(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));

        let err = h
            .orchestrator
            .trailstop(&raw(&[("symbol", "BTC/USDT"), ("trailstop", "2%")]))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::Sizing(SizingError::NoPosition(_))));
    }

    #[tokio::test]
    async fn test_entry_chains_protection_legs() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance())
                .with_position(long_position(dec!(1))),
        );

        let outcome = h
            .orchestrator
            .buy(&raw(&[
                ("symbol", "BTC/USDT"),
                ("usd", "500"),
                ("stoptrigger", "-5%"),
            ]))
            .await
            .unwrap();

        // 진입 주문만 결과에 포함되고 보호 레그는 별도로 제출된다
        assert_eq!(outcome.orders.len(), 1);
        let orders = h.adapter.submitted_orders().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].kind, OrderKind::Market);
        assert_eq!(orders[1].kind, OrderKind::StopLoss);
        assert_eq!(orders[1].side, OrderSide::Sell);
        assert_eq!(orders[1].amount, dec!(1));
        assert!(orders[1].reduce_only);
    }

    #[tokio::test]
    async fn test_hedge_direction_dropped_when_enable_fails() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance())
                .with_position_mode(PositionMode::OneWay)
                .with_locked_position_mode(),
        );

        // 롱 방향은 단방향 모드 그대로 진행된다
        let outcome = h
            .orchestrator
            .long(&raw(&[
                ("symbol", "BTC/USDT"),
                ("usd", "500"),
                ("direction", "long"),
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.orders.len(), 1);
        assert!(h.sink.has_code("hedge_mode"));

        // 숏 방향은 헤지 모드 전환 실패로 거부된다
        let err = h
            .orchestrator
            .short(&raw(&[
                ("symbol", "BTC/USDT"),
                ("usd", "500"),
                ("direction", "short"),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradeError::Risk(RiskRejection::HedgeModeRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_layered_entry_splits_across_levels() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance()),
        );

        let outcome = h
            .orchestrator
            .buy(&raw(&[
                ("symbol", "BTC/USDT"),
                ("usd", "400"),
                ("price", "+1%,+3%,2"),
            ]))
            .await
            .unwrap();

        assert_eq!(outcome.orders.len(), 2);
        let orders = h.adapter.submitted_orders().await;
        // 매도 1호가 101 기준 +1% / +3%
        assert_eq!(orders[0].price, Some(dec!(102.01)));
        assert_eq!(orders[1].price, Some(dec!(104.03)));
        // 레벨당 200 USDT를 각 레벨 가격으로 환산
        assert_eq!(orders[0].amount, dec!(1.9605));
        assert_eq!(orders[1].amount, dec!(1.9225));
        assert!(h.sink.has_code("convert_layered"));
    }

    #[tokio::test]
    async fn test_close_all_closes_each_position() {
        let eth_market = Market::new("ETH/USDT", MarketType::Spot, dec!(49), dec!(51))
            .with_precision(dec!(0.01), dec!(0.001))
            .with_limits(dec!(0.001), None);
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_market(eth_market)
                .with_balance(usdt_balance())
                .with_position(long_position(dec!(1)))
                .with_position(Position::new(
                    "ETH/USDT",
                    PositionDirection::Long,
                    dec!(10),
                    dec!(50),
                )),
        );

        let outcome = h.orchestrator.close_all().await.unwrap();

        assert_eq!(outcome.orders.len(), 2);
        let orders = h.adapter.submitted_orders().await;
        assert!(orders.iter().all(|order| order.side == OrderSide::Sell));
        let symbols: Vec<_> = orders.iter().map(|order| order.symbol.as_str()).collect();
        assert!(symbols.contains(&"BTC/USDT"));
        assert!(symbols.contains(&"ETH/USDT"));
    }

    #[tokio::test]
    async fn test_leverage_sets_and_reports() {
        let h = harness(MockExchangeAdapter::new().with_market(spot_market()));

        let outcome = h
            .orchestrator
            .leverage(&raw(&[
                ("symbol", "BTC/USDT"),
                ("leverage", "10x"),
                ("type", "isolated"),
            ]))
            .await
            .unwrap();

        assert!(outcome.orders.is_empty());
        assert!(h.sink.has_code("leverage_set"));
        let calls = h.adapter.leverage_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].symbol, "BTC/USDT");
        assert_eq!(calls[0].leverage, dec!(10));
    }

    #[tokio::test]
    async fn test_leverage_failure_propagates() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_leverage_failure("BTC/USDT"),
        );

        let err = h
            .orchestrator
            .leverage(&raw(&[("symbol", "BTC/USDT"), ("type", "cross")]))
            .await
            .unwrap_err();

        assert!(matches!(err, TradeError::Adapter(_)));
        assert!(h.sink.has_code("leverage_set"));
    }

    #[tokio::test]
    async fn test_cancel_all_kind_scoped() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_open_order(open_limit_order("o1"))
                .with_open_order(open_stop_order("s1")),
        );

        h.orchestrator
            .cancel_all(&raw(&[("symbol", "BTC/USDT"), ("type", "stoploss")]))
            .await
            .unwrap();
        assert_eq!(h.adapter.open_order_count().await, 1);

        h.orchestrator
            .cancel_all(&raw(&[("symbol", "BTC/USDT")]))
            .await
            .unwrap();
        assert_eq!(h.adapter.open_order_count().await, 0);
        assert!(h.sink.has_code("orders_cancel"));
    }

    #[tokio::test]
    async fn test_execute_dispatches_and_rejects_unknown() {
        let h = harness(
            MockExchangeAdapter::new()
                .with_market(spot_market())
                .with_balance(usdt_balance()),
        );

        let outcome = h
            .orchestrator
            .execute("buy", &raw(&[("symbol", "BTC/USDT"), ("usd", "500")]))
            .await
            .unwrap();
        assert_eq!(outcome.orders.len(), 1);

        let err = h
            .orchestrator
            .execute("rebalance", &raw(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[test]
    fn test_find_position_requires_direction_for_hedge_pairs() {
        let long = long_position(dec!(1));
        let short = Position::new("BTC/USDT", PositionDirection::Short, dec!(1), dec!(100));
        let positions = vec![long, short];

        assert!(find_position(&positions, "BTC/USDT", None).is_err());
        let found = find_position(&positions, "BTC/USDT", Some(PositionDirection::Short))
            .unwrap()
            .unwrap();
        assert_eq!(found.direction, PositionDirection::Short);
        assert!(find_position(&positions, "ETH/USDT", None).unwrap().is_none());
    }

    #[test]
    fn test_protective_side_mapping() {
        // 손절: - 매도 / + 매수, 익절: + 매도 / - 매수
        assert_eq!(
            protective_side(OrderKind::StopLoss, Sign::Minus),
            OrderSide::Sell
        );
        assert_eq!(
            protective_side(OrderKind::StopLoss, Sign::Plus),
            OrderSide::Buy
        );
        assert_eq!(
            protective_side(OrderKind::TakeProfit, Sign::Plus),
            OrderSide::Sell
        );
        assert_eq!(
            protective_side(OrderKind::TakeProfit, Sign::Minus),
            OrderSide::Buy
        );
    }
}
