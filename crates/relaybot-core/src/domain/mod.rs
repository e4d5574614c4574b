//! 거래소 중립 도메인 타입.
//!
//! 주문 파이프라인 전반에서 사용하는 마켓, 포지션, 잔고, 주문,
//! 표현식 타입을 정의합니다. 각 거래소 어댑터는 자체 응답 타입을
//! 이 중립 타입으로 변환합니다.

pub mod account;
pub mod expr;
pub mod market;
pub mod order;
pub mod position;

pub use account::{total_free_usd, Balance};
pub use expr::{
    ExprError, LayerBound, PriceExpression, PriceOffset, Sign, SizingExpression,
    DEFAULT_LAYER_LEVELS,
};
pub use market::{
    floor_to_step, round_to_step, AmountLimits, Market, MarketPrecision, MarketType,
    UsdConversion,
};
pub use order::{
    MarginMode, OrderDescriptor, OrderKind, OrderSide, OrderSizing, OrderStatus, PositionMode,
    SizeUnit, SubmittedOrder, TimeInForce, TriggerType,
};
pub use position::{Position, PositionDirection};
