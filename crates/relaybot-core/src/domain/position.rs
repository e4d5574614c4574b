//! 거래소 중립 포지션 타입.
//!
//! 열려 있는 포지션만 이 타입으로 표현합니다.
//! 포지션이 없는 상태는 `Option<Position>`의 `None`으로 나타냅니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderSide, SizeUnit};

/// 포지션 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionDirection {
    /// 롱 포지션
    Long,
    /// 숏 포지션
    Short,
}

impl PositionDirection {
    /// 방향 부호 (롱 +1, 숏 -1).
    pub fn sign(&self) -> Decimal {
        match self {
            PositionDirection::Long => Decimal::ONE,
            PositionDirection::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// 이 방향의 포지션을 늘리는 주문 방향.
    pub fn open_side(&self) -> OrderSide {
        match self {
            PositionDirection::Long => OrderSide::Buy,
            PositionDirection::Short => OrderSide::Sell,
        }
    }

    /// 이 방향의 포지션을 줄이는 주문 방향.
    pub fn close_side(&self) -> OrderSide {
        self.open_side().opposite()
    }
}

impl std::fmt::Display for PositionDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionDirection::Long => write!(f, "long"),
            PositionDirection::Short => write!(f, "short"),
        }
    }
}

/// 거래소 중립 포지션.
///
/// 수량은 모두 절대값으로 저장하며 방향은 `direction`이 나타냅니다.
/// 부호 있는 수량이 필요하면 `signed_size()`를 사용합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// 통일 심볼
    pub symbol: String,
    /// 포지션 방향
    pub direction: PositionDirection,
    /// 기초 자산 수량 (절대값)
    pub base_size: Decimal,
    /// 호가 자산 수량 (절대값)
    pub quote_size: Decimal,
    /// USD 환산 금액 (절대값)
    pub usd_size: Decimal,
    /// 평균 진입가
    pub entry_price: Decimal,
    /// 미실현 손익
    pub pnl: Decimal,
    /// 스냅샷 시각
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// 새 포지션을 생성합니다.
    ///
    /// 호가/USD 수량은 진입가 기준으로 초기화되며,
    /// 정확한 값이 있으면 `with_quote_size`/`with_usd_size`로 덮어씁니다.
    pub fn new(
        symbol: impl Into<String>,
        direction: PositionDirection,
        base_size: Decimal,
        entry_price: Decimal,
    ) -> Self {
        let quote_size = base_size * entry_price;
        Self {
            symbol: symbol.into(),
            direction,
            base_size,
            quote_size,
            usd_size: quote_size,
            entry_price,
            pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// 호가 자산 수량을 설정합니다.
    pub fn with_quote_size(mut self, quote_size: Decimal) -> Self {
        self.quote_size = quote_size;
        self
    }

    /// USD 환산 금액을 설정합니다.
    pub fn with_usd_size(mut self, usd_size: Decimal) -> Self {
        self.usd_size = usd_size;
        self
    }

    /// 미실현 손익을 설정합니다.
    pub fn with_pnl(mut self, pnl: Decimal) -> Self {
        self.pnl = pnl;
        self
    }

    /// 롱 포지션 여부.
    pub fn is_long(&self) -> bool {
        self.direction == PositionDirection::Long
    }

    /// 숏 포지션 여부.
    pub fn is_short(&self) -> bool {
        self.direction == PositionDirection::Short
    }

    /// 지정 단위의 수량 절대값.
    pub fn size(&self, unit: SizeUnit) -> Decimal {
        match unit {
            SizeUnit::Base => self.base_size,
            SizeUnit::Quote => self.quote_size,
            SizeUnit::Usd => self.usd_size,
        }
    }

    /// 지정 단위의 부호 있는 수량 (롱 양수, 숏 음수).
    pub fn signed_size(&self, unit: SizeUnit) -> Decimal {
        self.direction.sign() * self.size(unit)
    }

    /// 포지션을 청산하는 주문 방향.
    pub fn close_side(&self) -> OrderSide {
        self.direction.close_side()
    }

    /// 손실 상태 여부.
    pub fn is_at_loss(&self) -> bool {
        self.pnl < Decimal::ZERO
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
    fn test_position_signed_size() {
        let long = Position::new("BTC/USDT", PositionDirection::Long, dec!(0.5), dec!(50000));
        assert_eq!(long.signed_size(SizeUnit::Base), dec!(0.5));
        assert_eq!(long.signed_size(SizeUnit::Quote), dec!(25000));

        let short = Position::new("BTC/USDT", PositionDirection::Short, dec!(0.5), dec!(50000));
        assert_eq!(short.signed_size(SizeUnit::Base), dec!(-0.5));
        assert_eq!(short.signed_size(SizeUnit::Usd), dec!(-25000));
    }

    #[test]
    fn test_position_close_side() {
        let long = Position::new("BTC/USDT", PositionDirection::Long, dec!(1), dec!(50000));
        assert_eq!(long.close_side(), OrderSide::Sell);

        let short = Position::new("BTC/USDT", PositionDirection::Short, dec!(1), dec!(50000));
        assert_eq!(short.close_side(), OrderSide::Buy);
    }

    #[test]
    fn test_position_loss_state() {
        let position = Position::new("ETH/USDT", PositionDirection::Long, dec!(2), dec!(3000))
            .with_pnl(dec!(-120.5));
        assert!(position.is_at_loss());

        let winning = Position::new("ETH/USDT", PositionDirection::Long, dec!(2), dec!(3000))
            .with_pnl(dec!(80));
        assert!(!winning.is_at_loss());
    }

    #[test]
    fn test_position_usd_override() {
        // 호가 자산이 USD가 아닌 마켓은 USD 환산값을 따로 가진다
        let position = Position::new("ETH/BTC", PositionDirection::Long, dec!(10), dec!(0.05))
            .with_usd_size(dec!(15000));
        assert_eq!(position.quote_size, dec!(0.5));
        assert_eq!(position.usd_size, dec!(15000));
    }
}
