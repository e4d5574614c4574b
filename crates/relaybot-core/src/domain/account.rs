//! 거래소 중립 잔고 타입.
//!
//! 자산별 잔고와 USD 환산값을 통일된 형식으로 표현합니다.
//! 지분율 사이징(% 표현)의 기준이 되는 가용 자본 계산을 제공합니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 거래소 중립 자산 잔고.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// 자산 코드 (예: "USDT", "BTC")
    pub currency: String,
    /// 주문 가능 수량
    pub free: Decimal,
    /// 주문/포지션에 묶인 수량
    pub used: Decimal,
    /// 총 수량
    pub total: Decimal,
    /// 주문 가능 수량의 USD 환산값
    pub usd_free: Decimal,
    /// 총 수량의 USD 환산값
    pub usd_total: Decimal,
}

impl Balance {
    /// 새 잔고를 생성합니다.
    ///
    /// USD 환산값은 수량과 동일하게 초기화됩니다 (스테이블코인 기준).
    /// 다른 자산은 `with_usd`로 환산값을 설정합니다.
    pub fn new(currency: impl Into<String>, free: Decimal, total: Decimal) -> Self {
        Self {
            currency: currency.into(),
            free,
            used: total - free,
            total,
            usd_free: free,
            usd_total: total,
        }
    }

    /// USD 환산값을 설정합니다.
    pub fn with_usd(mut self, usd_free: Decimal, usd_total: Decimal) -> Self {
        self.usd_free = usd_free;
        self.usd_total = usd_total;
        self
    }
}

/// 계정 전체의 주문 가능 USD 자본.
///
/// 지분율 사이징(예: "25%")의 분모로 사용됩니다.
pub fn total_free_usd(balances: &[Balance]) -> Decimal {
    balances.iter().map(|b| b.usd_free).sum()
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_balance_used_derivation() {
        let balance = Balance::new("USDT", dec!(7000), dec!(10000));
        assert_eq!(balance.used, dec!(3000));
        assert_eq!(balance.usd_free, dec!(7000));
    }

    #[test]
    fn test_total_free_usd() {
        let balances = vec![
            Balance::new("USDT", dec!(5000), dec!(5000)),
            Balance::new("BTC", dec!(0.1), dec!(0.2)).with_usd(dec!(5000), dec!(10000)),
        ];
        // 5000 + 5000 = 10000
        assert_eq!(total_free_usd(&balances), dec!(10000));
    }

    #[test]
    fn test_total_free_usd_empty() {
        assert_eq!(total_free_usd(&[]), Decimal::ZERO);
    }
}
