//! 계정/전역 설정 저장소.
//!
//! 주문 파이프라인이 참조하는 동적 설정(최대 포지션 수, 페어 모드,
//! 기본 사이즈 등)에 대한 비동기 KV 추상화입니다.
//!
//! # 스코프 구조
//!
//! - 계정 스코프: 스코프 = 계정 이름, 키 = `"maxposqty"` 또는 `"BTC/USDT:defsize"`
//! - 전역 스코프: `"config"` (예: `trade:require_maxsize`)
//! - 카운터 스코프: `"counter"` (예: `trade:warn_maxsize`)
//!
//! 심볼별 키는 계정 키보다 우선합니다 (`get_scoped` 참고).

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::RwLock;

/// 전역 설정 스코프.
pub const SCOPE_CONFIG: &str = "config";
/// 카운터 스코프.
pub const SCOPE_COUNTER: &str = "counter";

// =============================================================================
// ConfigStore 트레이트
// =============================================================================

/// 설정 저장소 추상화.
///
/// 원시 값은 JSON으로 저장하며, 문자열로 저장된 불리언/숫자도
/// 타입 헬퍼가 관대하게 해석합니다 (`"true"`, `"0.5"` 등).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// 원시 설정값을 조회합니다.
    async fn get(&self, scope: &str, key: &str) -> Option<Value>;

    /// 설정값을 저장합니다.
    async fn set(&self, scope: &str, key: &str, value: Value);

    /// 불리언 설정값. 없거나 해석 불가 시 기본값을 반환합니다.
    async fn get_bool(&self, scope: &str, key: &str, default: bool) -> bool {
        match self.get(scope, key).await {
            Some(value) => coerce_bool(&value).unwrap_or(default),
            None => default,
        }
    }

    /// 십진수 설정값.
    async fn get_decimal(&self, scope: &str, key: &str) -> Option<Decimal> {
        self.get(scope, key).await.and_then(|v| coerce_decimal(&v))
    }

    /// 문자열 설정값.
    async fn get_string(&self, scope: &str, key: &str) -> Option<String> {
        match self.get(scope, key).await? {
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    /// 부호 없는 정수 설정값.
    async fn get_u64(&self, scope: &str, key: &str, default: u64) -> u64 {
        match self.get(scope, key).await {
            Some(value) => coerce_u64(&value).unwrap_or(default),
            None => default,
        }
    }

    /// 심볼 우선 조회.
    ///
    /// `<scope>:<symbol>:<key>`가 있으면 그 값을, 없으면 `<scope>:<key>`를
    /// 반환합니다.
    async fn get_scoped(&self, scope: &str, symbol: Option<&str>, key: &str) -> Option<Value> {
        if let Some(symbol) = symbol {
            if let Some(value) = self.get(scope, &format!("{symbol}:{key}")).await {
                return Some(value);
            }
        }
        self.get(scope, key).await
    }

    /// 심볼 우선 십진수 조회.
    async fn get_scoped_decimal(
        &self,
        scope: &str,
        symbol: Option<&str>,
        key: &str,
    ) -> Option<Decimal> {
        self.get_scoped(scope, symbol, key)
            .await
            .and_then(|v| coerce_decimal(&v))
    }

    /// 심볼 우선 문자열 조회.
    async fn get_scoped_string(
        &self,
        scope: &str,
        symbol: Option<&str>,
        key: &str,
    ) -> Option<String> {
        match self.get_scoped(scope, symbol, key).await? {
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}

/// JSON 값을 불리언으로 해석합니다.
fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

/// JSON 값을 십진수로 해석합니다.
fn coerce_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// JSON 값을 부호 없는 정수로 해석합니다.
fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// 메모리 저장소
// =============================================================================

/// 메모리 기반 설정 저장소.
///
/// 테스트와 단일 프로세스 운영에 사용합니다.
#[derive(Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryConfigStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, scope: &str, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        entries.get(&(scope.to_string(), key.to_string())).cloned()
    }

    async fn set(&self, scope: &str, key: &str, value: Value) {
        let mut entries = self.entries.write().await;
        entries.insert((scope.to_string(), key.to_string()), value);
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryConfigStore::new();
        store.set("mystub", "maxposqty", json!(5)).await;

        assert_eq!(store.get("mystub", "maxposqty").await, Some(json!(5)));
        assert_eq!(store.get("mystub", "missing").await, None);
    }

    #[tokio::test]
    async fn test_bool_coercion_from_string() {
        let store = MemoryConfigStore::new();
        store.set("mystub", "disablelossclose", json!("true")).await;

        assert!(store.get_bool("mystub", "disablelossclose", false).await);
        // 없는 키는 기본값
        assert!(store.get_bool("mystub", "absent", true).await);
    }

    #[tokio::test]
    async fn test_decimal_coercion() {
        let store = MemoryConfigStore::new();
        store.set("mystub", "defsize", json!("500")).await;
        store.set("mystub", "dcascale", json!(0.5)).await;

        assert_eq!(
            store.get_decimal("mystub", "defsize").await,
            Some(dec!(500))
        );
        assert_eq!(
            store.get_decimal("mystub", "dcascale").await,
            Some(dec!(0.5))
        );
    }

    #[tokio::test]
    async fn test_symbol_overrides_account_key() {
        let store = MemoryConfigStore::new();
        store.set("mystub", "defsize", json!("500")).await;
        store.set("mystub", "BTC/USDT:defsize", json!("1000")).await;

        assert_eq!(
            store
                .get_scoped_decimal("mystub", Some("BTC/USDT"), "defsize")
                .await,
            Some(dec!(1000))
        );
        // 심볼 키가 없으면 계정 키로 폴백
        assert_eq!(
            store
                .get_scoped_decimal("mystub", Some("ETH/USDT"), "defsize")
                .await,
            Some(dec!(500))
        );
        assert_eq!(
            store.get_scoped_decimal("mystub", None, "defsize").await,
            Some(dec!(500))
        );
    }

    #[tokio::test]
    async fn test_counter_scope() {
        let store = MemoryConfigStore::new();
        let count = store
            .get_u64(SCOPE_COUNTER, "trade:warn_maxsize", 0)
            .await;
        assert_eq!(count, 0);

        store
            .set(SCOPE_COUNTER, "trade:warn_maxsize", json!(count + 1))
            .await;
        assert_eq!(
            store.get_u64(SCOPE_COUNTER, "trade:warn_maxsize", 0).await,
            1
        );
    }
}
