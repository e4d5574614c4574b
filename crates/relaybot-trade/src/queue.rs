//! 계정·심볼별 주문 큐.
//!
//! 한 명령이 만든 주문들은 해당 계정·심볼 큐에 쌓였다가 한 번에
//! 순차 제출됩니다. 같은 키의 명령은 `acquire` 가드로 직렬화되어
//! 서로의 큐를 침범하지 못합니다. 제출은 큐를 먼저 비운 뒤
//! 진행하므로 실패한 주문이 큐에 남아 다음 명령에 섞이는 일이
//! 없습니다.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};

use relaybot_core::{Diagnostics, OrderDescriptor, SubmittedOrder};
use relaybot_exchange::{AdapterError, ExecutionAdapter};

/// 큐 식별자: 계정과 심볼의 조합.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    /// 계정 이름
    pub account: String,
    /// 마켓 심볼
    pub symbol: String,
}

impl QueueKey {
    /// 새 큐 키를 생성합니다.
    pub fn new(account: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            symbol: symbol.into(),
        }
    }
}

#[derive(Default)]
struct QueueSlot {
    lock: Arc<Mutex<()>>,
    pending: Vec<OrderDescriptor>,
}

/// 주문 큐.
///
/// 키별 슬롯은 첫 접근 시 만들어지며 명령 직렬화 락과 대기 주문
/// 목록을 가집니다.
#[derive(Default)]
pub struct OrderQueue {
    slots: Mutex<HashMap<QueueKey, QueueSlot>>,
}

impl OrderQueue {
    /// 빈 큐를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 키의 명령 직렬화 가드를 획득합니다.
    ///
    /// 가드가 살아 있는 동안 같은 키의 다른 명령은 대기합니다.
    /// 다른 키는 영향을 받지 않습니다.
    pub async fn acquire(&self, key: &QueueKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut slots = self.slots.lock().await;
            slots.entry(key.clone()).or_default().lock.clone()
        };
        lock.lock_owned().await
    }

    /// 대기 주문을 모두 버리고 버린 개수를 돌려줍니다.
    pub async fn clear(&self, key: &QueueKey) -> usize {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(key) {
            Some(slot) => std::mem::take(&mut slot.pending).len(),
            None => 0,
        }
    }

    /// 주문들을 큐에 추가합니다.
    pub async fn add(&self, key: &QueueKey, orders: impl IntoIterator<Item = OrderDescriptor>) {
        let mut slots = self.slots.lock().await;
        slots.entry(key.clone()).or_default().pending.extend(orders);
    }

    /// 대기 주문 수.
    pub async fn len(&self, key: &QueueKey) -> usize {
        let slots = self.slots.lock().await;
        slots.get(key).map(|slot| slot.pending.len()).unwrap_or(0)
    }

    /// 대기 주문 사본.
    pub async fn snapshot(&self, key: &QueueKey) -> Vec<OrderDescriptor> {
        let slots = self.slots.lock().await;
        slots
            .get(key)
            .map(|slot| slot.pending.clone())
            .unwrap_or_default()
    }

    /// 대기 주문을 순서대로 제출합니다.
    ///
    /// 큐는 제출 시작 전에 비워지며 성공 여부와 무관하게 다시 쌓이지
    /// 않습니다. 제출 중 하나라도 실패하면 남은 주문은 제출하지 않고
    /// 에러를 반환합니다.
    ///
    /// # Errors
    ///
    /// 첫 실패의 어댑터 에러가 그대로 반환됩니다.
    pub async fn process(
        &self,
        key: &QueueKey,
        adapter: &dyn ExecutionAdapter,
        diag: &Diagnostics,
    ) -> Result<Vec<SubmittedOrder>, AdapterError> {
        let pending = {
            let mut slots = self.slots.lock().await;
            match slots.get_mut(key) {
                Some(slot) => std::mem::take(&mut slot.pending),
                None => Vec::new(),
            }
        };
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let total = pending.len();
        let mut submitted = Vec::with_capacity(total);
        for (index, order) in pending.into_iter().enumerate() {
            match adapter.submit_order(&order).await {
                Ok(result) => {
                    diag.debug("order_submit", json!([index + 1, total, result.id]));
                    submitted.push(result);
                }
                Err(err) => {
                    diag.error("order_submit", json!([index + 1, total, err.to_string()]));
                    return Err(err);
                }
            }
        }
        Ok(submitted)
    }
}

// =============================================================================
// 테스트
// =============================================================================
