//! 사전 리스크 점검.
//!
//! 주문 생성 전에 계정 설정 기반의 가드를 적용합니다. 설정은 계정
//! 스코프에서 조회하며 심볼별 키(`<symbol>:<key>`)가 계정 키보다
//! 우선합니다. 모든 거부는 에러 이벤트를 발행하고 `RiskRejection`으로
//! 반환되며, 큐에는 아무 변화가 없습니다.

use std::collections::HashSet;

use serde_json::json;

use relaybot_core::{ConfigStore, Diagnostics, Position, PositionDirection, PositionMode};
use relaybot_exchange::ExecutionAdapter;

use crate::error::{RiskRejection, TradeError};
use crate::params::OrderCommand;

/// 최대 포지션 수 점검.
///
/// `maxposqty`가 0이거나 없으면 제한하지 않습니다. 이미 열린 심볼에
/// 대한 추가 주문(DCA)은 항상 허용되며, 새 심볼은 열린 심볼 수가
/// 한도에 도달했을 때 거부됩니다. 헤지 모드의 양방향 포지션은 한
/// 심볼로 셉니다.
pub async fn check_max_position_count(
    account: &str,
    symbol: &str,
    positions: &[Position],
    config: &dyn ConfigStore,
    diag: &Diagnostics,
) -> Result<(), RiskRejection> {
    let max = config.get_u64(account, "maxposqty", 0).await;
    if max == 0 {
        return Ok(());
    }

    let mut open: HashSet<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
    if open.contains(symbol) {
        // 기존 포지션 증액은 포지션 수를 늘리지 않는다
        return Ok(());
    }
    open.insert(symbol);
    if open.len() as u64 > max {
        diag.error("position_maxposqty", json!([account, max]));
        return Err(RiskRejection::MaxPositionCount(max));
    }
    Ok(())
}

/// 심볼 차단/허용 목록 점검.
///
/// `pairmode`가 `blacklist`(기본)이면 `ignored`나 `listed`로 표시된
/// 심볼을 거부하고, `whitelist`이면 `listed`로 표시되지 않은 심볼을
/// 거부합니다. 그 외 값이면 점검하지 않습니다.
pub async fn check_ignored(
    account: &str,
    symbol: &str,
    config: &dyn ConfigStore,
    diag: &Diagnostics,
) -> Result<(), RiskRejection> {
    let pairmode = config
        .get_string(account, "pairmode")
        .await
        .unwrap_or_else(|| "blacklist".to_string());
    let ignored = config
        .get_bool(account, &format!("{symbol}:ignored"), false)
        .await;
    let listed = config
        .get_bool(account, &format!("{symbol}:listed"), false)
        .await;

    match pairmode.to_lowercase().as_str() {
        "blacklist" => {
            if ignored || listed {
                diag.error("symbol_blacklist", json!([symbol, account]));
                return Err(RiskRejection::SymbolBlacklisted(symbol.to_string()));
            }
        }
        "whitelist" => {
            if !listed {
                diag.error("symbol_whitelist", json!([symbol, account]));
                return Err(RiskRejection::SymbolNotWhitelisted(symbol.to_string()));
            }
        }
        _ => {}
    }
    Ok(())
}

/// 손실 청산 금지 점검.
///
/// 계정에 `disablelossclose`가 켜져 있고 청산 대상 포지션이 미실현
/// 손실 상태이면 거부합니다. `force` 청산은 호출 측에서 이 점검을
/// 건너뜁니다.
pub async fn check_close_at_loss(
    account: &str,
    position: Option<&Position>,
    config: &dyn ConfigStore,
    diag: &Diagnostics,
) -> Result<(), RiskRejection> {
    if !config.get_bool(account, "disablelossclose", false).await {
        return Ok(());
    }
    if let Some(position) = position {
        if position.is_at_loss() {
            let label = format!("{}:{}", position.symbol, position.direction);
            diag.error("position_lossclose", json!([label]));
            return Err(RiskRejection::LossCloseDisabled(label));
        }
    }
    Ok(())
}

/// 포지션 모드 협상.
///
/// 명령의 `direction` 유무와 계정의 포지션 모드가 어긋나면 모드
/// 전환을 시도합니다. 전환에 실패하면 롱 방향 명령만 계속 진행할 수
/// 있습니다:
///
/// - direction 있음 + 단방향 모드: 헤지 모드 전환 시도. 실패하면
///   direction을 버리고, 숏 방향이었다면 거부
/// - direction 없음 + 헤지 모드: 단방향 전환 시도. 실패하면
///   direction을 롱으로 강제하고, short 명령이면 거부
///
/// 포지션 모드를 지원하지 않는 마켓(현물 등)은 direction을 그대로
/// 돌려줍니다. 반환값이 이후 파이프라인이 사용할 방향입니다.
///
/// # Errors
///
/// 모드 조회 실패는 어댑터 에러로, 전환 불가로 인한 명령 거부는
/// `RiskRejection`으로 반환됩니다.
pub async fn negotiate_position_mode(
    adapter: &dyn ExecutionAdapter,
    symbol: &str,
    command: OrderCommand,
    direction: Option<PositionDirection>,
    diag: &Diagnostics,
) -> Result<Option<PositionDirection>, TradeError> {
    let Some(mode) = adapter.position_mode(symbol).await? else {
        return Ok(direction);
    };
    diag.debug("hedgemode_enabled", json!([mode.is_hedged()]));

    match (direction, mode) {
        (Some(requested), PositionMode::OneWay) => {
            diag.debug("hedgemode_required", json!([true]));
            diag.warning(
                "hedge_mode",
                json!(["direction received but account is in one-way mode"]),
            );
            match adapter.set_position_mode(symbol, PositionMode::Hedged).await {
                Ok(()) => {
                    diag.debug("hedgemode_switched", json!([true]));
                    Ok(Some(requested))
                }
                Err(_) => {
                    diag.debug("hedgemode_switched", json!([false]));
                    diag.warning(
                        "hedge_mode",
                        json!(["could not enable hedge mode, long side only"]),
                    );
                    if requested != PositionDirection::Long {
                        diag.error("hedge_mode_required", json!([]));
                        return Err(RiskRejection::HedgeModeRequired(symbol.to_string()).into());
                    }
                    Ok(None)
                }
            }
        }
        (None, PositionMode::Hedged) => {
            diag.debug("hedgemode_required", json!([false]));
            diag.warning(
                "hedge_mode",
                json!(["no direction received but account is in hedge mode"]),
            );
            match adapter.set_position_mode(symbol, PositionMode::OneWay).await {
                Ok(()) => {
                    diag.debug("hedgemode_switched", json!([true]));
                    Ok(None)
                }
                Err(_) => {
                    diag.debug("hedgemode_switched", json!([false]));
                    diag.warning(
                        "hedge_mode",
                        json!(["could not disable hedge mode, long side only"]),
                    );
                    if command == OrderCommand::Short {
                        diag.error("single_mode_required", json!([]));
                        return Err(RiskRejection::SingleModeRequired(symbol.to_string()).into());
                    }
                    Ok(Some(PositionDirection::Long))
                }
            }
        }
        (direction, _) => Ok(direction),
    }
}

// =============================================================================
// 테스트
// =============================================================================
