//! 사이징/가격 표현식 파서.
//!
//! 명령 필드에 문자열로 들어오는 수량/가격 표현을 구조화된 타입으로
//! 해석합니다. 해석은 요청 수신 시점에 한 번만 수행되며, 실패하면
//! 명령 전체가 즉시 거부됩니다.
//!
//! 지원 형식:
//! - 수량: `"0.5"`, `"+1000"`, `"-500"`, `"2x"`, `"50%"`, `"-25%"`
//! - 가격: `"50000"`, `"+1%"`, `"-250"`, `"2%"`, `"61000,64000,10"`, `"+1%,+3%"`

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 레이어드 주문의 기본 레벨 수.
pub const DEFAULT_LAYER_LEVELS: u32 = 5;

/// 표현식 해석 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("빈 표현식")]
    Empty,
    #[error("숫자 해석 실패: {0}")]
    InvalidNumber(String),
    #[error("음수 크기는 부호로 표기해야 합니다: {0}")]
    NegativeMagnitude(String),
    #[error("레이어 경계의 퍼센트에는 부호가 필요합니다: {0}")]
    UnsignedPercentBound(String),
    #[error("잘못된 레이어 형식: {0}")]
    InvalidLayeredFormat(String),
    #[error("레이어 레벨 수는 2 이상이어야 합니다: {0}")]
    InvalidLevels(String),
}

// =============================================================================
// 부호
// =============================================================================

/// 표현식의 명시적 부호.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    /// `+` (증가 / 기준가 위)
    Plus,
    /// `-` (감소 / 기준가 아래)
    Minus,
}

impl Sign {
    /// 부호 계수 (+1 / -1).
    pub fn factor(&self) -> Decimal {
        match self {
            Sign::Plus => Decimal::ONE,
            Sign::Minus => Decimal::NEGATIVE_ONE,
        }
    }

    /// 기준값에 오프셋을 부호 방향으로 적용합니다.
    pub fn apply(&self, reference: Decimal, offset: Decimal) -> Decimal {
        match self {
            Sign::Plus => reference + offset,
            Sign::Minus => reference - offset,
        }
    }
}

impl std::fmt::Display for Sign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sign::Plus => write!(f, "+"),
            Sign::Minus => write!(f, "-"),
        }
    }
}

/// 선행 부호를 분리합니다.
fn split_sign(input: &str) -> (Option<Sign>, &str) {
    if let Some(rest) = input.strip_prefix('+') {
        (Some(Sign::Plus), rest)
    } else if let Some(rest) = input.strip_prefix('-') {
        (Some(Sign::Minus), rest)
    } else {
        (None, input)
    }
}

/// 음수가 아닌 십진수를 해석합니다.
fn parse_magnitude(raw: &str, original: &str) -> Result<Decimal, ExprError> {
    let value: Decimal = raw
        .trim()
        .parse()
        .map_err(|_| ExprError::InvalidNumber(original.to_string()))?;
    if value < Decimal::ZERO {
        return Err(ExprError::NegativeMagnitude(original.to_string()));
    }
    Ok(value)
}

// =============================================================================
// 수량 표현식
// =============================================================================

/// 수량 표현식.
///
/// 절대 수량, 부호 있는 증감, 배수/지분율의 세 가지 형태가 있습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingExpression {
    /// 절대 목표 수량 (예: `"0.5"`)
    Absolute(Decimal),
    /// 현재 포지션 대비 증감 (예: `"+1000"`, `"-500"`)
    Relative { sign: Sign, magnitude: Decimal },
    /// 배수/지분율 (예: `"2x"`, `"50%"`, `"-25%"`)
    ///
    /// 부호가 있으면 현재 포지션 기준, 없으면 가용 자본 기준입니다.
    Factor { sign: Option<Sign>, factor: Decimal },
}

impl SizingExpression {
    /// 수량 표현식을 해석합니다.
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ExprError::Empty);
        }

        let (sign, rest) = split_sign(trimmed);
        if rest.is_empty() {
            return Err(ExprError::InvalidNumber(input.to_string()));
        }

        if let Some(multiplier) = rest.strip_suffix(['x', 'X']) {
            let factor = parse_magnitude(multiplier, input)?;
            return Ok(SizingExpression::Factor { sign, factor });
        }

        if let Some(percent) = rest.strip_suffix('%') {
            let factor = parse_magnitude(percent, input)? / Decimal::ONE_HUNDRED;
            return Ok(SizingExpression::Factor { sign, factor });
        }

        let magnitude = parse_magnitude(rest, input)?;
        match sign {
            Some(sign) => Ok(SizingExpression::Relative { sign, magnitude }),
            None => Ok(SizingExpression::Absolute(magnitude)),
        }
    }

    /// 배수/지분율 표현 여부.
    pub fn is_factor(&self) -> bool {
        matches!(self, SizingExpression::Factor { .. })
    }
}

impl std::fmt::Display for SizingExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizingExpression::Absolute(value) => write!(f, "{value}"),
            SizingExpression::Relative { sign, magnitude } => write!(f, "{sign}{magnitude}"),
            SizingExpression::Factor { sign: Some(sign), factor } => write!(f, "{sign}{factor}x"),
            SizingExpression::Factor { sign: None, factor } => write!(f, "{factor}x"),
        }
    }
}

// =============================================================================
// 가격 표현식
// =============================================================================

/// 상대 가격의 오프셋.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceOffset {
    /// 절대 오프셋 (예: `"+250"`의 250)
    Literal(Decimal),
    /// 기준가 대비 퍼센트 (예: `"+1%"`의 1)
    Percent(Decimal),
}

impl PriceOffset {
    /// 기준가에 대한 오프셋 크기를 계산합니다.
    pub fn magnitude(&self, reference: Decimal) -> Decimal {
        match self {
            PriceOffset::Literal(value) => *value,
            PriceOffset::Percent(percent) => reference * *percent / Decimal::ONE_HUNDRED,
        }
    }
}

/// 레이어드 주문의 경계 가격.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerBound {
    /// 절대 가격
    Absolute(Decimal),
    /// 기준가 대비 상대 가격
    Relative { sign: Sign, offset: PriceOffset },
}

/// 가격 표현식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceExpression {
    /// 절대 가격 (예: `"50000"`)
    Absolute(Decimal),
    /// 기준가 대비 상대 가격 (예: `"+1%"`, `"-250"`)
    ///
    /// `+`는 매도 1호가, `-`는 매수 1호가를 기준으로 합니다.
    Relative { sign: Sign, offset: PriceOffset },
    /// 부호 없는 퍼센트 (예: `"2%"`)
    ///
    /// 트리거 가격 전용이며 부호는 주문 방향에서 결정됩니다.
    Percent(Decimal),
    /// 두 경계 사이에 분할 배치되는 레이어드 가격
    Layered {
        lower: LayerBound,
        upper: LayerBound,
        levels: u32,
    },
}

impl PriceExpression {
    /// 가격 표현식을 해석합니다.
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ExprError::Empty);
        }

        if trimmed.contains(',') {
            return Self::parse_layered(trimmed, input);
        }

        let (sign, rest) = split_sign(trimmed);
        if rest.is_empty() {
            return Err(ExprError::InvalidNumber(input.to_string()));
        }

        if let Some(percent) = rest.strip_suffix('%') {
            let percent = parse_magnitude(percent, input)?;
            return Ok(match sign {
                Some(sign) => PriceExpression::Relative {
                    sign,
                    offset: PriceOffset::Percent(percent),
                },
                None => PriceExpression::Percent(percent),
            });
        }

        let value = parse_magnitude(rest, input)?;
        Ok(match sign {
            Some(sign) => PriceExpression::Relative {
                sign,
                offset: PriceOffset::Literal(value),
            },
            None => PriceExpression::Absolute(value),
        })
    }

    /// 레이어드 표현식을 해석합니다.
    ///
    /// 선행 부호 하나가 두 경계 모두에 적용됩니다 (`"+1%,3%"` == `"+1%,+3%"`).
    fn parse_layered(trimmed: &str, original: &str) -> Result<Self, ExprError> {
        let (sign, _) = split_sign(trimmed);
        let stripped: String = trimmed.chars().filter(|c| *c != '+' && *c != '-').collect();
        let parts: Vec<&str> = stripped.split(',').map(str::trim).collect();

        if parts.len() < 2 || parts.len() > 3 {
            return Err(ExprError::InvalidLayeredFormat(original.to_string()));
        }

        let lower = Self::parse_bound(parts[0], sign, original)?;
        let upper = Self::parse_bound(parts[1], sign, original)?;

        let levels = match parts.get(2) {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| ExprError::InvalidLevels(original.to_string()))?,
            None => DEFAULT_LAYER_LEVELS,
        };
        if levels < 2 {
            return Err(ExprError::InvalidLevels(original.to_string()));
        }

        Ok(PriceExpression::Layered {
            lower,
            upper,
            levels,
        })
    }

    fn parse_bound(
        part: &str,
        sign: Option<Sign>,
        original: &str,
    ) -> Result<LayerBound, ExprError> {
        if let Some(percent) = part.strip_suffix('%') {
            let percent = parse_magnitude(percent, original)?;
            return match sign {
                Some(sign) => Ok(LayerBound::Relative {
                    sign,
                    offset: PriceOffset::Percent(percent),
                }),
                None => Err(ExprError::UnsignedPercentBound(original.to_string())),
            };
        }

        let value = parse_magnitude(part, original)?;
        Ok(match sign {
            Some(sign) => LayerBound::Relative {
                sign,
                offset: PriceOffset::Literal(value),
            },
            None => LayerBound::Absolute(value),
        })
    }

    /// 레이어드 표현 여부.
    pub fn is_layered(&self) -> bool {
        matches!(self, PriceExpression::Layered { .. })
    }

    /// 부호 없는 퍼센트에 문맥상 부호를 부여합니다.
    ///
    /// 트리거 가격 정규화에 사용되며 다른 형태는 그대로 반환합니다.
    pub fn with_sign(self, sign: Sign) -> Self {
        match self {
            PriceExpression::Percent(percent) => PriceExpression::Relative {
                sign,
                offset: PriceOffset::Percent(percent),
            },
            other => other,
        }
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
    fn test_sizing_absolute() {
        assert_eq!(
            SizingExpression::parse("0.5"),
            Ok(SizingExpression::Absolute(dec!(0.5)))
        );
    }

    #[test]
    fn test_sizing_relative() {
        assert_eq!(
            SizingExpression::parse("+1000"),
            Ok(SizingExpression::Relative {
                sign: Sign::Plus,
                magnitude: dec!(1000)
            })
        );
        assert_eq!(
            SizingExpression::parse("-500"),
            Ok(SizingExpression::Relative {
                sign: Sign::Minus,
                magnitude: dec!(500)
            })
        );
    }

    #[test]
    fn test_sizing_multiplier() {
        assert_eq!(
            SizingExpression::parse("2x"),
            Ok(SizingExpression::Factor {
                sign: None,
                factor: dec!(2)
            })
        );
        // 대문자 X도 허용
        assert_eq!(
            SizingExpression::parse("1.5X"),
            Ok(SizingExpression::Factor {
                sign: None,
                factor: dec!(1.5)
            })
        );
    }

    #[test]
    fn test_sizing_percent_to_factor() {
        // 50% -> 0.5 배수
        assert_eq!(
            SizingExpression::parse("50%"),
            Ok(SizingExpression::Factor {
                sign: None,
                factor: dec!(0.5)
            })
        );
        assert_eq!(
            SizingExpression::parse("-25%"),
            Ok(SizingExpression::Factor {
                sign: Some(Sign::Minus),
                factor: dec!(0.25)
            })
        );
    }

    #[test]
    fn test_sizing_rejects_garbage() {
        assert_eq!(
            SizingExpression::parse(""),
            Err(ExprError::Empty)
        );
        assert!(matches!(
            SizingExpression::parse("abc"),
            Err(ExprError::InvalidNumber(_))
        ));
        assert!(matches!(
            SizingExpression::parse("+"),
            Err(ExprError::InvalidNumber(_))
        ));
        // 이중 부호는 음수 크기로 떨어진다
        assert!(matches!(
            SizingExpression::parse("+-5"),
            Err(ExprError::NegativeMagnitude(_))
        ));
    }

    #[test]
    fn test_price_absolute_and_relative() {
        assert_eq!(
            PriceExpression::parse("50000"),
            Ok(PriceExpression::Absolute(dec!(50000)))
        );
        assert_eq!(
            PriceExpression::parse("+1%"),
            Ok(PriceExpression::Relative {
                sign: Sign::Plus,
                offset: PriceOffset::Percent(dec!(1))
            })
        );
        assert_eq!(
            PriceExpression::parse("-250"),
            Ok(PriceExpression::Relative {
                sign: Sign::Minus,
                offset: PriceOffset::Literal(dec!(250))
            })
        );
    }

    #[test]
    fn test_price_unsigned_percent() {
        assert_eq!(
            PriceExpression::parse("2%"),
            Ok(PriceExpression::Percent(dec!(2)))
        );
        // 문맥 부호 부여
        assert_eq!(
            PriceExpression::parse("2%").map(|p| p.with_sign(Sign::Minus)),
            Ok(PriceExpression::Relative {
                sign: Sign::Minus,
                offset: PriceOffset::Percent(dec!(2))
            })
        );
    }

    #[test]
    fn test_price_layered_absolute() {
        assert_eq!(
            PriceExpression::parse("61000,64000,10"),
            Ok(PriceExpression::Layered {
                lower: LayerBound::Absolute(dec!(61000)),
                upper: LayerBound::Absolute(dec!(64000)),
                levels: 10
            })
        );
    }

    #[test]
    fn test_price_layered_shared_sign() {
        // 선행 부호 하나가 두 경계 모두에 적용된다
        let expected = Ok(PriceExpression::Layered {
            lower: LayerBound::Relative {
                sign: Sign::Plus,
                offset: PriceOffset::Percent(dec!(1)),
            },
            upper: LayerBound::Relative {
                sign: Sign::Plus,
                offset: PriceOffset::Percent(dec!(3)),
            },
            levels: DEFAULT_LAYER_LEVELS,
        });
        assert_eq!(PriceExpression::parse("+1%,3%"), expected);
        assert_eq!(PriceExpression::parse("+1%,+3%"), expected);
    }

    #[test]
    fn test_price_layered_rejects_bad_levels() {
        assert!(matches!(
            PriceExpression::parse("100,200,1"),
            Err(ExprError::InvalidLevels(_))
        ));
        assert!(matches!(
            PriceExpression::parse("100,200,abc"),
            Err(ExprError::InvalidLevels(_))
        ));
    }

    #[test]
    fn test_price_layered_rejects_unsigned_percent_bound() {
        assert!(matches!(
            PriceExpression::parse("1%,3%"),
            Err(ExprError::UnsignedPercentBound(_))
        ));
    }

    #[test]
    fn test_price_offset_magnitude() {
        assert_eq!(
            PriceOffset::Percent(dec!(2)).magnitude(dec!(50000)),
            dec!(1000)
        );
        assert_eq!(
            PriceOffset::Literal(dec!(250)).magnitude(dec!(50000)),
            dec!(250)
        );
    }
}
