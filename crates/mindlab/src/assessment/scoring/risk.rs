use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::super::domain::{RecordedAnswer, RiskRule, RiskSeverity};

static CONDITION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)q(\d+)_score\s*(>=|>|<=|<|==|=)\s*(\d+)")
        .expect("risk condition pattern compiles")
});

/// Comparison operator of a risk condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    AtLeast,
    Above,
    AtMost,
    Below,
    Equal,
}

impl Comparison {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            ">=" => Some(Self::AtLeast),
            ">" => Some(Self::Above),
            "<=" => Some(Self::AtMost),
            "<" => Some(Self::Below),
            "==" | "=" => Some(Self::Equal),
            _ => None,
        }
    }

    pub fn apply(self, score: i32, threshold: i32) -> bool {
        match self {
            Self::AtLeast => score >= threshold,
            Self::Above => score > threshold,
            Self::AtMost => score <= threshold,
            Self::Below => score < threshold,
            Self::Equal => score == threshold,
        }
    }
}

/// Parsed form of `q<N>_score <op> <threshold>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCondition {
    /// 1-based display order of the referenced question.
    pub question_order: u32,
    pub comparison: Comparison,
    pub threshold: i32,
}

impl RiskCondition {
    /// Returns `None` when the expression does not match the grammar.
    pub fn parse(expr: &str) -> Option<Self> {
        let captures = CONDITION_PATTERN.captures(expr)?;
        let question_order = captures.get(1)?.as_str().parse().ok()?;
        let comparison = Comparison::from_token(captures.get(2)?.as_str())?;
        let threshold = captures.get(3)?.as_str().parse().ok()?;

        Some(Self {
            question_order,
            comparison,
            threshold,
        })
    }

    /// Unanswered questions never trigger.
    pub fn holds(&self, answers: &[RecordedAnswer]) -> bool {
        answers
            .iter()
            .find(|answer| answer.order_index == self.question_order)
            .map(|answer| self.comparison.apply(answer.score, self.threshold))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub message: String,
    pub severity: RiskSeverity,
}

/// Flags for every triggered rule, in rule declaration order.
pub fn evaluate_rules(rules: &[RiskRule], answers: &[RecordedAnswer]) -> Vec<RiskFlag> {
    rules
        .iter()
        .filter(|rule| match RiskCondition::parse(&rule.condition_expr) {
            Some(condition) => condition.holds(answers),
            None => {
                tracing::warn!(
                    test_id = %rule.test_id,
                    condition = %rule.condition_expr,
                    "skipping risk rule with unparseable condition"
                );
                false
            }
        })
        .map(|rule| RiskFlag {
            message: rule.message.clone(),
            severity: rule.severity,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_operator() {
        let cases = [
            ("q9_score >= 1", Comparison::AtLeast),
            ("q9_score > 1", Comparison::Above),
            ("q9_score <= 1", Comparison::AtMost),
            ("q9_score < 1", Comparison::Below),
            ("q9_score == 1", Comparison::Equal),
            ("q9_score = 1", Comparison::Equal),
        ];

        for (expr, expected) in cases {
            let condition = RiskCondition::parse(expr).expect("condition parses");
            assert_eq!(condition.comparison, expected, "operator for {expr}");
            assert_eq!(condition.question_order, 9);
            assert_eq!(condition.threshold, 1);
        }
    }

    #[test]
    fn parsing_is_case_insensitive_and_whitespace_tolerant() {
        let condition = RiskCondition::parse("Q21_SCORE>=2").expect("condition parses");
        assert_eq!(condition.question_order, 21);
        assert_eq!(condition.comparison, Comparison::AtLeast);
        assert_eq!(condition.threshold, 2);
    }

    #[test]
    fn malformed_conditions_do_not_parse() {
        for expr in ["", "q_score >= 1", "q9 >= 1", "q9_score != 1", "score(q9) >= 1"] {
            assert!(RiskCondition::parse(expr).is_none(), "{expr} should not parse");
        }
    }

    #[test]
    fn overflowing_numbers_do_not_parse() {
        assert!(RiskCondition::parse("q99999999999_score >= 1").is_none());
        assert!(RiskCondition::parse("q1_score >= 99999999999").is_none());
    }
}
