//! Aggregate health score.

use serde::Serialize;

use crate::checker::HealthCheckResult;

/// Coarse label for a health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            HealthGrade::Excellent
        } else if score >= 0.7 {
            HealthGrade::Good
        } else if score >= 0.5 {
            HealthGrade::Fair
        } else {
            HealthGrade::Poor
        }
    }
}

impl std::fmt::Display for HealthGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthGrade::Excellent => "excellent",
            HealthGrade::Good => "good",
            HealthGrade::Fair => "fair",
            HealthGrade::Poor => "poor",
        };
        f.write_str(s)
    }
}

/// Fraction of checks that passed in one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthScore {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// `passed / total`, or 0.0 when no checks ran.
    pub score: f64,
    pub grade: HealthGrade,
}

impl HealthScore {
    pub fn from_results(results: &[HealthCheckResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let score = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        };
        Self {
            total,
            passed,
            failed: total - passed,
            score,
            grade: HealthGrade::from_score(score),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::CheckName;

    fn result(name: CheckName, passed: bool) -> HealthCheckResult {
        HealthCheckResult {
            name,
            passed,
            reason: String::new(),
            failed_services: Vec::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn score_is_fraction_passed() {
        let results: Vec<_> = CheckName::ALL
            .iter()
            .enumerate()
            .map(|(i, name)| result(*name, i != 3))
            .collect();
        let score = HealthScore::from_results(&results);
        assert_eq!(score.total, 10);
        assert_eq!(score.passed, 9);
        assert_eq!(score.failed, 1);
        assert!((score.score - 0.9).abs() < 1e-9);
        assert_eq!(score.grade, HealthGrade::Excellent);
        assert!(!score.all_passed());
    }

    #[test]
    fn no_checks_scores_zero() {
        let score = HealthScore::from_results(&[]);
        assert_eq!(score.score, 0.0);
        assert_eq!(score.grade, HealthGrade::Poor);
        assert!(!score.all_passed());
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(HealthGrade::from_score(1.0), HealthGrade::Excellent);
        assert_eq!(HealthGrade::from_score(0.7), HealthGrade::Good);
        assert_eq!(HealthGrade::from_score(0.5), HealthGrade::Fair);
        assert_eq!(HealthGrade::from_score(0.49), HealthGrade::Poor);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        for passed in 0..=4 {
            let results: Vec<_> = (0..4)
                .map(|i| result(CheckName::Database, i < passed))
                .collect();
            let score = HealthScore::from_results(&results);
            assert!((0.0..=1.0).contains(&score.score));
        }
    }
}
