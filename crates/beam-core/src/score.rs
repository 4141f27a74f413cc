use serde::{Deserialize, Serialize};

/// A candidate's evaluation from the vision provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Alignment score in `[0, 100]`.
    pub alignment: f32,
    /// Aesthetic score in `[0, 10]`.
    pub aesthetic: f32,
}

impl Evaluation {
    /// `total = alpha * alignment + (1 - alpha) * aesthetic * 10`.
    pub fn total_score(&self, alpha: f32) -> f32 {
        alpha * self.alignment + (1.0 - alpha) * self.aesthetic * 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_score_matches_weighted_formula() {
        let eval = Evaluation {
            alignment: 80.0,
            aesthetic: 6.0,
        };
        let total = eval.total_score(0.7);
        let expected = 0.7 * 80.0 + 0.3 * 6.0 * 10.0;
        assert!((total - expected).abs() < 1e-6);
    }

    #[test]
    fn alpha_zero_ignores_alignment() {
        let low_alignment = Evaluation {
            alignment: 0.0,
            aesthetic: 9.0,
        };
        let high_alignment = Evaluation {
            alignment: 100.0,
            aesthetic: 1.0,
        };
        assert!(low_alignment.total_score(0.0) > high_alignment.total_score(0.0));
    }

    #[test]
    fn alpha_one_ignores_aesthetics() {
        let low_aesthetic = Evaluation {
            alignment: 90.0,
            aesthetic: 0.0,
        };
        let high_aesthetic = Evaluation {
            alignment: 10.0,
            aesthetic: 10.0,
        };
        assert!(low_aesthetic.total_score(1.0) > high_aesthetic.total_score(1.0));
    }
}
