use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;

/// Steering recommendation derived from a parent candidate's evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    /// Both dimensions scored well; keep the prompt mostly as-is.
    Preserve,
    /// Alignment lagged; steer the what-prompt.
    AdjustContent,
    /// Aesthetics lagged; steer the how-prompt.
    AdjustStyle,
    /// Both lagged; request a substantial rework.
    Rework,
}

/// Structured critique fed to the text provider to steer the next
/// refinement round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    /// Free-text critique summarizing the parent's strengths/weaknesses.
    pub critique: String,
    /// The chosen steering recommendation.
    pub recommendation: Recommendation,
    /// Short justification for the recommendation.
    pub reason: String,
}

/// Alignment threshold above which content is considered strong.
const ALIGNMENT_THRESHOLD: f32 = 70.0;
/// Aesthetic threshold (0-10 scale) above which style is considered strong.
const AESTHETIC_THRESHOLD: f32 = 6.5;

/// Build a deterministic critique from a parent candidate's evaluation and
/// ranking. Pure function of the parent record: same parent in, same
/// critique out, with no upstream calls.
pub fn build_critique(parent: &Candidate) -> Critique {
    let eval = parent.evaluation.unwrap_or(crate::score::Evaluation {
        alignment: 0.0,
        aesthetic: 0.0,
    });
    let content_ok = eval.alignment >= ALIGNMENT_THRESHOLD;
    let style_ok = eval.aesthetic >= AESTHETIC_THRESHOLD;

    let (recommendation, reason) = match (content_ok, style_ok) {
        (true, true) => (
            Recommendation::Preserve,
            format!(
                "alignment {:.1} and aesthetic {:.1} both exceed thresholds",
                eval.alignment, eval.aesthetic
            ),
        ),
        (false, true) => (
            Recommendation::AdjustContent,
            format!(
                "alignment {:.1} below threshold {:.1}; style is fine",
                eval.alignment, ALIGNMENT_THRESHOLD
            ),
        ),
        (true, false) => (
            Recommendation::AdjustStyle,
            format!(
                "aesthetic {:.1} below threshold {:.1}; content is fine",
                eval.aesthetic, AESTHETIC_THRESHOLD
            ),
        ),
        (false, false) => (
            Recommendation::Rework,
            "both alignment and aesthetic are below threshold".to_string(),
        ),
    };

    let mut critique = String::new();
    if !parent.ranking.strengths.is_empty() {
        critique.push_str("strengths: ");
        critique.push_str(&parent.ranking.strengths.join("; "));
    }
    if !parent.ranking.weaknesses.is_empty() {
        if !critique.is_empty() {
            critique.push_str(". ");
        }
        critique.push_str("weaknesses: ");
        critique.push_str(&parent.ranking.weaknesses.join("; "));
    }
    if critique.is_empty() {
        critique.push_str("no prior strengths or weaknesses recorded");
    }

    Critique {
        critique,
        recommendation,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::Evaluation;

    fn parent_with(alignment: f32, aesthetic: f32) -> Candidate {
        let mut c = Candidate::new(0, 0, None, "w".into(), "h".into(), "c".into());
        c.evaluation = Some(Evaluation {
            alignment,
            aesthetic,
        });
        c
    }

    #[test]
    fn preserve_when_both_strong() {
        let c = parent_with(90.0, 8.0);
        assert_eq!(build_critique(&c).recommendation, Recommendation::Preserve);
    }

    #[test]
    fn rework_when_both_weak() {
        let c = parent_with(10.0, 1.0);
        assert_eq!(build_critique(&c).recommendation, Recommendation::Rework);
    }

    #[test]
    fn adjust_content_when_only_alignment_weak() {
        let c = parent_with(20.0, 9.0);
        assert_eq!(
            build_critique(&c).recommendation,
            Recommendation::AdjustContent
        );
    }

    #[test]
    fn adjust_style_when_only_aesthetic_weak() {
        let c = parent_with(95.0, 1.0);
        assert_eq!(
            build_critique(&c).recommendation,
            Recommendation::AdjustStyle
        );
    }

    #[test]
    fn is_deterministic_across_repeated_calls() {
        let c = parent_with(50.0, 5.0);
        let a = build_critique(&c);
        let b = build_critique(&c);
        assert_eq!(a.recommendation, b.recommendation);
        assert_eq!(a.critique, b.critique);
    }
}
