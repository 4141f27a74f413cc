//! Deterministic stub providers for local smoke-testing, in the spirit of
//! the teacher's offline benchmark mode: no live backend required, but the
//! orchestrator exercises the exact same trait surface it would against a
//! real provider.

use async_trait::async_trait;

use beam_core::{CostBucket, Usage};

use crate::traits::{ImageGenProvider, ProviderError, TextProvider, VLMProvider, VisionProvider};
use crate::types::{
    AnalyzeRequest, AnalyzeResponse, Choice, CombineRequest, CombineResponse, CompareResponse,
    GenerateRequest, GenerateResponse, RankCandidate, RankResponse, RefineRequest, RefineResponse,
    SideRanks,
};
use beam_core::Evaluation;

/// Strips conversational wrapper text a real text model might emit, per
/// the `TextProvider::refine` contract. Shared by the stub and intended as
/// the reference behavior for real implementations.
pub fn strip_preamble(raw: &str) -> String {
    let mut s = raw.trim();

    for prefix in [
        "Improved WHAT tags:",
        "Improved HOW tags:",
        "Refined prompt:",
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim();
        }
    }

    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        s = &s[1..s.len() - 1];
    }

    if let Some(idx) = s.find("\nExplanation:") {
        s = &s[..idx];
    }

    s.trim().to_string()
}

/// A text provider that deterministically appends a steering suffix
/// derived from the requested dimension, for use in tests and demos.
#[derive(Debug, Default)]
pub struct StubTextProvider;

#[async_trait]
impl TextProvider for StubTextProvider {
    async fn refine(&self, req: RefineRequest) -> Result<RefineResponse, ProviderError> {
        let dim = match req.dimension {
            crate::types::Dimension::What => "content",
            crate::types::Dimension::How => "style",
        };
        let raw = format!(
            "Improved WHAT tags: \"{} ({dim} refined)\"\nExplanation: stub refinement",
            req.prompt
        );
        Ok(RefineResponse {
            refined_prompt: strip_preamble(&raw),
            usage: Usage {
                provider: "stub-text".into(),
                operation: "refine".into(),
                tokens: req.prompt.len() as u64,
                model: "stub-text-v1".into(),
                dimension: Some(dim.to_string()),
                bucket: CostBucket::Text,
            },
        })
    }

    async fn combine(&self, req: CombineRequest) -> Result<CombineResponse, ProviderError> {
        Ok(CombineResponse {
            combined_prompt: format!("{}, {}", req.what, req.how),
            usage: Usage {
                provider: "stub-text".into(),
                operation: "combine".into(),
                tokens: (req.what.len() + req.how.len()) as u64,
                model: "stub-text-v1".into(),
                dimension: None,
                bucket: CostBucket::Text,
            },
        })
    }
}

/// An image provider that returns a deterministic local path derived from
/// the prompt, for use in tests and demos.
#[derive(Debug, Default)]
pub struct StubImageGenProvider;

#[async_trait]
impl ImageGenProvider for StubImageGenProvider {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let slug: String = req
            .prompt
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(24)
            .collect();
        Ok(GenerateResponse {
            url: None,
            local_path: Some(format!("/tmp/beam-stub/{slug}.png")),
            revised_prompt: None,
            metadata: serde_json::Value::Null,
            usage: Usage {
                provider: "stub-image".into(),
                operation: "generate".into(),
                tokens: 0,
                model: "stub-image-v1".into(),
                dimension: None,
                bucket: CostBucket::ImageGen,
            },
        })
    }
}

/// A vision provider that derives a stable pseudo-score from the image
/// path's length, for use in tests and demos.
#[derive(Debug, Default)]
pub struct StubVisionProvider;

#[async_trait]
impl VisionProvider for StubVisionProvider {
    async fn analyze(&self, req: AnalyzeRequest) -> Result<AnalyzeResponse, ProviderError> {
        let seed = req.image.len() as f32 + req.prompt.len() as f32;
        let evaluation = Evaluation {
            alignment: (seed * 3.7) % 100.0,
            aesthetic: (seed * 1.3) % 10.0,
        };
        let response = AnalyzeResponse {
            evaluation,
            caption: "stub caption".to_string(),
            strengths: vec!["clear composition".to_string()],
            weaknesses: vec![],
            usage: Usage {
                provider: "stub-vision".into(),
                operation: "analyze".into(),
                tokens: 0,
                model: "stub-vision-v1".into(),
                dimension: None,
                bucket: CostBucket::Vision,
            },
        };
        response
            .validate()
            .map_err(ProviderError::Other)?;
        Ok(response)
    }
}

/// A VLM provider that always prefers the image with the lexically larger
/// path, for deterministic tournament tests.
#[derive(Debug, Default)]
pub struct StubVlmProvider;

#[async_trait]
impl VLMProvider for StubVlmProvider {
    async fn compare(
        &self,
        image_a: &str,
        image_b: &str,
        _prompt: &str,
    ) -> Result<CompareResponse, ProviderError> {
        let choice = if image_a >= image_b {
            Choice::A
        } else {
            Choice::B
        };
        Ok(CompareResponse {
            choice,
            ranks_a: SideRanks {
                alignment: 70.0,
                aesthetics: 6.0,
            },
            ranks_b: SideRanks {
                alignment: 65.0,
                aesthetics: 6.5,
            },
            winner_strengths: vec!["sharper detail".to_string()],
            loser_weaknesses: vec!["softer detail".to_string()],
            confidence: 0.6,
        })
    }

    async fn rank(
        &self,
        candidates: &[RankCandidate],
        prompt: &str,
        ensemble_size: u32,
        graceful_degradation: bool,
        on_progress: Option<crate::traits::RankProgressHook>,
    ) -> Result<RankResponse, ProviderError> {
        let mut wins = vec![0u32; candidates.len()];
        let mut total_pairs = vec![0u32; candidates.len()];
        let mut strengths: Vec<Vec<String>> = vec![Vec::new(); candidates.len()];
        let mut weaknesses: Vec<Vec<String>> = vec![Vec::new(); candidates.len()];
        let mut beats: std::collections::HashMap<usize, std::collections::HashSet<usize>> =
            std::collections::HashMap::new();
        let mut errors = Vec::new();

        let pair_count = candidates.len() * candidates.len().saturating_sub(1) / 2;
        let mut done = 0usize;

        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                // Transitive-inference pruning: if we already know i beats j
                // (directly or through a chain), skip the live comparison.
                if let Some(winner) = infer_winner(&beats, i, j) {
                    let loser = if winner == i { j } else { i };
                    wins[winner] += 1;
                    total_pairs[i] += 1;
                    total_pairs[j] += 1;
                    beats.entry(winner).or_default().insert(loser);
                    done += 1;
                    if let Some(cb) = &on_progress {
                        cb(done, pair_count.max(done));
                    }
                    continue;
                }

                let mut votes_a = 0u32;
                let mut decided = true;
                let mut last_compare = None;
                for _ in 0..ensemble_size {
                    match self
                        .compare(&candidates[i].image, &candidates[j].image, prompt)
                        .await
                    {
                        Ok(r) => {
                            if r.choice == Choice::A {
                                votes_a += 1;
                            }
                            last_compare = Some(r);
                        }
                        Err(e) if graceful_degradation => {
                            errors.push(format!(
                                "pair ({}, {}): {e}",
                                candidates[i].id, candidates[j].id
                            ));
                            decided = false;
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }

                total_pairs[i] += 1;
                total_pairs[j] += 1;
                done += 1;
                if let Some(cb) = &on_progress {
                    cb(done, pair_count.max(done));
                }

                if !decided {
                    continue;
                }

                let (winner, loser) = if votes_a * 2 >= ensemble_size { (i, j) } else { (j, i) };
                wins[winner] += 1;
                beats.entry(winner).or_default().insert(loser);
                if let Some(r) = last_compare {
                    strengths[winner].extend(r.winner_strengths);
                    weaknesses[loser].extend(r.loser_weaknesses);
                }
            }
        }

        let rankings = candidates
            .iter()
            .enumerate()
            .map(|(idx, c)| crate::types::CandidateRanking {
                id: c.id.clone(),
                wins: wins[idx],
                total_pairs: total_pairs[idx],
                strengths: strengths[idx].clone(),
                weaknesses: weaknesses[idx].clone(),
            })
            .collect();

        Ok(RankResponse { rankings, errors })
    }
}

/// Follows the `beats` relation transitively from `a`; if `b` is reachable
/// returns `a` as the inferred winner, and symmetrically for `b` reaching
/// `a`. Returns `None` when neither side can be inferred, meaning a live
/// comparison is still required.
fn infer_winner(
    beats: &std::collections::HashMap<usize, std::collections::HashSet<usize>>,
    a: usize,
    b: usize,
) -> Option<usize> {
    if reaches(beats, a, b) {
        return Some(a);
    }
    if reaches(beats, b, a) {
        return Some(b);
    }
    None
}

fn reaches(
    beats: &std::collections::HashMap<usize, std::collections::HashSet<usize>>,
    from: usize,
    to: usize,
) -> bool {
    let mut visited = std::collections::HashSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = beats.get(&node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapper_text_and_explanation() {
        let raw = "Improved WHAT tags: \"a mountain at dawn\"\nExplanation: made it vivid";
        assert_eq!(strip_preamble(raw), "a mountain at dawn");
    }

    #[tokio::test]
    async fn stub_generate_populates_exactly_one_image_field() {
        let provider = StubImageGenProvider;
        let req = GenerateRequest {
            prompt: "a cat".into(),
            width: 512,
            height: 512,
            steps: 20,
            guidance: 7.0,
            seed: None,
            negative_prompt: None,
            fix_faces: false,
            restoration_strength: None,
            face_upscale: None,
            loras: vec![],
            iteration: None,
            candidate_id: None,
            session_id: None,
        };
        let resp = provider.generate(req).await.unwrap();
        assert!(resp.is_well_formed());
    }

    #[tokio::test]
    async fn rank_sum_of_wins_equals_decided_pairs() {
        let provider = StubVlmProvider;
        let candidates = vec![
            RankCandidate {
                id: "a".into(),
                image: "/tmp/a.png".into(),
            },
            RankCandidate {
                id: "b".into(),
                image: "/tmp/b.png".into(),
            },
            RankCandidate {
                id: "c".into(),
                image: "/tmp/c.png".into(),
            },
        ];
        let response = provider
            .rank(&candidates, "prompt", 1, true, None)
            .await
            .unwrap();
        let total_wins: u32 = response.rankings.iter().map(|r| r.wins).sum();
        let decided_pairs = candidates.len() * (candidates.len() - 1) / 2;
        assert_eq!(total_wins as usize, decided_pairs);
    }

    #[test]
    fn transitive_inference_skips_the_dominated_pair() {
        let mut beats = std::collections::HashMap::new();
        beats.insert(0usize, std::collections::HashSet::from([1usize]));
        beats.insert(1usize, std::collections::HashSet::from([2usize]));
        assert_eq!(infer_winner(&beats, 0, 2), Some(0));
        assert_eq!(infer_winner(&beats, 2, 0), Some(0));
        assert_eq!(infer_winner(&beats, 0, 1), Some(0));
    }
}
