use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use beam_core::{
    build_critique, Candidate, CandidateId, Capability, Critique, Event, EventKind, CandidatePatch,
    CoreError, FinalWinner, ImageRef, IterationRecord, Job, JobId, JobMetadata, JobParams,
    JobStatus, ProviderFamily, RankingMode, Recommendation,
};
use beam_events::EventBus;
use beam_providers::{
    AnalyzeRequest, Choice, CombineRequest, Descriptiveness, Dimension, GenerateRequest,
    GenerateResponse, ProviderError, RefineRequest, RefineResponse,
};
use beam_upstream::{RateGateError, ServiceConnectionError, TokenTracker};

use crate::metadata::Persist;
use crate::providers::ProviderSet;
use crate::registry::JobRegistry;
use crate::upstream::UpstreamContext;

/// Baseline image generation knobs used when a job's `provider_options`
/// does not steer them. The core never interprets `provider_options`
/// itself; providers that want finer control read it directly.
const DEFAULT_WIDTH: u32 = 1024;
const DEFAULT_HEIGHT: u32 = 1024;
const DEFAULT_STEPS: u32 = 30;
const DEFAULT_GUIDANCE: f32 = 7.5;

/// Interval between heartbeat `operation` events during a long upstream call.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Drives one job through PREPARE -> EXPAND -> EVALUATE -> RANK -> SELECT,
/// looping until survivors run out of iterations or fall below `m`, then
/// FINALIZE. One orchestrator instance owns exactly one job's run.
pub struct Orchestrator {
    job_id: JobId,
    params: JobParams,
    cancel: CancellationToken,
    providers: ProviderSet,
    upstream: Arc<UpstreamContext>,
    tracker: TokenTracker,
    bus: Arc<EventBus>,
    persist: Arc<dyn Persist>,
    registry: Arc<JobRegistry>,
    family_of: HashMap<Capability, ProviderFamily>,
    descriptiveness: Descriptiveness,
}

impl Orchestrator {
    pub fn new(
        job_id: JobId,
        params: JobParams,
        cancel: CancellationToken,
        providers: ProviderSet,
        upstream: Arc<UpstreamContext>,
        bus: Arc<EventBus>,
        persist: Arc<dyn Persist>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let mut family_of = HashMap::new();
        for capability in Capability::ALL {
            let family = params
                .provider_families
                .get(&capability.to_string())
                .copied()
                .unwrap_or(ProviderFamily::Remote);
            family_of.insert(capability, family);
        }
        let descriptiveness =
            Descriptiveness::from_level(params.descriptiveness).unwrap_or(Descriptiveness::Balanced);
        let tracker = TokenTracker::new(upstream.pricing.clone());

        Self {
            job_id,
            params,
            cancel,
            providers,
            upstream,
            tracker,
            bus,
            persist,
            registry,
            family_of,
            descriptiveness,
        }
    }

    fn publish(&self, kind: EventKind) {
        self.bus.publish(Event::new(self.job_id, kind));
    }

    fn job_snapshot(&self) -> Job {
        self.registry
            .get(self.job_id)
            .expect("a job's own orchestrator run must find its record in the registry")
    }

    /// Run `op` against `capability`, gated by its rate limit, serialized
    /// against every other GPU-resident capability, and wrapped in the
    /// capability's retry/backoff policy. Emits a heartbeat `operation`
    /// event every `HEARTBEAT_INTERVAL` while the call is in flight.
    async fn call_upstream<F, Fut, T>(
        &self,
        capability: Capability,
        message: impl Into<String>,
        op: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.publish(EventKind::Operation {
            capability,
            message: message.into(),
        });

        let family = self
            .family_of
            .get(&capability)
            .copied()
            .unwrap_or(ProviderFamily::Remote);
        let gate = self.upstream.rate_gates.gate_for(capability, family);
        let connection = self.upstream.connection(capability);

        let call_future = gate.execute(&self.cancel, || async {
            self.upstream
                .gpu
                .with_operation(capability, || async {
                    connection
                        .call(&op, ProviderError::is_connection_level, |e| {
                            e.is_connection_level()
                        })
                        .await
                })
                .await
        });
        tokio::pin!(call_future);

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );

        let outcome = loop {
            tokio::select! {
                biased;
                res = &mut call_future => break res,
                _ = ticker.tick() => {
                    self.publish(EventKind::Operation {
                        capability,
                        message: format!("still waiting on {capability}"),
                    });
                }
            }
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ServiceConnectionError::RetriesExhausted { source, .. })) => {
                if source.is_content_policy() {
                    Err(CoreError::ContentPolicy(source.to_string()))
                } else {
                    Err(CoreError::UpstreamUnavailable(source.to_string()))
                }
            }
            Err(RateGateError::Cancelled) => Err(CoreError::Cancelled),
        }
    }

    async fn refine(
        &self,
        prompt: String,
        dimension: Dimension,
        critique: Option<Critique>,
        prior_result: Option<String>,
    ) -> Result<RefineResponse, CoreError> {
        let req = RefineRequest {
            prompt,
            dimension,
            critique,
            user_prompt: Some(self.params.prompt.clone()),
            prior_result,
        };
        let response = self
            .call_upstream(Capability::Text, format!("refine {dimension:?}"), || {
                self.providers.text.refine(req.clone())
            })
            .await?;
        self.tracker.record(response.usage.clone());
        Ok(response)
    }

    async fn combine(&self, req: CombineRequest) -> Result<beam_providers::CombineResponse, CoreError> {
        let response = self
            .call_upstream(Capability::Text, "combine prompt", || {
                self.providers.text.combine(req.clone())
            })
            .await?;
        self.tracker.record(response.usage.clone());
        Ok(response)
    }

    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, CoreError> {
        let response = self
            .call_upstream(Capability::ImageGen, "generate image", || {
                self.providers.image.generate(req.clone())
            })
            .await?;
        self.tracker.record(response.usage.clone());
        Ok(response)
    }

    async fn analyze(&self, req: AnalyzeRequest) -> Result<beam_providers::AnalyzeResponse, CoreError> {
        let response = self
            .call_upstream(Capability::Vision, "analyze image", || {
                self.providers.vision.analyze(req.clone())
            })
            .await?;
        response.validate().map_err(CoreError::Fatal)?;
        self.tracker.record(response.usage.clone());
        Ok(response)
    }

    /// Compare one pair of images; usage is not tracked against the cost
    /// ledger since `CompareResponse` carries no usage field.
    async fn compare_images(
        &self,
        image_a: &str,
        image_b: &str,
    ) -> Result<beam_providers::CompareResponse, CoreError> {
        let prompt = self.params.prompt.clone();
        self.call_upstream(Capability::Vlm, "compare candidates", || {
            self.providers.vlm.compare(image_a, image_b, &prompt)
        })
        .await
    }

    fn build_generate_request(
        &self,
        prompt: &str,
        iteration: u32,
        candidate_id: CandidateId,
    ) -> GenerateRequest {
        let face_fix = self.params.face_fix.as_ref();
        GenerateRequest {
            prompt: prompt.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            steps: DEFAULT_STEPS,
            guidance: DEFAULT_GUIDANCE,
            seed: None,
            negative_prompt: None,
            fix_faces: face_fix.map(|f| f.fix_faces).unwrap_or(false),
            restoration_strength: face_fix.and_then(|f| f.restoration_strength),
            face_upscale: face_fix.and_then(|f| f.face_upscale),
            loras: Vec::new(),
            iteration: Some(iteration),
            candidate_id: Some(candidate_id.to_string()),
            session_id: Some(self.job_id.to_string()),
        }
    }

    /// One content-policy safety retry: rephrase via a forced-rework
    /// critique, then regenerate once. If this also fails, the error
    /// propagates to the caller, who fails only this candidate.
    async fn rephrase_and_regenerate(
        &self,
        combined_prompt: &str,
        iteration: u32,
        candidate_id: CandidateId,
        rejection_reason: &str,
    ) -> Result<GenerateResponse, CoreError> {
        let critique = Critique {
            critique: format!("prior prompt rejected on content-policy grounds: {rejection_reason}"),
            recommendation: Recommendation::Rework,
            reason: "content policy safety retry".to_string(),
        };
        let rephrased = self
            .refine(combined_prompt.to_string(), Dimension::What, Some(critique), None)
            .await?;
        let req = self.build_generate_request(&rephrased.refined_prompt, iteration, candidate_id);
        self.generate(req).await
    }

    /// Expand one candidate: refine what/how, combine, generate, publishing
    /// a `candidate` patch as each field becomes known (receivers merge on
    /// id). A failure at any step marks the candidate failed and returns it
    /// early rather than aborting the whole iteration.
    async fn expand_one(&self, iteration: u32, ordinal: u32, parent: Option<&Candidate>) -> Candidate {
        let parent_id = parent.map(|p| p.id);
        let mut candidate = Candidate::new(iteration, ordinal, parent_id, String::new(), String::new(), String::new());
        self.publish(EventKind::Candidate {
            candidate: CandidatePatch::new(candidate.id),
        });

        let critique = parent.map(build_critique);
        let base_prompt = parent
            .map(|p| p.combined_prompt.clone())
            .unwrap_or_else(|| self.params.prompt.clone());

        let (what_result, how_result) = tokio::join!(
            self.refine(
                base_prompt.clone(),
                Dimension::What,
                critique.clone(),
                parent.map(|p| p.what_prompt.clone()),
            ),
            self.refine(
                base_prompt,
                Dimension::How,
                critique,
                parent.map(|p| p.how_prompt.clone()),
            ),
        );

        let (what, how) = match (what_result, how_result) {
            (Ok(w), Ok(h)) => (w.refined_prompt, h.refined_prompt),
            (Err(e), _) | (_, Err(e)) => {
                candidate.mark_failed(e.to_string());
                return candidate;
            }
        };
        candidate.what_prompt = what.clone();
        candidate.how_prompt = how.clone();
        self.publish(EventKind::Candidate {
            candidate: CandidatePatch {
                id: candidate.id,
                parent_id,
                what_prompt: Some(what.clone()),
                how_prompt: Some(how.clone()),
                ..Default::default()
            },
        });

        let combine_req = CombineRequest::new(Some(&what), Some(&how), self.descriptiveness);
        let combined = match self.combine(combine_req).await {
            Ok(resp) => resp.combined_prompt,
            Err(e) => {
                candidate.mark_failed(e.to_string());
                return candidate;
            }
        };
        candidate.combined_prompt = combined.clone();
        self.publish(EventKind::Candidate {
            candidate: CandidatePatch {
                id: candidate.id,
                combined_prompt: Some(combined.clone()),
                ..Default::default()
            },
        });

        let gen_req = self.build_generate_request(&combined, iteration, candidate.id);
        let image = match self.generate(gen_req).await {
            Ok(resp) => resp,
            Err(CoreError::ContentPolicy(reason)) => {
                self.publish(EventKind::Step {
                    stage: "safety".to_string(),
                    status: "retrying".to_string(),
                    running_cost: None,
                });
                match self
                    .rephrase_and_regenerate(&combined, iteration, candidate.id, &reason)
                    .await
                {
                    Ok(resp) => {
                        self.publish(EventKind::Step {
                            stage: "safety".to_string(),
                            status: "recovered".to_string(),
                            running_cost: None,
                        });
                        resp
                    }
                    Err(e) => {
                        self.publish(EventKind::Step {
                            stage: "safety".to_string(),
                            status: "failed".to_string(),
                            running_cost: None,
                        });
                        candidate.mark_failed(e.to_string());
                        return candidate;
                    }
                }
            }
            Err(e) => {
                candidate.mark_failed(e.to_string());
                return candidate;
            }
        };

        if !image.is_well_formed() {
            warn!(candidate_id = %candidate.id, "generate response carried neither or both of url/local_path");
        }
        let image_ref = image_ref_from(&image);
        candidate.image = Some(image_ref.clone());
        candidate.survived = true;
        self.publish(EventKind::Candidate {
            candidate: CandidatePatch {
                id: candidate.id,
                image: Some(image_ref),
                ..Default::default()
            },
        });

        candidate
    }

    /// Expand every survivor into its `n/m` children (or all `n` seeds at
    /// iteration 0), fanning the per-candidate work out as cooperative
    /// tasks rather than spawning, per the concurrency model's "equivalent
    /// cooperative tasks" allowance.
    async fn expand(&self, iteration: u32, survivors: &[Candidate]) -> Vec<Candidate> {
        let mut tasks = Vec::new();
        if survivors.is_empty() {
            for ordinal in 0..self.params.n {
                tasks.push(self.expand_one(iteration, ordinal, None));
            }
        } else {
            let children_per_survivor = self.params.expansion_ratio();
            let mut ordinal = 0;
            for parent in survivors {
                for _ in 0..children_per_survivor {
                    tasks.push(self.expand_one(iteration, ordinal, Some(parent)));
                    ordinal += 1;
                }
            }
        }
        join_all(tasks).await
    }

    async fn evaluate_one(&self, candidate: &mut Candidate) {
        if !candidate.survived {
            return;
        }
        let Some(image) = candidate.image.clone() else {
            candidate.mark_failed("no image available to evaluate");
            return;
        };
        let image_str = match image {
            ImageRef::Url { url } => url,
            ImageRef::LocalPath { path } => path,
        };
        let req = AnalyzeRequest {
            image: image_str,
            prompt: self.params.prompt.clone(),
            focus_areas: Vec::new(),
        };
        match self.analyze(req).await {
            Ok(resp) => {
                let total = resp.evaluation.total_score(self.params.alpha);
                candidate.evaluation = Some(resp.evaluation);
                candidate.total_score = Some(total);
                candidate.ranking.strengths = resp.strengths;
                candidate.ranking.weaknesses = resp.weaknesses;
                self.publish(EventKind::Candidate {
                    candidate: CandidatePatch {
                        id: candidate.id,
                        evaluation: Some(resp.evaluation),
                        total_score: Some(total),
                        ..Default::default()
                    },
                });
            }
            Err(e) => candidate.mark_failed(e.to_string()),
        }
    }

    /// Score every surviving candidate from EXPAND. Runs regardless of
    /// ranking mode: tournament mode still needs `totalScore` as its
    /// fallback and for tie-breaking the critique builder's thresholds.
    async fn evaluate(&self, candidates: &mut [Candidate]) {
        let tasks = candidates.iter_mut().map(|c| self.evaluate_one(c));
        join_all(tasks).await;
    }

    fn score_order(&self, candidates: &[Candidate], eligible: &[usize]) -> Vec<usize> {
        let mut order = eligible.to_vec();
        order.sort_by(|&a, &b| {
            let ca = &candidates[a];
            let cb = &candidates[b];
            cb.total_score
                .unwrap_or(0.0)
                .partial_cmp(&ca.total_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let align_a = ca.evaluation.map(|e| e.alignment).unwrap_or(0.0);
                    let align_b = cb.evaluation.map(|e| e.alignment).unwrap_or(0.0);
                    align_b.partial_cmp(&align_a).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| ca.ordinal.cmp(&cb.ordinal))
        });
        order
    }

    /// Follows the `beats` relation transitively from `a`; if `b` is
    /// reachable, `a` is the inferred winner, and symmetrically for `b`
    /// reaching `a`. `None` means neither side can be inferred and a live
    /// comparison is still required.
    fn infer_winner(beats: &HashMap<usize, std::collections::HashSet<usize>>, a: usize, b: usize) -> Option<usize> {
        if Self::reaches(beats, a, b) {
            return Some(a);
        }
        if Self::reaches(beats, b, a) {
            return Some(b);
        }
        None
    }

    fn reaches(beats: &HashMap<usize, std::collections::HashSet<usize>>, from: usize, to: usize) -> bool {
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

    /// Run one pairwise comparison `ensemble_size` times and take the
    /// majority vote, ties going to A. Returns `None` if the pair should be
    /// recorded as undecided (every vote in the ensemble errored).
    async fn decide_pair(
        &self,
        image_a: &str,
        image_b: &str,
        ensemble_size: u32,
    ) -> Option<(Choice, Vec<String>, Vec<String>)> {
        let mut votes_a = 0u32;
        let mut votes_cast = 0u32;
        let mut last: Option<beam_providers::CompareResponse> = None;
        for _ in 0..ensemble_size {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.compare_images(image_a, image_b).await {
                Ok(resp) => {
                    if resp.choice == Choice::A {
                        votes_a += 1;
                    }
                    votes_cast += 1;
                    last = Some(resp);
                }
                Err(_) => continue,
            }
        }
        if votes_cast == 0 {
            return None;
        }
        let choice = if votes_a * 2 >= votes_cast { Choice::A } else { Choice::B };
        let resp = last?;
        Some((choice, resp.winner_strengths, resp.loser_weaknesses))
    }

    /// Build all pairs (i,j) with i<j over `eligible` and run the VLM
    /// tournament: ensemble-vote each pair, skip pairs already decided by
    /// transitive inference, and record wins/strengths/weaknesses per
    /// candidate. Returns `None` if every pair went undecided, signaling the
    /// caller to fall back to score-mode ordering.
    async fn run_tournament(&self, candidates: &mut [Candidate], eligible: &[usize]) -> Option<Vec<usize>> {
        let ensemble_size = self.params.ensemble_size;
        let image_of = |c: &Candidate| match &c.image {
            Some(ImageRef::Url { url }) => url.clone(),
            Some(ImageRef::LocalPath { path }) => path.clone(),
            None => String::new(),
        };

        let mut wins = HashMap::new();
        let mut total_pairs = HashMap::new();
        let mut beats: HashMap<usize, std::collections::HashSet<usize>> = HashMap::new();
        let mut decided_pairs = 0u32;

        for &i in eligible {
            wins.insert(i, 0u32);
            total_pairs.insert(i, 0u32);
        }

        'pairs: for (pos, &i) in eligible.iter().enumerate() {
            for &j in &eligible[pos + 1..] {
                if self.cancel.is_cancelled() {
                    break 'pairs;
                }

                // Transitive-inference pruning: skip the live comparison if
                // the outcome already follows from earlier pairs.
                if let Some(winner) = Self::infer_winner(&beats, i, j) {
                    let loser = if winner == i { j } else { i };
                    *wins.get_mut(&winner).unwrap() += 1;
                    *total_pairs.get_mut(&i).unwrap() += 1;
                    *total_pairs.get_mut(&j).unwrap() += 1;
                    beats.entry(winner).or_default().insert(loser);
                    decided_pairs += 1;
                    continue;
                }

                let image_a = image_of(&candidates[i]);
                let image_b = image_of(&candidates[j]);
                *total_pairs.get_mut(&i).unwrap() += 1;
                *total_pairs.get_mut(&j).unwrap() += 1;

                let Some((choice, winner_strengths, loser_weaknesses)) =
                    self.decide_pair(&image_a, &image_b, ensemble_size).await
                else {
                    continue;
                };

                let (winner, loser) = if choice == Choice::A { (i, j) } else { (j, i) };
                *wins.get_mut(&winner).unwrap() += 1;
                beats.entry(winner).or_default().insert(loser);
                decided_pairs += 1;
                candidates[winner].ranking.strengths.extend(winner_strengths);
                candidates[loser].ranking.weaknesses.extend(loser_weaknesses);
            }
        }

        if decided_pairs == 0 {
            return None;
        }

        let total_wins: u32 = wins.values().sum();
        for &i in eligible {
            candidates[i].ranking.wins = wins[&i];
            candidates[i].ranking.total_pairs = total_pairs[&i];
        }

        let mut order = eligible.to_vec();
        order.sort_by(|&a, &b| {
            let wins_a = candidates[a].ranking.wins;
            let wins_b = candidates[b].ranking.wins;
            wins_b
                .cmp(&wins_a)
                .then_with(|| {
                    let buchholz_a = total_wins.saturating_sub(wins_a);
                    let buchholz_b = total_wins.saturating_sub(wins_b);
                    buchholz_b.cmp(&buchholz_a)
                })
                .then_with(|| candidates[a].ordinal.cmp(&candidates[b].ordinal))
        });
        Some(order)
    }

    /// Rank every eligible candidate from this iteration, emitting `ranked`
    /// events in rank order starting from rank 1. Tournament mode gracefully
    /// degrades to score-mode ordering if every pair fails.
    async fn rank(&self, iteration: u32, candidates: &mut [Candidate]) {
        let eligible: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.survived && c.total_score.is_some())
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return;
        }

        let use_tournament = self.params.ranking_mode == RankingMode::Vlm && eligible.len() >= 2;
        let order = if use_tournament {
            match self.run_tournament(candidates, &eligible).await {
                Some(order) => order,
                None => self.score_order(candidates, &eligible),
            }
        } else {
            self.score_order(candidates, &eligible)
        };

        for (pos, &idx) in order.iter().enumerate() {
            let rank = (pos + 1) as u32;
            let tie = pos > 0 && {
                let prev = &candidates[order[pos - 1]];
                let cur = &candidates[idx];
                if use_tournament {
                    prev.ranking.wins == cur.ranking.wins
                } else {
                    prev.total_score == cur.total_score
                }
            };
            candidates[idx].ranking.iteration_rank = Some(rank);
            candidates[idx].ranking.tie = tie;
            let candidate_id = candidates[idx].id;
            self.publish(EventKind::Ranked {
                iteration,
                candidate_id,
                rank,
            });
        }
    }

    /// Keep the top `m` candidates by iteration rank for the next
    /// generation; mark the rest as not surviving even if EXPAND
    /// succeeded for them.
    fn select(&self, mut candidates: Vec<Candidate>) -> (Vec<Candidate>, Vec<Candidate>) {
        let m = self.params.m as usize;
        candidates.sort_by_key(|c| c.ranking.iteration_rank.unwrap_or(u32::MAX));
        for (i, c) in candidates.iter_mut().enumerate() {
            c.survived = c.survived && i < m;
        }
        let survivors = candidates.iter().take(m).cloned().collect();
        (survivors, candidates)
    }

    /// Higher-iteration candidates are preferred on a tied iteration rank,
    /// then by the iteration rank itself.
    fn compute_global_ranking(iterations: &[IterationRecord]) -> Vec<(CandidateId, u32)> {
        let mut ranked: Vec<&Candidate> = iterations
            .iter()
            .flat_map(|it| it.candidates.iter())
            .filter(|c| c.ranking.iteration_rank.is_some())
            .collect();
        ranked.sort_by(|a, b| {
            a.ranking
                .iteration_rank
                .unwrap()
                .cmp(&b.ranking.iteration_rank.unwrap())
                .then_with(|| b.iteration.cmp(&a.iteration))
        });
        ranked
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, (i + 1) as u32))
            .collect()
    }

    async fn finalize(
        &self,
        mut iterations: Vec<IterationRecord>,
    ) -> Result<JobMetadata, (CoreError, Vec<IterationRecord>)> {
        let ranking = Self::compute_global_ranking(&iterations);
        let rank_by_id: HashMap<CandidateId, u32> = ranking.iter().copied().collect();
        for iter_record in &mut iterations {
            for candidate in &mut iter_record.candidates {
                if let Some(&rank) = rank_by_id.get(&candidate.id) {
                    candidate.ranking.global_rank = Some(rank);
                }
            }
        }

        let Some(&(winner_id, _)) = ranking.first() else {
            let err = CoreError::Fatal("no candidate reached a global rank".to_string());
            return Err((err, iterations));
        };
        let Some(winner_iteration) = iterations
            .iter()
            .flat_map(|it| &it.candidates)
            .find(|c| c.id == winner_id)
            .map(|c| c.iteration)
        else {
            let err = CoreError::Fatal("global ranking referenced an unknown candidate".to_string());
            return Err((err, iterations));
        };

        self.publish(EventKind::GlobalRanking {
            rankings: ranking.clone(),
        });

        let final_winner = FinalWinner {
            iteration: winner_iteration,
            candidate_id: winner_id,
        };
        let lineage = beam_core::build_lineage(&iterations, winner_id);

        Ok(JobMetadata {
            user_prompt: self.params.prompt.clone(),
            config: self.params.clone(),
            iterations,
            final_winner: Some(final_winner),
            lineage,
            costs: self.tracker.totals(),
            status: "complete".to_string(),
            errors: Vec::new(),
        })
    }

    fn truncated_metadata(&self, iterations: Vec<IterationRecord>, status: &str, errors: Vec<String>) -> JobMetadata {
        JobMetadata {
            user_prompt: self.params.prompt.clone(),
            config: self.params.clone(),
            iterations,
            final_winner: None,
            lineage: Vec::new(),
            costs: self.tracker.totals(),
            status: status.to_string(),
            errors,
        }
    }

    async fn run_inner(&self) -> Result<JobMetadata, (CoreError, Vec<IterationRecord>)> {
        let mut iterations: Vec<IterationRecord> = Vec::new();
        let mut survivors: Vec<Candidate> = Vec::new();
        let needed = self.params.m as usize;

        for iteration in 0..self.params.max_iterations {
            if self.cancel.is_cancelled() {
                return Err((CoreError::Cancelled, iterations));
            }

            let mut children = self.expand(iteration, &survivors).await;

            if self.cancel.is_cancelled() {
                return Err((CoreError::Cancelled, iterations));
            }

            let succeeded = children.iter().filter(|c| c.survived).count();
            if succeeded < needed {
                iterations.push(IterationRecord { iteration, candidates: children });
                return Err((
                    CoreError::InsufficientCandidates { needed, got: succeeded },
                    iterations,
                ));
            }

            self.evaluate(&mut children).await;

            if self.cancel.is_cancelled() {
                return Err((CoreError::Cancelled, iterations));
            }

            self.rank(iteration, &mut children).await;

            let running_cost = self.tracker.totals();
            self.publish(EventKind::Iteration { iteration, running_cost });

            let (next_survivors, ranked_children) = self.select(children);
            iterations.push(IterationRecord { iteration, candidates: ranked_children });
            survivors = next_survivors;
        }

        self.finalize(iterations).await
    }

    /// Drive this job to completion, updating the registry's status and
    /// publishing the terminal event, then persisting metadata per the
    /// error-handling rules: always for a successful run or an
    /// `InsufficientCandidates` failure, and for a cancellation only if at
    /// least one iteration had already completed.
    pub async fn run(self) {
        self.registry.set_status(self.job_id, JobStatus::Running);
        let outcome = self.run_inner().await;

        match outcome {
            Ok(metadata) => {
                self.registry.set_status(self.job_id, JobStatus::Complete);
                self.persist_best_effort(&metadata).await;
                self.publish(EventKind::Complete {
                    metadata: Box::new(metadata),
                });
            }
            Err((CoreError::Cancelled, iterations)) => {
                self.registry.set_status(self.job_id, JobStatus::Cancelled);
                if !iterations.is_empty() {
                    let metadata = self.truncated_metadata(iterations, "cancelled", Vec::new());
                    self.persist_best_effort(&metadata).await;
                }
                self.publish(EventKind::Cancelled);
            }
            Err((CoreError::InsufficientCandidates { needed, got }, iterations)) => {
                self.registry.set_status(self.job_id, JobStatus::Failed);
                let message = format!("insufficient candidates: needed {needed}, got {got}");
                let metadata = self.truncated_metadata(iterations, "failed", vec![message.clone()]);
                self.persist_best_effort(&metadata).await;
                self.publish(EventKind::Error { message });
            }
            Err((other, iterations)) => {
                self.registry.set_status(self.job_id, JobStatus::Failed);
                let message = other.to_string();
                let metadata = self.truncated_metadata(iterations, "failed", vec![message.clone()]);
                self.persist_best_effort(&metadata).await;
                self.publish(EventKind::Error { message });
            }
        }

        self.bus.close_job(self.job_id);
    }

    async fn persist_best_effort(&self, metadata: &JobMetadata) {
        let job = self.job_snapshot();
        if let Err(e) = self.persist.save_metadata(&job, metadata).await {
            warn!(job_id = %self.job_id, error = %e, "failed to persist job metadata");
        }
    }
}

fn image_ref_from(resp: &GenerateResponse) -> ImageRef {
    if let Some(url) = &resp.url {
        ImageRef::Url { url: url.clone() }
    } else {
        ImageRef::LocalPath {
            path: resp.local_path.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use beam_core::RankingMode;
    use beam_providers::stub::{StubImageGenProvider, StubTextProvider, StubVisionProvider, StubVlmProvider};
    use beam_providers::{CombineResponse, TextProvider};
    use beam_upstream::{GpuCoordinator, PricingTable};

    use crate::metadata::{DefaultPathBuilder, FilesystemPersist};

    use super::*;

    fn params(n: u32, m: u32, max_iterations: u32, ranking_mode: RankingMode) -> JobParams {
        JobParams {
            prompt: "a quiet harbor at dusk".to_string(),
            n,
            m,
            max_iterations,
            alpha: 0.7,
            temperature: 0.8,
            descriptiveness: 2,
            ensemble_size: 3,
            ranking_mode,
            models: HashMap::new(),
            provider_families: HashMap::new(),
            face_fix: None,
            provider_options: serde_json::Value::Null,
        }
    }

    fn harness(tmp: &Path) -> (Arc<JobRegistry>, Arc<EventBus>, Arc<UpstreamContext>, Arc<dyn Persist>, ProviderSet) {
        let registry = Arc::new(JobRegistry::new());
        let bus = Arc::new(EventBus::default());
        let persist: Arc<dyn Persist> =
            Arc::new(FilesystemPersist::new(DefaultPathBuilder::new(tmp.to_path_buf())));
        let upstream = Arc::new(UpstreamContext::new(
            Arc::new(GpuCoordinator::new(None)),
            PricingTable::default(),
        ));
        let providers = ProviderSet {
            text: Arc::new(StubTextProvider) as Arc<dyn TextProvider>,
            image: Arc::new(StubImageGenProvider) as Arc<dyn beam_providers::ImageGenProvider>,
            vision: Arc::new(StubVisionProvider) as Arc<dyn beam_providers::VisionProvider>,
            vlm: Arc::new(StubVlmProvider) as Arc<dyn beam_providers::VLMProvider>,
        };
        (registry, bus, upstream, persist, providers)
    }

    /// Recursively checks whether any `metadata.json` file exists under
    /// `root`, without depending on the exact date/session path segments
    /// `DefaultPathBuilder` generates.
    fn any_metadata_file(root: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(root) else {
            return false;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if any_metadata_file(&path) {
                    return true;
                }
            } else if path.file_name().is_some_and(|n| n == "metadata.json") {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    async fn happy_path_reaches_complete_and_persists_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, bus, upstream, persist, providers) = harness(tmp.path());
        let (job_id, cancel) = registry.create(params(2, 1, 1, RankingMode::Score));

        let mut subscription = bus.subscribe(job_id);
        let orchestrator = Orchestrator::new(
            job_id,
            params(2, 1, 1, RankingMode::Score),
            cancel,
            providers,
            upstream,
            bus.clone(),
            persist,
            registry.clone(),
        );
        orchestrator.run().await;

        let job = registry.get(job_id).expect("job stays in the registry after completion");
        assert_eq!(job.status, JobStatus::Complete);

        let mut saw_complete = false;
        while let Some(event) = subscription.next().await {
            if let EventKind::Complete { metadata } = event.kind {
                assert_eq!(metadata.status, "complete");
                assert!(metadata.final_winner.is_some());
                saw_complete = true;
            }
        }
        assert!(saw_complete, "expected a terminal Complete event");
        assert!(any_metadata_file(tmp.path()), "a completed job must persist metadata.json");
    }

    #[tokio::test]
    async fn tournament_mode_happy_path_also_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, bus, upstream, persist, providers) = harness(tmp.path());
        let (job_id, cancel) = registry.create(params(4, 2, 1, RankingMode::Vlm));

        let orchestrator = Orchestrator::new(
            job_id,
            params(4, 2, 1, RankingMode::Vlm),
            cancel,
            providers,
            upstream,
            bus.clone(),
            persist,
            registry.clone(),
        );
        orchestrator.run().await;

        let job = registry.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    /// A text provider that trips the shared cancellation token on its
    /// first call, to deterministically exercise mid-EXPAND cancellation
    /// without relying on timing.
    struct CancelOnFirstRefine {
        inner: StubTextProvider,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl TextProvider for CancelOnFirstRefine {
        async fn refine(&self, req: RefineRequest) -> Result<RefineResponse, ProviderError> {
            self.cancel.cancel();
            self.inner.refine(req).await
        }

        async fn combine(&self, req: CombineRequest) -> Result<CombineResponse, ProviderError> {
            self.inner.combine(req).await
        }
    }

    #[tokio::test]
    async fn cancel_mid_expand_skips_finalize_and_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, bus, upstream, persist, mut providers) = harness(tmp.path());
        let (job_id, cancel) = registry.create(params(4, 2, 2, RankingMode::Score));
        providers.text = Arc::new(CancelOnFirstRefine {
            inner: StubTextProvider,
            cancel: cancel.clone(),
        });

        let mut subscription = bus.subscribe(job_id);
        let orchestrator = Orchestrator::new(
            job_id,
            params(4, 2, 2, RankingMode::Score),
            cancel,
            providers,
            upstream,
            bus.clone(),
            persist,
            registry.clone(),
        );
        orchestrator.run().await;

        let job = registry.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let mut saw_cancelled = false;
        while let Some(event) = subscription.next().await {
            if matches!(event.kind, EventKind::Cancelled) {
                saw_cancelled = true;
            }
            assert!(!matches!(event.kind, EventKind::Complete { .. }));
        }
        assert!(saw_cancelled, "expected a terminal Cancelled event");
        assert!(
            !any_metadata_file(tmp.path()),
            "cancellation before any iteration completed must not persist metadata"
        );
    }
}
