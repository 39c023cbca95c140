//! The query workflow: a fixed-topology state machine that expands a
//! query, retrieves context, generates a response, scores it, and loops
//! back through refinement until the groundedness gate passes or the
//! iteration cap forces a terminal decision.

use tracing::{debug, warn};

use crate::embeddings::Embedder;
use crate::error::WorkflowError;
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::models::RetrievedPassage;
use crate::scoring::GroundednessScorer;

pub const GROUNDEDNESS_THRESHOLD: f32 = 0.8;
/// Score assumed when the scoring backend fails outright.
pub const CONSERVATIVE_SCORE: f32 = 0.0;
pub const EXPANSION_HINT: &str = "(include closely related terms)";
pub const REFINEMENT_MARKER: &str = "[refined]";
const UNEXPECTED_TERMINATION_TEXT: &str = "Workflow terminated unexpectedly";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ExpandQuery,
    RetrieveContext,
    CraftResponse,
    ScoreGroundedness,
    CheckPrecision,
    RefineQuery,
    End,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::ExpandQuery => "expand_query",
            Step::RetrieveContext => "retrieve_context",
            Step::CraftResponse => "craft_response",
            Step::ScoreGroundedness => "score_groundedness",
            Step::CheckPrecision => "check_precision",
            Step::RefineQuery => "refine_query",
            Step::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    RefineQuery,
}

/// The single mutable record threaded through the workflow. Created fresh
/// per query, discarded at the terminal state.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub query: String,
    pub expanded_query: String,
    pub context: Vec<RetrievedPassage>,
    pub response: String,
    pub groundedness_score: Option<f32>,
    pub loop_count: u32,
    pub loop_max_iter: u32,
    pub decision: Option<Decision>,
}

impl WorkflowState {
    pub fn new(query: &str, loop_max_iter: u32) -> Self {
        Self {
            query: query.to_string(),
            expanded_query: String::new(),
            context: Vec::new(),
            response: String::new(),
            groundedness_score: None,
            loop_count: 0,
            loop_max_iter,
            decision: None,
        }
    }
}

/// Immutable transition table for the fixed pipeline topology. Built once
/// and handed to the runner; deliberately not a configurable DAG.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    entry: Step,
    edges: Vec<(Step, Step)>,
    on_pass: Step,
    on_refine: Step,
}

impl TransitionTable {
    pub fn standard() -> Self {
        Self {
            entry: Step::ExpandQuery,
            edges: vec![
                (Step::ExpandQuery, Step::RetrieveContext),
                (Step::RetrieveContext, Step::CraftResponse),
                (Step::CraftResponse, Step::ScoreGroundedness),
                (Step::ScoreGroundedness, Step::CheckPrecision),
                (Step::RefineQuery, Step::ExpandQuery),
            ],
            on_pass: Step::End,
            on_refine: Step::RefineQuery,
        }
    }

    pub fn entry(&self) -> Step {
        self.entry
    }

    fn next(&self, step: Step, decision: Option<Decision>) -> Step {
        if step == Step::CheckPrecision {
            // a missing decision routes to the terminal state rather than loop
            return match decision {
                Some(Decision::RefineQuery) => self.on_refine,
                _ => self.on_pass,
            };
        }

        self.edges
            .iter()
            .find(|(from, _)| *from == step)
            .map(|(_, to)| *to)
            .unwrap_or(Step::End)
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowSettings {
    pub loop_max_iter: u32,
    pub top_k: usize,
    pub groundedness_threshold: f32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            loop_max_iter: 3,
            top_k: 3,
            groundedness_threshold: GROUNDEDNESS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The precision check produced a terminal decision.
    Completed,
    /// The step budget ran out without a terminal decision.
    GuardTripped,
}

#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub state: WorkflowState,
    pub termination: Termination,
    pub precision_checks: u32,
}

impl WorkflowOutcome {
    pub fn response(&self) -> &str {
        &self.state.response
    }

    pub fn refinements(&self) -> u32 {
        self.state.loop_count
    }
}

pub struct QueryWorkflow<E, V, L, S>
where
    E: Embedder,
    V: VectorIndex,
    L: LanguageModel,
    S: GroundednessScorer,
{
    embedder: E,
    index: V,
    model: L,
    scorer: S,
    settings: WorkflowSettings,
    table: TransitionTable,
}

impl<E, V, L, S> QueryWorkflow<E, V, L, S>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
    L: LanguageModel + Send + Sync,
    S: GroundednessScorer + Send + Sync,
{
    pub fn new(embedder: E, index: V, model: L, scorer: S, settings: WorkflowSettings) -> Self {
        Self {
            embedder,
            index,
            model,
            scorer,
            settings,
            table: TransitionTable::standard(),
        }
    }

    pub async fn answer(&self, query: &str) -> Result<WorkflowOutcome, WorkflowError> {
        self.answer_observed(query, |_, _| {}).await
    }

    /// Runs the workflow, invoking `observer` after every executed step so
    /// callers can surface intermediate state while iteration is underway.
    pub async fn answer_observed(
        &self,
        query: &str,
        mut observer: impl FnMut(Step, &WorkflowState),
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if query.trim().is_empty() {
            return Err(WorkflowError::EmptyQuery);
        }

        let mut state = WorkflowState::new(query, self.settings.loop_max_iter);
        let mut step = self.table.entry();
        let mut precision_checks = 0u32;

        for _ in 0..self.step_budget() {
            if step == Step::End {
                return Ok(WorkflowOutcome {
                    state,
                    termination: Termination::Completed,
                    precision_checks,
                });
            }

            debug!(step = step.name(), loop_count = state.loop_count, "running step");
            self.run_step(step, &mut state).await?;
            if step == Step::CheckPrecision {
                precision_checks += 1;
            }
            observer(step, &state);

            step = self.table.next(step, state.decision);
        }

        // Nontermination guard: the budget covers every legal traversal of
        // the table, so landing here means the topology is broken. Report a
        // synthesized terminal outcome instead of hanging.
        warn!(
            query = state.query,
            loop_count = state.loop_count,
            "step budget exhausted without a terminal decision"
        );
        state.response = UNEXPECTED_TERMINATION_TEXT.to_string();
        Ok(WorkflowOutcome {
            state,
            termination: Termination::GuardTripped,
            precision_checks,
        })
    }

    /// Upper bound on executed steps: five per full pass plus one refine
    /// edge per allowed iteration, with one slot of slack for the final
    /// transition into `End`.
    fn step_budget(&self) -> u64 {
        (u64::from(self.settings.loop_max_iter) + 1) * 6 + 1
    }

    async fn run_step(&self, step: Step, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        match step {
            Step::ExpandQuery => self.expand_query(state),
            Step::RetrieveContext => self.retrieve_context(state).await?,
            Step::CraftResponse => self.craft_response(state).await?,
            Step::ScoreGroundedness => self.score_groundedness(state).await,
            Step::CheckPrecision => self.check_precision(state),
            Step::RefineQuery => self.refine_query(state),
            Step::End => {}
        }
        Ok(())
    }

    /// Deterministic textual augmentation. On re-entry after a refinement
    /// the working query already carries its refinement suffixes and is
    /// left untouched.
    fn expand_query(&self, state: &mut WorkflowState) {
        if state.expanded_query.is_empty() {
            state.expanded_query = format!("{} {}", state.query, EXPANSION_HINT);
        }
    }

    /// Embeds the working query and pulls the nearest passages. An empty
    /// result is a valid (if weak) signal; only index failures propagate.
    async fn retrieve_context(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let query_vector = self.embedder.embed(&state.expanded_query);
        let passages = self
            .index
            .search(&query_vector, self.settings.top_k)
            .await?;

        if passages.is_empty() {
            debug!("retrieval returned no passages; continuing with empty context");
        }
        state.context = passages;
        Ok(())
    }

    async fn craft_response(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let prompt = build_prompt(&state.context, &state.expanded_query);
        state.response = self.model.complete(&prompt).await?;
        Ok(())
    }

    /// Scorer failures degrade to a conservative score instead of aborting
    /// the query.
    async fn score_groundedness(&self, state: &mut WorkflowState) {
        let score = match self.scorer.score(&state.response, &state.context).await {
            Ok(score) => score.clamp(0.0, 1.0),
            Err(error) => {
                warn!(%error, "scoring failed; falling back to conservative score");
                CONSERVATIVE_SCORE
            }
        };
        state.groundedness_score = Some(score);
    }

    /// Routing rule. The cap comparison reads the current `loop_count`,
    /// which only `refine_query` increments: once the cap is reached the
    /// decision is Pass no matter the score, which bounds the loop even
    /// for `loop_max_iter = 0`.
    fn check_precision(&self, state: &mut WorkflowState) {
        let score = state.groundedness_score.unwrap_or(CONSERVATIVE_SCORE);
        let decision = if state.loop_count >= state.loop_max_iter {
            Decision::Pass
        } else if score >= self.settings.groundedness_threshold {
            Decision::Pass
        } else {
            Decision::RefineQuery
        };
        state.decision = Some(decision);
    }

    fn refine_query(&self, state: &mut WorkflowState) {
        state.expanded_query = format!("{} {}", state.expanded_query, REFINEMENT_MARKER);
        state.loop_count += 1;
        state.decision = None;
    }
}

fn build_prompt(context: &[RetrievedPassage], expanded_query: &str) -> String {
    let joined = context
        .iter()
        .map(|passage| passage.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("Context:\n{joined}\n\nQuestion: {expanded_query}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashedTrigramEmbedder;
    use crate::error::{IndexError, LlmError, ScoringError};
    use crate::index::{FlatIndex, VectorIndex};
    use crate::llm::LanguageModel;
    use crate::models::DocChunk;
    use crate::scoring::{FixedScorer, GroundednessScorer};
    use async_trait::async_trait;

    struct FakeIndex {
        passages: Vec<RetrievedPassage>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn add_chunks(
            &self,
            _chunks: &[DocChunk],
            _embeddings: &[Vec<f32>],
        ) -> Result<(), IndexError> {
            Ok(())
        }

        async fn search(
            &self,
            _query_vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<RetrievedPassage>, IndexError> {
            Ok(self.passages.iter().take(top_k).cloned().collect())
        }
    }

    struct FakeModel;

    #[async_trait]
    impl LanguageModel for FakeModel {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            Ok(format!("answer derived from {} chars of prompt", prompt.len()))
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl GroundednessScorer for FailingScorer {
        async fn score(
            &self,
            _response: &str,
            _context: &[RetrievedPassage],
        ) -> Result<f32, ScoringError> {
            Err(ScoringError::Backend("scoring model unavailable".to_string()))
        }
    }

    fn passage(text: &str) -> RetrievedPassage {
        RetrievedPassage {
            chunk_id: "chunk-1".to_string(),
            source_path: "/tmp/doc.pdf".to_string(),
            text: text.to_string(),
            score: 0.9,
        }
    }

    fn workflow_with(
        passages: Vec<RetrievedPassage>,
        score: f32,
        loop_max_iter: u32,
    ) -> QueryWorkflow<HashedTrigramEmbedder, FakeIndex, FakeModel, FixedScorer> {
        QueryWorkflow::new(
            HashedTrigramEmbedder::default(),
            FakeIndex { passages },
            FakeModel,
            FixedScorer(score),
            WorkflowSettings {
                loop_max_iter,
                ..WorkflowSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn grounded_response_passes_after_one_iteration() {
        let workflow = workflow_with(
            vec![passage("salmon, mackerel and fortified milk are rich in vitamin D")],
            0.85,
            3,
        );

        let outcome = workflow
            .answer("What are the vitamin D rich foods?")
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.precision_checks, 1);
        assert_eq!(outcome.refinements(), 0);
        assert_eq!(outcome.state.decision, Some(Decision::Pass));
        assert!(!outcome.response().is_empty());
    }

    #[tokio::test]
    async fn low_score_exhausts_the_cap_then_passes_forced() {
        let workflow = workflow_with(vec![passage("irrelevant passage")], 0.5, 2);

        let outcome = workflow
            .answer("What are the vitamin D rich foods?")
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.refinements(), 2);
        assert_eq!(outcome.precision_checks, 3);
        assert_eq!(outcome.state.decision, Some(Decision::Pass));

        let marker_count = outcome
            .state
            .expanded_query
            .matches(REFINEMENT_MARKER)
            .count();
        assert_eq!(marker_count, 2);
    }

    #[tokio::test]
    async fn precision_checks_never_exceed_cap_plus_one() {
        for cap in 0..5 {
            let workflow = workflow_with(Vec::new(), 0.0, cap);
            let outcome = workflow.answer("bounded?").await.unwrap();
            assert_eq!(outcome.termination, Termination::Completed);
            assert!(outcome.precision_checks <= cap + 1);
            assert_eq!(outcome.refinements(), cap);
        }
    }

    #[tokio::test]
    async fn zero_cap_decides_on_the_first_check() {
        let workflow = workflow_with(vec![passage("anything")], 0.1, 0);
        let outcome = workflow.answer("no refinements allowed").await.unwrap();

        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.precision_checks, 1);
        assert_eq!(outcome.refinements(), 0);
        assert_eq!(outcome.state.decision, Some(Decision::Pass));
    }

    #[tokio::test]
    async fn expanded_query_accumulates_markers_in_order() {
        let workflow = workflow_with(Vec::new(), 0.2, 3);
        let outcome = workflow.answer("original question").await.unwrap();

        let expected = format!(
            "original question {EXPANSION_HINT} {REFINEMENT_MARKER} {REFINEMENT_MARKER} {REFINEMENT_MARKER}"
        );
        assert_eq!(outcome.state.expanded_query, expected);
        assert_eq!(outcome.state.query, "original question");
    }

    #[tokio::test]
    async fn empty_index_still_generates_a_response() {
        let embedder = HashedTrigramEmbedder::default();
        let index = FlatIndex::new(embedder.id(), embedder.dimensions());
        let workflow = QueryWorkflow::new(
            embedder,
            index,
            FakeModel,
            FixedScorer(0.85),
            WorkflowSettings::default(),
        );

        let outcome = workflow.answer("query against nothing").await.unwrap();
        assert!(outcome.state.context.is_empty());
        assert!(!outcome.response().is_empty());
        assert_eq!(outcome.termination, Termination::Completed);
    }

    #[tokio::test]
    async fn scorer_failure_degrades_to_conservative_score() {
        let workflow = QueryWorkflow::new(
            HashedTrigramEmbedder::default(),
            FakeIndex {
                passages: vec![passage("context text")],
            },
            FakeModel,
            FailingScorer,
            WorkflowSettings {
                loop_max_iter: 1,
                ..WorkflowSettings::default()
            },
        );

        let outcome = workflow.answer("does it survive?").await.unwrap();
        // conservative score forces the full refinement budget to be spent
        assert_eq!(outcome.refinements(), 1);
        assert_eq!(outcome.state.groundedness_score, Some(CONSERVATIVE_SCORE));
        assert_eq!(outcome.termination, Termination::Completed);
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_any_step() {
        let workflow = workflow_with(Vec::new(), 0.9, 3);
        let result = workflow.answer("   ").await;
        assert!(matches!(result, Err(WorkflowError::EmptyQuery)));
    }

    #[tokio::test]
    async fn observer_sees_every_executed_step() {
        let workflow = workflow_with(vec![passage("grounded")], 0.9, 3);
        let mut seen = Vec::new();
        workflow
            .answer_observed("observed run", |step, _state| seen.push(step))
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                Step::ExpandQuery,
                Step::RetrieveContext,
                Step::CraftResponse,
                Step::ScoreGroundedness,
                Step::CheckPrecision,
            ]
        );
    }

    #[tokio::test]
    async fn broken_topology_trips_the_guard() {
        // a table whose pass edge loops back instead of terminating
        let mut workflow = workflow_with(vec![passage("text")], 0.9, 1);
        workflow.table = TransitionTable {
            entry: Step::ExpandQuery,
            edges: vec![
                (Step::ExpandQuery, Step::RetrieveContext),
                (Step::RetrieveContext, Step::CraftResponse),
                (Step::CraftResponse, Step::ScoreGroundedness),
                (Step::ScoreGroundedness, Step::CheckPrecision),
                (Step::RefineQuery, Step::ExpandQuery),
            ],
            on_pass: Step::ExpandQuery,
            on_refine: Step::RefineQuery,
        };

        let outcome = workflow.answer("never ends").await.unwrap();
        assert_eq!(outcome.termination, Termination::GuardTripped);
        assert_eq!(outcome.response(), "Workflow terminated unexpectedly");
    }

    #[test]
    fn standard_table_routes_decisions() {
        let table = TransitionTable::standard();
        assert_eq!(table.entry(), Step::ExpandQuery);
        assert_eq!(
            table.next(Step::CheckPrecision, Some(Decision::Pass)),
            Step::End
        );
        assert_eq!(
            table.next(Step::CheckPrecision, Some(Decision::RefineQuery)),
            Step::RefineQuery
        );
        assert_eq!(table.next(Step::CheckPrecision, None), Step::End);
        assert_eq!(table.next(Step::RefineQuery, None), Step::ExpandQuery);
    }
}
