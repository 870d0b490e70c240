//! Turn orchestrator
//!
//! RESOLVE → PLAN → EXECUTE → COMPUTE → AGGREGATE → VALIDATE
//!
//! One `run` answers one conversational turn. Memory comes in from the
//! caller and goes back out on the returned state.

use crate::aggregation::Aggregator;
use crate::config::Settings;
use crate::dataset::Document;
use crate::embeddings::{Embedder, GeminiEmbedder, HashingEmbedder};
use crate::execution::{apply_compute_step, ExecutionConfig, ExecutionEngine};
use crate::gemini::GeminiClient;
use crate::llm::{null_model, LanguageModel};
use crate::memory::{merge_memory, MemoryResolver};
use crate::models::{ExecutionState, MemorySlots};
use crate::planner::{GenerativePlanner, Planner};
use crate::retrieval::{build_doc_chunks, EvidenceRetriever, HybridIndex, InMemoryDenseStore};
use crate::verification::Validator;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Model and embedder chosen from settings
#[derive(Clone)]
pub struct Backends {
    pub model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
}

impl Backends {
    /// Gemini for both when a key is configured, deterministic local
    /// fallbacks otherwise
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match &settings.gemini_api_key {
            Some(key) => {
                let client = GeminiClient::new(key.clone(), &settings.gemini_base_url, &settings.gen_model)?;
                let embed_client = client.with_model(&settings.embed_model);
                info!(model = %settings.gen_model, embed_model = %settings.embed_model, "Using Gemini backend");
                Ok(Self {
                    model: Arc::new(client),
                    embedder: Arc::new(GeminiEmbedder::new(embed_client)),
                })
            }
            None => {
                info!("No GEMINI_API_KEY; using deterministic fallbacks");
                Ok(Self::offline())
            }
        }
    }

    pub fn offline() -> Self {
        Self {
            model: null_model(),
            embedder: Arc::new(HashingEmbedder::default()),
        }
    }
}

/// Build the evidence index for one document
pub async fn index_document(
    collection: &str,
    doc: &Document,
    embedder: Arc<dyn Embedder>,
) -> Result<HybridIndex> {
    let chunks = build_doc_chunks(&doc.pre_text, &doc.post_text, &doc.cells());
    HybridIndex::build(
        collection,
        chunks,
        None,
        embedder,
        Box::new(InMemoryDenseStore::new(collection)),
    )
    .await
}

pub struct Orchestrator {
    resolver: MemoryResolver,
    planner: Box<dyn Planner>,
    engine: ExecutionEngine,
    aggregator: Aggregator,
    validator: Validator,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn EvidenceRetriever>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            resolver: MemoryResolver::new(model.clone()),
            planner: Box::new(GenerativePlanner::new(model.clone())),
            engine: ExecutionEngine::new(retriever, model.clone(), config),
            aggregator: Aggregator::new(model.clone()),
            validator: Validator::new(model),
        }
    }

    pub fn with_planner(mut self, planner: Box<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    /// Answer one turn. Never fails; degraded steps are visible in the
    /// returned logs.
    pub async fn run(&self, question: &str, memory: MemorySlots) -> ExecutionState {
        let start_time = Instant::now();
        let mut state = ExecutionState::new(question, memory);

        info!(turn_id = %state.turn_id, "Starting turn");

        // -------------------------------------------------
        // 1. Resolve references against memory
        // -------------------------------------------------
        let (rewritten, updates) = self.resolver.resolve(&state.question, &state.memory).await;
        state.log(format!("Resolver: rewritten question: {}", rewritten));
        state.memory = merge_memory(&state.memory, &updates);
        state.query = rewritten;

        // -------------------------------------------------
        // 2. Plan
        // -------------------------------------------------
        let graph = self.planner.plan(&state.query).await;
        state.plan = graph.ordered_nodes();
        state.log(format!(
            "Planner: {} nodes; max depth={}",
            graph.len(),
            graph.max_depth()
        ));
        debug!(nodes = graph.len(), max_depth = graph.max_depth(), "Plan ready");

        // -------------------------------------------------
        // 3. Execute depth by depth, then the exact change override
        // -------------------------------------------------
        self.engine.execute(&graph, &mut state).await;
        apply_compute_step(&graph, &mut state);

        // -------------------------------------------------
        // 4. Synthesize and validate
        // -------------------------------------------------
        let mut final_answer = self.aggregator.aggregate(&state.query, &state.answers).await;
        state.log("Final: synthesized.");

        let validation = self
            .validator
            .validate(&state.query, &final_answer, &state.answers, &state.retrieved)
            .await;

        match validation.correction() {
            Some(corrected) => {
                state.log("Validator: corrected final answer applied.");
                final_answer = corrected.to_string();
            }
            None => state.log(format!("Validator: {}, answer kept.", validation.verdict)),
        }

        state.final_answer = Some(final_answer);
        state.validation = Some(validation);
        state.execution_time_ms = start_time.elapsed().as_millis() as u64;

        info!(
            turn_id = %state.turn_id,
            answered = state.answers.len(),
            complete = state.is_complete(),
            execution_time_ms = state.execution_time_ms,
            "Turn completed"
        );

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::parse_records;
    use crate::models::Verdict;
    use crate::planner::HeuristicPlanner;
    use crate::testing::{ScriptedModel, StaticRetriever};

    const QUESTION: &str = "What was the revenue change from 2019 to 2020?";

    const PLAN: &str = r#"{"nodes": [
        {"id": "1.1", "text": "Identify the company and years", "depth": 1, "depends_on": []},
        {"id": "2.1", "text": "Revenue in 2020", "depth": 2, "depends_on": ["1.1"]},
        {"id": "2.2", "text": "Revenue in 2019", "depth": 2, "depends_on": ["1.1"]},
        {"id": "3.1", "text": "Change in revenue", "depth": 3, "depends_on": ["2.1", "2.2"]}
    ]}"#;

    fn document() -> Document {
        let records = parse_records(
            r#"[{
                "id": "acme-1",
                "doc": {
                    "pre_text": "Acme Corp designs and sells industrial equipment worldwide.",
                    "post_text": "",
                    "table": {"2020": {"Revenue": 100}, "2019": {"Revenue": 80}}
                },
                "dialogue": {"conv_questions": ["What was the revenue change from 2019 to 2020?"]}
            }]"#,
        )
        .unwrap();
        records[0].doc.clone()
    }

    fn scripted(validator_reply: &str) -> ScriptedModel {
        ScriptedModel::new()
            .reply("decompose", PLAN)
            .reply("subquery: identify", "Acme Corp, fiscal 2019 and 2020")
            .reply("subquery: revenue in 2020", "100")
            .reply("subquery: revenue in 2019", "80")
            .reply("subquery: change in revenue", "about twenty")
            .reply("proposed answer", validator_reply)
            .reply("solved subqueries", "Revenue grew by 20 (25.00%).")
    }

    async fn orchestrator(model: Arc<dyn LanguageModel>) -> Orchestrator {
        let index = index_document("acme-1", &document(), Arc::new(HashingEmbedder::default()))
            .await
            .unwrap();
        Orchestrator::new(model, Arc::new(index), ExecutionConfig::default())
    }

    #[tokio::test]
    async fn test_revenue_change_end_to_end() {
        let model = scripted(r#"{"verdict": "pass", "corrected": "", "confidence": 0.8, "rationale": "ok"}"#);
        let state = orchestrator(Arc::new(model)).await.run(QUESTION, MemorySlots::new()).await;

        assert!(state.is_complete());
        assert_eq!(state.answers["2.1"], "100");
        assert_eq!(state.answers["2.2"], "80");
        assert_eq!(state.answers["3.1"], "20 (25.00%)");
        assert!(state.retrieved["2.1"].iter().any(|s| s == "Revenue | 2020 | 100"));
        assert_eq!(state.final_answer.as_deref(), Some("Revenue grew by 20 (25.00%)."));
        assert_eq!(state.memory["entity"], "Acme Corp");
        assert_eq!(state.memory["period"], "2019");
        assert!(state.logs.iter().any(|l| l == "Compute: 3.1 = 20 (25.00%)"));
    }

    #[tokio::test]
    async fn test_validator_correction_replaces_answer() {
        let model = scripted(r#"{"verdict": "fail", "corrected": "X", "confidence": 0.9, "rationale": "r"}"#);
        let state = orchestrator(Arc::new(model)).await.run(QUESTION, MemorySlots::new()).await;

        assert_eq!(state.final_answer.as_deref(), Some("X"));
        assert_eq!(state.validation.unwrap().verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn test_fail_without_correction_keeps_answer() {
        let model = scripted(r#"{"verdict": "fail", "corrected": "", "confidence": 0.4, "rationale": "r"}"#);
        let state = orchestrator(Arc::new(model)).await.run(QUESTION, MemorySlots::new()).await;

        assert_eq!(state.final_answer.as_deref(), Some("Revenue grew by 20 (25.00%)."));
    }

    #[tokio::test]
    async fn test_offline_turn_uses_fallbacks() {
        let state = orchestrator(null_model()).await.run(QUESTION, MemorySlots::new()).await;

        let ids: Vec<&str> = state.plan.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["1.1", "2.1", "3.1"]);
        assert!(state.is_complete());
        assert!(state.final_answer.unwrap().starts_with(&format!("{}\n\nSummary:\n1.1: ", QUESTION)));

        let validation = state.validation.unwrap();
        assert_eq!(validation.verdict, Verdict::Pass);
        assert_eq!(validation.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_memory_is_carried_and_not_erased() {
        let mut memory = MemorySlots::new();
        memory.insert("metric".into(), "revenue".into());

        let orchestrator = Orchestrator::new(
            null_model(),
            Arc::new(StaticRetriever::new(&[])),
            ExecutionConfig::default(),
        )
        .with_planner(Box::new(HeuristicPlanner));
        let state = orchestrator.run("And in 2019?", memory).await;

        assert_eq!(state.memory["metric"], "revenue");
        assert_eq!(state.query, "And in 2019?");
        assert_eq!(state.answers["1.1"], "N/A");
    }
}
