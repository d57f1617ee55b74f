//! # Retrieval pipeline
//!
//! One query runs through the same stages every time:
//!
//! ```text
//! embed -> search -> (chart | explanation) -> respond
//! ```
//!
//! 1. the query is embedded on the blocking pool;
//! 2. the `search_k` nearest corpus rows are fetched;
//! 3. a supported chart hint (`bar`, `line`, `pie`) selects the chart branch,
//!    anything else (including no hint) the explanation branch;
//! 4. the chart branch validates the model's reply and formats it, degrading to
//!    [`QueryResponse::NoChartData`] on malformed output; the explanation branch
//!    returns the trimmed reply untouched.
//!
//! The pipeline owns read-only state only, so one instance behind an `Arc`
//! serves any number of concurrent requests.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::api::{GenerativeClient, OpenAiBackend};
use crate::chart::{ChartKind, FormattedChart, format_chart, parse_chart_spec};
use crate::config::{RagConfig, default_system_prompt};
use crate::corpus::{Corpus, CorpusRecord};
use crate::embeddings::{EmbeddingProvider, EmbeddingSettings, MiniLmEmbedder};
use crate::error::{CorpusError, EmbeddingError, RagError};
use crate::prompt::{ChartRequestBuilder, SearchHit};
use crate::vector_store::VectorIndex;

/// Reply used when the model did not produce a usable chart.
pub const NO_CHART_DATA: &str = "No chart data generated.";

/// The three successful outcomes of a query.
///
/// Serializes to the chart document, the explanation string, or the
/// [`NO_CHART_DATA`] string respectively.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Chart(FormattedChart),
    Explanation(String),
    NoChartData,
}

impl QueryResponse {
    /// Text stored in the history log: charts as JSON, everything else verbatim.
    pub fn history_text(&self) -> Result<String, serde_json::Error> {
        match self {
            QueryResponse::Chart(chart) => serde_json::to_string(chart),
            QueryResponse::Explanation(text) => Ok(text.clone()),
            QueryResponse::NoChartData => Ok(NO_CHART_DATA.to_string()),
        }
    }
}

impl Serialize for QueryResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryResponse::Chart(chart) => chart.serialize(serializer),
            QueryResponse::Explanation(text) => serializer.serialize_str(text),
            QueryResponse::NoChartData => serializer.serialize_str(NO_CHART_DATA),
        }
    }
}

pub struct RetrievalPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: VectorIndex,
    records: Vec<CorpusRecord>,
    generator: GenerativeClient,
    prompts: ChartRequestBuilder,
    system_prompt: String,
    search_k: usize,
    deadline: Option<Duration>,
}

impl RetrievalPipeline {
    /// Index `corpus` and wire the collaborators together.
    ///
    /// Defaults: `search_k` 20, no deadline, the stock system prompt.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        corpus: Corpus,
        generator: GenerativeClient,
        prompts: ChartRequestBuilder,
    ) -> Result<Self, CorpusError> {
        let Corpus { matrix, records } = corpus;
        let index = VectorIndex::build(matrix)?;
        Ok(Self {
            embedder,
            index,
            records,
            generator,
            prompts,
            system_prompt: default_system_prompt(),
            search_k: 20,
            deadline: None,
        })
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_search_k(mut self, search_k: usize) -> Self {
        self.search_k = search_k;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Build the production pipeline: load the corpus, warm the embedding
    /// model and connect the OpenAI-compatible backend.
    ///
    /// Any failure here means the service must not start.
    pub fn from_config(config: &RagConfig) -> Result<Self, Box<dyn Error>> {
        let corpus = Corpus::load(&config.embeddings_path, &config.metadata_path)?;

        let embedder = MiniLmEmbedder::new(EmbeddingSettings::from(config));
        let dimension = embedder.warm_up()?;
        if dimension != corpus.matrix.dimension() {
            return Err(format!(
                "embedding model produces {dimension}-dimensional vectors but the corpus has {}",
                corpus.matrix.dimension()
            )
            .into());
        }

        let backend = OpenAiBackend::new(config)?;
        let generator = GenerativeClient::new(Arc::new(backend), config.retry_policy());
        let prompts = ChartRequestBuilder::from_config(config)?;

        let pipeline = Self::new(Arc::new(embedder), corpus, generator, prompts)?
            .with_system_prompt(config.system_prompt.clone())
            .with_search_k(config.search_k)
            .with_deadline(config.request_deadline());

        info!("Retrieval pipeline ready over {} records", pipeline.len());
        Ok(pipeline)
    }

    /// Number of searchable records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Answer `query`, as a chart when `chart_type` names a supported kind.
    ///
    /// # Errors
    /// - [`RagError::Embedding`] / [`RagError::Search`] when retrieval fails.
    /// - [`RagError::GenerationUnavailable`] when the model cannot be reached.
    /// - [`RagError::DeadlineExceeded`] when the configured deadline elapses.
    ///
    /// A reply that is not a valid chart is not an error; it yields
    /// [`QueryResponse::NoChartData`].
    pub async fn answer(
        &self,
        query: &str,
        chart_type: Option<&str>,
    ) -> Result<QueryResponse, RagError> {
        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, self.run(query, chart_type))
                .await
                .map_err(|_| RagError::DeadlineExceeded(limit))?,
            None => self.run(query, chart_type).await,
        }
    }

    async fn run(&self, query: &str, chart_type: Option<&str>) -> Result<QueryResponse, RagError> {
        debug!("Embedding query: {query:?}");
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| EmbeddingError::Inference(format!("embedding task failed: {e}")))??;

        let neighbors = self.index.search(&vector, self.search_k)?;
        let hits: Vec<SearchHit<'_>> = neighbors
            .iter()
            .filter_map(|n| {
                self.records.get(n.row).map(|record| SearchHit {
                    record,
                    distance: n.distance,
                })
            })
            .collect();
        debug!("Retrieved {} hits", hits.len());

        match chart_type.and_then(ChartKind::from_hint) {
            Some(kind) => self.chart(query, kind, &hits).await,
            None => {
                debug!("No supported chart type in {chart_type:?}, generating an explanation");
                self.explain(query, &hits).await
            }
        }
    }

    async fn chart(
        &self,
        query: &str,
        kind: ChartKind,
        hits: &[SearchHit<'_>],
    ) -> Result<QueryResponse, RagError> {
        let prompt = self.prompts.chart_prompt(query, kind, hits);
        let raw = self.generator.complete(&prompt, &self.system_prompt).await?;
        debug!("Raw response content: {raw}");

        match parse_chart_spec(&raw) {
            Ok(spec) => {
                if spec.kind() != kind {
                    warn!("Requested a {kind} chart, model produced {}", spec.kind());
                }
                Ok(QueryResponse::Chart(format_chart(&spec)))
            }
            Err(malformed) => {
                warn!("{malformed}");
                Ok(QueryResponse::NoChartData)
            }
        }
    }

    async fn explain(&self, query: &str, hits: &[SearchHit<'_>]) -> Result<QueryResponse, RagError> {
        let prompt = self.prompts.explanation_prompt(query, hits);
        let raw = self.generator.complete(&prompt, &self.system_prompt).await?;
        Ok(QueryResponse::Explanation(raw.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RetryPolicy;
    use crate::corpus::EmbeddingMatrix;
    use crate::error::BackendError;
    use crate::testing::{BrokenEmbedder, HashEmbedder, RecordingClock, ScriptedBackend};
    use serde_json::json;

    const TEXTS: [&str; 5] = [
        "robbery downtown",
        "burglary uptown",
        "theft at the station",
        "assault downtown",
        "vandalism in the park",
    ];

    fn corpus(embedder: &dyn EmbeddingProvider) -> Corpus {
        let rows = TEXTS.iter().map(|t| embedder.embed(t).unwrap()).collect();
        let records = TEXTS.iter().map(|t| json!({"description": t})).collect();
        Corpus::new(EmbeddingMatrix::from_rows(rows).unwrap(), records).unwrap()
    }

    fn pipeline_with(
        embedder: Arc<dyn EmbeddingProvider>,
        backend: Arc<ScriptedBackend>,
    ) -> RetrievalPipeline {
        let corpus = corpus(&HashEmbedder::new(16));
        let generator = GenerativeClient::with_clock(
            backend,
            Arc::new(RecordingClock::default()),
            RetryPolicy::default(),
        );
        RetrievalPipeline::new(embedder, corpus, generator, ChartRequestBuilder::new(20, 5))
            .unwrap()
    }

    fn pipeline(backend: Arc<ScriptedBackend>) -> RetrievalPipeline {
        pipeline_with(Arc::new(HashEmbedder::new(16)), backend)
    }

    #[tokio::test]
    async fn test_pie_chart_end_to_end() {
        let backend = Arc::new(ScriptedBackend::always(Ok(
            r#"{"type":"pie","labels":["A","B"],"values":[3,7]}"#.to_string(),
        )));
        let pipeline = pipeline(backend.clone());

        let response = pipeline
            .answer("robbery downtown", Some("pie"))
            .await
            .unwrap();

        let document = serde_json::to_value(&response).unwrap();
        assert_eq!(document["chart"]["type"], "pie");
        assert_eq!(
            document["series"][0]["data"],
            json!([{"name": "A", "y": 3}, {"name": "B", "y": 7}])
        );

        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("robbery downtown"));
        assert!(prompts[0].contains("Respond with JSON only."));
        // exact match comes first, at distance zero
        let first = prompts[0].find("\"robbery downtown\"\n").unwrap();
        let second = prompts[0].find("\"burglary uptown\"").unwrap();
        assert!(first < second);
        assert!(prompts[0].contains("\"distance\": 0.0"));
    }

    #[tokio::test]
    async fn test_non_json_reply_yields_sentinel() {
        let backend = Arc::new(ScriptedBackend::always(Ok(
            "Sure! Here is a pie chart of robberies.".to_string(),
        )));
        let pipeline = pipeline(backend.clone());

        let response = pipeline
            .answer("robbery downtown", Some("pie"))
            .await
            .unwrap();

        assert_eq!(response, QueryResponse::NoChartData);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!("No chart data generated.")
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_chart_type_explains() {
        let backend = Arc::new(ScriptedBackend::always(Ok(
            "  Robberies cluster downtown.\n".to_string(),
        )));
        let pipeline = pipeline(backend.clone());

        let response = pipeline
            .answer("robbery downtown", Some("scatter"))
            .await
            .unwrap();

        assert_eq!(
            response,
            QueryResponse::Explanation("Robberies cluster downtown.".to_string())
        );
        let prompt = &backend.prompts()[0];
        assert!(prompt.contains("Respond with the explanation only."));
        assert!(!prompt.contains("JSON"));
        assert_eq!(prompt.matches("Data: {").count(), 5);
    }

    #[tokio::test]
    async fn test_explanation_reply_is_never_parsed() {
        let reply = r#"{"type":"pie","labels":["A"],"values":[1]}"#;
        let backend = Arc::new(ScriptedBackend::always(Ok(reply.to_string())));
        let pipeline = pipeline(backend);

        let response = pipeline.answer("robbery downtown", None).await.unwrap();

        assert_eq!(response, QueryResponse::Explanation(reply.to_string()));
        assert_eq!(serde_json::to_value(&response).unwrap(), json!(reply));
    }

    #[tokio::test]
    async fn test_chart_hint_is_case_insensitive() {
        let backend = Arc::new(ScriptedBackend::always(Ok(
            r#"{"type":"bar","labels":["Mon"],"values":[2]}"#.to_string(),
        )));
        let pipeline = pipeline(backend);

        let response = pipeline.answer("theft", Some(" Bar ")).await.unwrap();

        assert!(matches!(response, QueryResponse::Chart(_)));
    }

    #[tokio::test]
    async fn test_chart_follows_model_type() {
        let backend = Arc::new(ScriptedBackend::always(Ok(
            r#"{"type":"pie","labels":["A"],"values":[1]}"#.to_string(),
        )));
        let pipeline = pipeline(backend);

        let response = pipeline.answer("theft", Some("line")).await.unwrap();

        let document = serde_json::to_value(&response).unwrap();
        assert_eq!(document["chart"]["type"], "pie");
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let backend = Arc::new(ScriptedBackend::always(Ok("unused".to_string())));
        let pipeline = pipeline_with(Arc::new(BrokenEmbedder), backend.clone());

        let err = pipeline.answer("robbery", Some("pie")).await.unwrap_err();

        assert!(matches!(err, RagError::Embedding(EmbeddingError::Load(_))));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_search_error() {
        let backend = Arc::new(ScriptedBackend::always(Ok("unused".to_string())));
        let pipeline = pipeline_with(Arc::new(HashEmbedder::new(8)), backend);

        let err = pipeline.answer("robbery", None).await.unwrap_err();

        assert!(matches!(err, RagError::Search(_)));
    }

    #[tokio::test]
    async fn test_generation_unavailable_surfaces() {
        let backend = Arc::new(ScriptedBackend::always(Err(BackendError::Api(
            "overloaded".into(),
        ))));
        let pipeline = pipeline(backend.clone());

        let err = pipeline.answer("robbery", Some("pie")).await.unwrap_err();

        assert!(matches!(
            err,
            RagError::GenerationUnavailable { attempts: 3, .. }
        ));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_deadline_aborts_request() {
        let backend = Arc::new(ScriptedBackend::hanging());
        let pipeline = pipeline(backend).with_deadline(Some(Duration::from_millis(50)));

        let err = pipeline.answer("robbery", Some("pie")).await.unwrap_err();

        assert!(matches!(err, RagError::DeadlineExceeded(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_search_k_bounds_context() {
        let backend = Arc::new(ScriptedBackend::always(Ok("text".to_string())));
        let pipeline = pipeline(backend.clone()).with_search_k(2);

        pipeline.answer("robbery", None).await.unwrap();

        assert_eq!(backend.prompts()[0].matches("Data: {").count(), 2);
    }

    #[test]
    fn test_history_text() {
        let chart = crate::chart::parse_chart_spec(r#"{"type":"pie","labels":["A"],"values":[1]}"#)
            .map(|spec| format_chart(&spec))
            .unwrap();
        let stored = QueryResponse::Chart(chart.clone()).history_text().unwrap();
        assert_eq!(serde_json::from_str::<FormattedChart>(&stored).unwrap(), chart);

        assert_eq!(
            QueryResponse::Explanation("plain".into()).history_text().unwrap(),
            "plain"
        );
        assert_eq!(
            QueryResponse::NoChartData.history_text().unwrap(),
            NO_CHART_DATA
        );
    }
}
