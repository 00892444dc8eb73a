//! The pipeline composer (§4.6, C6): wires loader → embedder → retriever →
//! reranker → LLM plugins, resolved from a [`Registry`], into the
//! canonical `ingest`/`query` operations and their streaming variants.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::config::PipelineConfig;
use crate::engine::DagEngine;
use crate::error::{EngineError, Result};
use crate::node::{NodeInput, NodeOptions};
use crate::plugins::{Chunk, Document, EmbeddedChunk, Embedder, Llm, Loader, Reranker, Retriever};
use crate::registry::{PluginInstance, Registry, Stage};
use crate::reranker::LexicalReranker;
use crate::scheduler::{ExecuteOptions, ReturnFormat};
use crate::streaming::{CancellationToken, IngestEvent, ProgressEvent, QueryEvent};

/// §4.6's enumerated options, unified per §9's "Graceful degradation vs.
/// continue-on-error" note: each flag is its own explicit field rather
/// than an ad hoc options bag.
#[derive(Clone, Default)]
pub struct PipelineOptions {
    pub use_reranker: bool,
    pub use_parallel_processing: bool,
    pub use_streaming_safeguards: bool,
    pub use_logging: bool,
    pub use_retry: bool,
    pub on_progress: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl std::fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("use_reranker", &self.use_reranker)
            .field("use_parallel_processing", &self.use_parallel_processing)
            .field("use_streaming_safeguards", &self.use_streaming_safeguards)
            .field("use_logging", &self.use_logging)
            .field("use_retry", &self.use_retry)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// A composed, ready-to-run RAG pipeline (§4.6 `createRagPipeline`).
pub struct RagPipeline {
    config: PipelineConfig,
    options: PipelineOptions,
    loader: Arc<dyn Loader>,
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn Retriever>,
    reranker: Option<Arc<dyn Reranker>>,
    llm: Arc<dyn Llm>,
}

impl RagPipeline {
    /// Resolves every stage plugin named in `config.pipeline` from
    /// `registry` up front, so a missing plugin fails at construction
    /// rather than partway through an `ingest`/`query` call.
    pub fn new(registry: &Registry, config: PipelineConfig, options: PipelineOptions) -> Result<Self> {
        let loader = resolve(registry, &config, Stage::Loader)?
            .as_loader()
            .expect("resolve guarantees matching stage variant");
        let embedder = resolve(registry, &config, Stage::Embedder)?
            .as_embedder()
            .expect("resolve guarantees matching stage variant");
        let retriever = resolve(registry, &config, Stage::Retriever)?
            .as_retriever()
            .expect("resolve guarantees matching stage variant");
        let llm = resolve(registry, &config, Stage::Llm)?
            .as_llm()
            .expect("resolve guarantees matching stage variant");

        let reranker: Option<Arc<dyn Reranker>> = if options.use_reranker {
            match config.plugin_for_stage("reranker") {
                Some(name) => Some(
                    registry
                        .get(Stage::Reranker, name)?
                        .as_reranker()
                        .expect("resolve guarantees matching stage variant"),
                ),
                None => Some(Arc::new(LexicalReranker)),
            }
        } else {
            None
        };

        Ok(Self {
            config,
            options,
            loader,
            embedder,
            retriever,
            reranker,
            llm,
        })
    }

    /// `useParallelProcessing`: §4.6 calls for ingest to "express itself as
    /// a DAG so independent chunks can embed concurrently" rather than just
    /// happening to run concurrently — so this builds one source node per
    /// chunk (no edges between them, since each chunk embeds independently)
    /// and drives it through the same `DagEngine`/scheduler every other
    /// node graph in this crate runs through, bounded by the env-configured
    /// embedder batch size.
    async fn embed_chunks_concurrently(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let concurrency = crate::env::embedder_batch_size().max(1);
        let use_retry = self.options.use_retry;

        let mut engine: DagEngine<EmbeddedChunk> = DagEngine::new();
        let ids: Vec<String> = (0..chunks.len()).map(|i| format!("chunk-{i}")).collect();
        for (id, chunk) in ids.iter().cloned().zip(chunks) {
            let embedder = self.embedder.clone();
            engine.add_node(
                id,
                Arc::new(move |_: NodeInput<EmbeddedChunk>| {
                    let embedder = embedder.clone();
                    let chunk = chunk.clone();
                    Box::pin(async move {
                        let vector = if use_retry {
                            let content = chunk.content.clone();
                            let (result, _) = crate::retry::try_retry_with_backoff(
                                2,
                                jittered_delay(),
                                |_| {
                                    let embedder = embedder.clone();
                                    let content = content.clone();
                                    async move { embedder.embed(&[content]).await.map(|mut v| v.remove(0)) }
                                },
                            )
                            .await;
                            result?
                        } else {
                            embedder.embed(&[chunk.content.clone()]).await?.remove(0)
                        };
                        Ok(EmbeddedChunk { chunk, vector })
                    })
                }),
                NodeOptions::default(),
            )?;
        }

        let opts = ExecuteOptions {
            concurrency: Some(concurrency),
            return_format: ReturnFormat::Multi,
            ..ExecuteOptions::default()
        };
        // The seed is never read: every node is a source that embeds the
        // chunk it captured, ignoring whatever input it's handed.
        let seed = EmbeddedChunk {
            chunk: Chunk {
                id: String::new(),
                document_id: String::new(),
                content: String::new(),
            },
            vector: Vec::new(),
        };
        // `ReturnFormat::Multi` forces `ExecutionResult::Multi` regardless
        // of how many chunks succeeded (§4.4 shaping rule).
        let multi = match engine.execute(seed, opts).await? {
            crate::engine::ExecutionResult::Multi(m) => m,
            crate::engine::ExecutionResult::Single(_) => unreachable!("return_format: Multi always shapes Multi"),
        };

        if let Some(err) = multi.errors.into_values().next() {
            return Err(err);
        }

        ids.iter()
            .map(|id| {
                multi
                    .sinks
                    .get(id)
                    .cloned()
                    .ok_or_else(|| EngineError::unknown_node(id.clone()))
            })
            .collect()
    }

    /// `useRetry`: wrap the batched embed call with the shared retry
    /// primitive (§4.9) rather than failing ingest on the first transient
    /// embedder error.
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.options.use_retry {
            return self.embedder.embed(texts).await;
        }
        let embedder = self.embedder.clone();
        let texts = texts.to_vec();
        let (result, _attempts) = crate::retry::try_retry_with_backoff(
            2,
            jittered_delay(),
            |_| {
                let embedder = embedder.clone();
                let texts = texts.clone();
                async move { embedder.embed(&texts).await }
            },
        )
        .await;
        result
    }

    fn emit(&self, stage: crate::streaming::Stage, message: impl Into<String>) {
        tracing::info!(stage = %stage, namespace = %self.config.namespace, "{}", message.into());
        if let Some(cb) = &self.options.on_progress {
            cb(ProgressEvent {
                stage,
                message: None,
                completed: None,
                total: None,
            });
        }
    }

    /// §4.6 `ingest`.
    pub async fn ingest(&self, path: &str) -> Result<usize> {
        self.emit(crate::streaming::Stage::Load, format!("loading {path}"));
        let documents = self.loader.load(path).await?;

        self.emit(crate::streaming::Stage::Chunk, "chunking documents");
        let chunks: Vec<_> = documents.iter().flat_map(|d| d.chunk()).collect();

        self.emit(crate::streaming::Stage::Embed, "embedding chunks");
        let embedded = if self.options.use_parallel_processing {
            self.embed_chunks_concurrently(chunks).await?
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embed_with_retry(&texts).await?;
            chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
                .collect()
        };
        let count = embedded.len();

        self.emit(crate::streaming::Stage::Store, "storing vectors");
        self.retriever.store(embedded).await?;

        Ok(count)
    }

    /// §4.6 `query`.
    pub async fn query(&self, prompt: &str) -> Result<String> {
        self.emit(crate::streaming::Stage::Embed, "embedding query");
        let query_vector = self.embedder.embed_query(prompt).await?;

        self.emit(crate::streaming::Stage::Retrieve, "retrieving documents");
        let mut docs = self.retriever.retrieve(&query_vector, None).await?;

        if let Some(reranker) = &self.reranker {
            self.emit(crate::streaming::Stage::Rerank, "reranking documents");
            docs = reranker.rerank(prompt, docs).await?;
        }

        self.emit(crate::streaming::Stage::Generate, "generating answer");
        self.llm.generate(prompt, &docs).await
    }

    /// §4.6/§4.8 `ingestStream`: lazily yields per-chunk progress, honoring
    /// `cancel` between chunk embeds so a cancelled caller stops paying for
    /// embedder calls it will discard (§5 backpressure/cancellation).
    pub fn ingest_stream(&self, path: String, cancel: CancellationToken) -> BoxStream<'static, IngestEvent> {
        let loader = self.loader.clone();
        let embedder = self.embedder.clone();
        let retriever = self.retriever.clone();

        Box::pin(async_stream::stream! {
            let documents = match loader.load(&path).await {
                Ok(docs) => docs,
                Err(e) => {
                    yield IngestEvent::from(&e);
                    return;
                }
            };
            let chunks: Vec<_> = documents.iter().flat_map(|d| d.chunk()).collect();
            let total = chunks.len();
            let mut processed = 0usize;
            let mut failed = 0usize;

            for chunk in chunks {
                if cancel.is_cancelled() {
                    return;
                }
                match embedder.embed(&[chunk.content.clone()]).await {
                    Ok(vectors) => {
                        let embedded = vectors
                            .into_iter()
                            .map(|vector| EmbeddedChunk { chunk: chunk.clone(), vector })
                            .collect();
                        if let Err(e) = retriever.store(embedded).await {
                            failed += 1;
                            yield IngestEvent::ChunkFailed { chunk_id: chunk.id.clone(), error: e.message };
                            continue;
                        }
                        processed += 1;
                        yield IngestEvent::ChunkProcessed { processed, total };
                    }
                    Err(e) => {
                        failed += 1;
                        yield IngestEvent::ChunkFailed { chunk_id: chunk.id.clone(), error: e.message };
                    }
                }
            }

            yield IngestEvent::IngestComplete {
                total_chunks: total,
                processed_chunks: processed,
                failed_chunks: failed,
            };
        })
    }

    /// §4.6/§4.8 `queryStream`.
    pub fn query_stream(&self, prompt: String, cancel: CancellationToken) -> BoxStream<'static, QueryEvent> {
        let embedder = self.embedder.clone();
        let retriever = self.retriever.clone();
        let reranker = self.reranker.clone();
        let llm = self.llm.clone();

        Box::pin(async_stream::stream! {
            if cancel.is_cancelled() {
                yield QueryEvent::Done;
                return;
            }

            let query_vector = match embedder.embed_query(&prompt).await {
                Ok(v) => v,
                Err(_) => {
                    yield QueryEvent::Done;
                    return;
                }
            };
            let mut docs = match retriever.retrieve(&query_vector, None).await {
                Ok(d) => d,
                Err(_) => {
                    yield QueryEvent::Done;
                    return;
                }
            };
            if let Some(reranker) = &reranker {
                if let Ok(reranked) = reranker.rerank(&prompt, docs.clone()).await {
                    docs = reranked;
                }
            }

            let token_stream = llm.generate_stream(&prompt, &docs);
            futures::pin_mut!(token_stream);
            while let Some(item) = token_stream.next().await {
                if cancel.is_cancelled() {
                    break;
                }
                match item {
                    Ok(tok) => yield QueryEvent::Token { token: tok.token },
                    Err(_) => break,
                }
            }
            yield QueryEvent::Done;
        })
    }
}

fn resolve(registry: &Registry, config: &PipelineConfig, stage: Stage) -> Result<PluginInstance> {
    let name = config
        .plugin_for_stage(&stage.to_string())
        .ok_or_else(|| EngineError::plugin_not_found(stage, "<unselected>"))?;
    registry.get(stage, name)
}

/// A randomized base delay for embedder retries, so that many chunks
/// retrying at once don't all wake up and hammer the embedder on the same
/// tick.
fn jittered_delay() -> std::time::Duration {
    use rand::Rng;
    let millis = rand::thread_rng().gen_range(30..=70);
    std::time::Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginSelection;
    use async_trait::async_trait;

    struct FixedLoader;
    #[async_trait]
    impl Loader for FixedLoader {
        async fn load(&self, path: &str) -> Result<Vec<Document>> {
            Ok(vec![Document::new("doc-1", format!("content of {path}"))])
        }
    }

    struct FixedEmbedder;
    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, items: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(items.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct CollectingRetriever {
        stored: std::sync::Mutex<Vec<EmbeddedChunk>>,
    }
    #[async_trait]
    impl Retriever for CollectingRetriever {
        async fn store(&self, vectors: Vec<EmbeddedChunk>) -> Result<()> {
            self.stored.lock().unwrap().extend(vectors);
            Ok(())
        }
        async fn retrieve(&self, _query: &[f32], _top_k: Option<usize>) -> Result<Vec<Document>> {
            Ok(vec![Document::new("doc-1", "retrieved content")])
        }
    }

    struct EchoLlm;
    #[async_trait]
    impl Llm for EchoLlm {
        async fn generate(&self, prompt: &str, docs: &[Document]) -> Result<String> {
            Ok(format!("answer to '{prompt}' using {} docs", docs.len()))
        }
    }

    fn wired_registry() -> Registry {
        let registry = Registry::new();
        registry.register("fixed", PluginInstance::Loader(Arc::new(FixedLoader)));
        registry.register("fixed", PluginInstance::Embedder(Arc::new(FixedEmbedder)));
        registry.register(
            "fixed",
            PluginInstance::Retriever(Arc::new(CollectingRetriever {
                stored: std::sync::Mutex::new(Vec::new()),
            })),
        );
        registry.register("fixed", PluginInstance::Llm(Arc::new(EchoLlm)));
        registry
    }

    fn wired_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.pipeline = vec![
            PluginSelection { stage: "loader".into(), name: "fixed".into(), version: None },
            PluginSelection { stage: "embedder".into(), name: "fixed".into(), version: None },
            PluginSelection { stage: "retriever".into(), name: "fixed".into(), version: None },
            PluginSelection { stage: "llm".into(), name: "fixed".into(), version: None },
        ];
        config
    }

    #[tokio::test]
    async fn ingest_then_query_round_trips_through_all_stages() {
        let registry = wired_registry();
        let pipeline = RagPipeline::new(&registry, wired_config(), PipelineOptions::default()).unwrap();

        let chunk_count = pipeline.ingest("docs/readme.md").await.unwrap();
        assert_eq!(chunk_count, 1);

        let answer = pipeline.query("what is this?").await.unwrap();
        assert_eq!(answer, "answer to 'what is this?' using 1 docs");
    }

    #[tokio::test]
    async fn missing_plugin_selection_fails_at_construction() {
        let registry = wired_registry();
        let config = PipelineConfig::default();
        let err = RagPipeline::new(&registry, config, PipelineOptions::default()).unwrap_err();
        assert!(err.message.starts_with("plugin not found:"));
    }

    #[tokio::test]
    async fn ingest_stream_emits_progress_then_completion() {
        let registry = wired_registry();
        let pipeline = RagPipeline::new(&registry, wired_config(), PipelineOptions::default()).unwrap();

        let events: Vec<IngestEvent> = pipeline
            .ingest_stream("docs/readme.md".to_string(), CancellationToken::new())
            .collect()
            .await;
        assert!(matches!(events.last(), Some(IngestEvent::IngestComplete { .. })));
    }

    #[tokio::test]
    async fn query_stream_ends_with_done() {
        let registry = wired_registry();
        let pipeline = RagPipeline::new(&registry, wired_config(), PipelineOptions::default()).unwrap();

        let events: Vec<QueryEvent> = pipeline
            .query_stream("what is this?".to_string(), CancellationToken::new())
            .collect()
            .await;
        assert!(matches!(events.last(), Some(QueryEvent::Done)));
    }

    struct MultiDocLoader;
    #[async_trait]
    impl Loader for MultiDocLoader {
        async fn load(&self, _path: &str) -> Result<Vec<Document>> {
            Ok((0..5)
                .map(|i| Document::new(format!("doc-{i}"), format!("content {i}")))
                .collect())
        }
    }

    #[tokio::test]
    async fn parallel_processing_embeds_every_chunk_through_the_dag_engine() {
        let registry = Registry::new();
        registry.register("multi", PluginInstance::Loader(Arc::new(MultiDocLoader)));
        registry.register("fixed", PluginInstance::Embedder(Arc::new(FixedEmbedder)));
        registry.register(
            "fixed",
            PluginInstance::Retriever(Arc::new(CollectingRetriever {
                stored: std::sync::Mutex::new(Vec::new()),
            })),
        );
        registry.register("fixed", PluginInstance::Llm(Arc::new(EchoLlm)));

        let mut config = wired_config();
        config.pipeline[0] = PluginSelection { stage: "loader".into(), name: "multi".into(), version: None };

        let options = PipelineOptions {
            use_parallel_processing: true,
            ..PipelineOptions::default()
        };
        let pipeline = RagPipeline::new(&registry, config, options).unwrap();

        let chunk_count = pipeline.ingest("docs/").await.unwrap();
        assert_eq!(chunk_count, 5);
    }

    #[tokio::test]
    async fn embed_chunks_concurrently_returns_empty_for_no_chunks() {
        let registry = wired_registry();
        let pipeline = RagPipeline::new(
            &registry,
            wired_config(),
            PipelineOptions { use_parallel_processing: true, ..PipelineOptions::default() },
        )
        .unwrap();

        let result = pipeline.embed_chunks_concurrently(Vec::new()).await.unwrap();
        assert!(result.is_empty());
    }
}
