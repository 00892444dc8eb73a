//! A generic directed-acyclic-graph execution engine, paired with a
//! pluggable pipeline composition layer (loader → embedder → retriever →
//! reranker → LLM) built on top of it.
//!
//! The DAG engine ([`engine`], [`topology`], [`scheduler`]) is
//! domain-agnostic: it knows nothing about retrieval-augmented generation
//! and can drive any value-producing node graph. The pipeline layer
//! ([`registry`], [`plugins`], [`pipeline`], [`reranker`], [`streaming`])
//! is the RAG-specific composition built on top of it.

pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod plugins;
pub mod registry;
pub mod reranker;
pub mod retry;
pub mod scheduler;
pub mod streaming;
pub mod topology;

pub use engine::{CheckpointData, CheckpointSummary, DagEngine, ExecutionResult, MultiSinkResult};
pub use error::{CauseError, EngineError, Result};
pub use node::{Node, NodeFn, NodeId, NodeInput, NodeOptions, RetryPolicy};
pub use pipeline::{PipelineOptions, RagPipeline};
pub use plugins::{Chunk, Document, EmbeddedChunk, Embedder, Llm, Loader, Reranker, Retriever, StreamToken};
pub use registry::{PluginInstance, Registry, Stage};
pub use scheduler::ExecuteOptions;
