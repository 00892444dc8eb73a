//! Plugin stage contracts (§6.1). Each trait is `async-trait`-annotated
//! and object-safe, so the registry can hold `Arc<dyn Loader>` etc. and
//! the composer can invoke whichever concrete implementation was
//! registered under a given name.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// A loaded unit of source content, before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub score: Option<f32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score: None,
            metadata: Map::new(),
        }
    }

    /// §6.1: "Each Document exposes chunk()". The default treats the whole
    /// document as a single chunk; loaders that need real sentence/window
    /// chunking override this by wrapping `Document` construction in their
    /// own type or post-processing the returned `Vec`.
    pub fn chunk(&self) -> Vec<Chunk> {
        vec![Chunk {
            id: format!("{}#0", self.id),
            document_id: self.id.clone(),
            content: self.content.clone(),
        }]
    }
}

/// The unit fed to an [`Embedder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
}

/// A chunk paired with its embedding vector, the unit a [`Retriever`]
/// stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// One token of a streamed LLM response (§4.8 query streaming events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamToken {
    pub token: String,
}

#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, path: &str) -> Result<Vec<Document>>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, items: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn store(&self, vectors: Vec<EmbeddedChunk>) -> Result<()>;
    async fn retrieve(&self, query: &[f32], top_k: Option<usize>) -> Result<Vec<Document>>;
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, docs: Vec<Document>) -> Result<Vec<Document>>;
}

#[async_trait]
pub trait Llm: Send + Sync {
    async fn generate(&self, prompt: &str, docs: &[Document]) -> Result<String>;

    /// Default: synthesize a single-token stream from [`Llm::generate`], for
    /// providers with no native streaming API. Providers with real
    /// streaming transports override this. Borrows `self` for the
    /// stream's lifetime rather than requiring `'static`, since the
    /// fallback has nothing worth detaching from its caller.
    fn generate_stream<'a>(
        &'a self,
        prompt: &'a str,
        docs: &'a [Document],
    ) -> BoxStream<'a, Result<StreamToken>> {
        Box::pin(async_stream::try_stream! {
            let answer = self.generate(prompt, docs).await?;
            yield StreamToken { token: answer };
        })
    }
}
