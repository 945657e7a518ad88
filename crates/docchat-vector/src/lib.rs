//! DocChat Vector - Embedding and vector index clients
//!
//! Wraps the hosted embedding API and the Pinecone vector database, and
//! exposes the document search and semantic cache lookups used by the
//! response orchestrator.

pub mod embedding;
pub mod index_client;
pub mod pinecone;

pub use embedding::OpenAiEmbedding;
pub use index_client::VectorIndexClient;
pub use pinecone::{PineconeClient, PineconeIndex};
