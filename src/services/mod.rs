mod cleaner;
pub mod embedding;
mod generator;
mod prompt;
mod splitter;
pub mod vector_store;

pub use cleaner::DocumentCleaner;
pub use embedding::{
    DocumentEmbedder, Embedder, HttpEmbedder, OnnxEmbedder, SharedEmbedder, create_embedder,
};
pub use generator::{Generator, OpenAiGenerator, SharedGenerator};
pub use prompt::{DEFAULT_TEMPLATE, PromptBuilder};
pub use splitter::DocumentSplitter;
pub use vector_store::{
    DocumentWriter, MemoryStore, PineconeStore, QdrantStore, SharedVectorStore, VectorStore,
    VectorStoreHandle, resolve_vector_store,
};

#[cfg(test)]
pub(crate) mod testing {
    pub use super::embedding::testing::HashEmbedder;
    pub use super::generator::testing::ScriptedGenerator;
    pub use super::vector_store::testing::FlakyStore;
}
