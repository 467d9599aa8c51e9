//! Domain ports (interfaces) for the memloom scheduler.
//!
//! Every external collaborator sits behind one of these traits; the service
//! layer only ever holds `Arc<dyn Port>` handles wired in at init time.

pub mod broker;
pub mod embedding;
pub mod graph_store;
pub mod llm;
pub mod mem_cube;
pub mod monitor_store;
pub mod prompt_store;
pub mod reranker;
pub mod shared_log;

pub use broker::LogBroker;
pub use embedding::{cosine_similarity, EmbedClient};
pub use graph_store::{
    EdgeDirection, FilterOp, GraphEdge, GraphStore, MetadataFilter, MERGED_TO_EDGE,
};
pub use llm::{ChatMessage, ChatRole, LlmClient};
pub use mem_cube::{
    ActivationCache, ActivationItem, FeedbackOutcome, FeedbackProcessor, FeedbackRecord,
    FeedbackRequest, MemCube, MemReader, PreferenceMemory, SearchMode, SearchRequest, TextMemory,
};
pub use monitor_store::{MonitorSnapshot, MonitorStore};
pub use prompt_store::{BuiltinPromptStore, Locale, PromptStore, TemplateName};
pub use reranker::RerankClient;
pub use shared_log::{SharedLogClient, StreamEntry};
