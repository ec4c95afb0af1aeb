//! Ingestion pipeline: extracted pages, token windows, and persisted chunk records.

pub mod chunking;
pub mod ingest;
pub mod tokenizer;
pub mod types;

pub use chunking::{ChunkingPlan, chunk_page, chunk_page_text, token_windows};
pub use ingest::{Ingestor, discover_documents, write_chunks};
pub use tokenizer::{TokenCodec, build_codec, model_input_limit};
pub use types::{
    ChunkRecord, ChunkingError, FileReport, FileStatus, IngestError, IngestSummary,
};
