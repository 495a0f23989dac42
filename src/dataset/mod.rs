pub mod batch;
pub mod loader;
pub mod record;

pub use batch::{EmbeddingMatrix, RecordBatch};
pub use loader::{load_batch, load_embeddings, load_records};
pub use record::{CategoricalField, Record};
