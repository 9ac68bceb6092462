mod error;
mod openai;
mod schema;
mod traits;

pub use error::AiError;
pub use openai::OpenAi;
pub use schema::StructuredOutput;
pub use traits::{ChatOutput, ChatService, EmbeddingService};
