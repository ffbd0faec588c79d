//! Model protocol types, the model trait and the Gemini backend.

pub mod errors;
mod gemini;
pub mod types;

pub use errors::ModelError;
pub use gemini::{DEFAULT_GEMINI_MODEL, GeminiModel, GeminiModelBuilder};
pub use types::{ChatModel, Message, ModelRequest, ModelResponse, Part, Role, Usage};
