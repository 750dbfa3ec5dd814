pub mod prompt;

pub use prompt::{save_history, PromptSource};
