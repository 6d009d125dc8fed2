pub mod store;

pub use store::{ContextMessage, ConversationStore};
