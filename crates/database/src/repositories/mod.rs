pub mod conversation;
pub mod errors;
pub mod memory;
#[macro_use]
pub mod retry;
pub mod utils;

pub use conversation::{ConversationRepository, PgConversationRepository};
pub use errors::RepositoryError;
pub use memory::InMemoryConversationRepository;
pub use utils::map_db_error;
