pub mod deadletter;
pub mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::assemble::{Posting, User};
use crate::error::PersistError;

/// Where assembled entities end up. Implementations are called from blocking
/// worker threads, possibly concurrently.
pub trait PersistenceGateway: Send + Sync {
    fn save_user(&self, user: &User) -> Result<(), PersistError>;

    /// Only called once the posting's user has been saved.
    fn save_posting(&self, posting: &Posting) -> Result<(), PersistError>;
}

/// Anything that can be dead-lettered and replayed.
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn entity_id(&self) -> &str;
}

impl Entity for User {
    const KIND: &'static str = "User";

    fn entity_id(&self) -> &str {
        &self.user_id
    }
}

impl Entity for Posting {
    const KIND: &'static str = "Posting";

    fn entity_id(&self) -> &str {
        &self.source_id
    }
}
