//! Directory Gateway
//!
//! The engine talks to the directory only through [`DirectoryGateway`]. The
//! LDAP wire protocol lives behind it; this crate ships
//! [`InMemoryDirectory`], which follows the same semantics (DN uniqueness,
//! atomic modify requests, non-empty multi-value constraints, operational
//! attributes) without a network round trip.

pub mod dn;
mod error;
pub mod filter;
mod memory;
mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use error::{DirectoryError, DirectoryResult};
pub use filter::{AssertionValue, LdapFilter};
pub use memory::InMemoryDirectory;
pub use types::{DirectoryValue, Entry, Modification, PendingMutation, SearchScope};

/// Operational attribute holding the server-assigned entry identifier.
pub const ATTR_ENTRY_UUID: &str = "entryUUID";

/// Operational attribute holding the creation time (generalized time).
pub const ATTR_CREATE_TIMESTAMP: &str = "createTimestamp";

/// Operational attribute holding the last modification time.
pub const ATTR_MODIFY_TIMESTAMP: &str = "modifyTimestamp";

pub const ATTR_OBJECT_CLASS: &str = "objectClass";

/// Stream of search results.
pub type EntryStream = BoxStream<'static, DirectoryResult<Entry>>;

#[async_trait]
pub trait DirectoryGateway: Send + Sync {
    /// Search beneath `base_dn`. An empty `attributes` list returns every
    /// attribute.
    async fn search(
        &self,
        base_dn: &str,
        filter: &LdapFilter,
        scope: SearchScope,
        attributes: &[String],
    ) -> DirectoryResult<EntryStream>;

    /// Fetch one entry by DN.
    async fn get_by_dn(&self, dn: &str) -> DirectoryResult<Option<Entry>>;

    /// Create an entry.
    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<DirectoryValue>)>)
    -> DirectoryResult<()>;

    /// Apply all modifications atomically, or none of them.
    async fn modify(&self, dn: &str, modifications: Vec<Modification>) -> DirectoryResult<()>;

    /// Remove an entry.
    async fn delete(&self, dn: &str) -> DirectoryResult<()>;

    /// Whether an attribute has a binary syntax.
    fn is_binary(&self, attribute: &str) -> bool;
}
