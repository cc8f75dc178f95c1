//! SCIM 2.0 protocol types.
//!
//! Wire-level pieces that do not depend on the directory mapping.
//!
//! ## RFC References
//!
//! - RFC 7643: SCIM Core Schema
//! - RFC 7644: SCIM Protocol
//!
//! ## Module Structure
//!
//! - [`types`]: Schema URIs, list responses, query parameters, resource type descriptors
//! - [`error`]: SCIM error responses per RFC 7644
//! - [`filter`]: SCIM filter expression parser
//! - [`patch`]: SCIM PATCH request parser and value-filter evaluation

pub mod error;
pub mod filter;
pub mod patch;
pub mod types;

pub use error::*;
pub use filter::{
    BranchNode, CompareOp, FilterNode, FilterParseError, LogicalOp, TerminalNode, parse_filter,
};
pub use patch::{PatchError, PatchOp, PatchPath, PatchRequest, matches_filter, parse_path};
pub use types::*;
