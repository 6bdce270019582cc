//! dson-api-core: shared types for the DSON asset engine (engine-agnostic)

pub mod error;
pub mod escape;
pub mod ids;
pub mod reference;
pub mod value;

pub use error::{DsonError, Issue, IssueKind, IssueList, Severity};
pub use ids::{AssetId, ChannelKey};
pub use reference::Reference;
pub use value::Value;
