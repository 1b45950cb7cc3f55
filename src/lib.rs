//! Ballot Box: Weighted-Consensus Voting over Inheriting Namespaces
//!
//! Voters propose values for distinguishing paths inside namespaces that form
//! a tree. Each (namespace, path) resolves to one winning value by weighted
//! voting, falling back to a baseline value and then to whatever the parent
//! namespace resolves to. Administrators and technical-committee voters can
//! lock paths outright.

pub mod api;
pub mod cache;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod logging;
pub mod namespace;
pub mod path;
pub mod resolver;
pub mod store;
pub mod types;
pub mod voter;

pub use api::{BallotService, BallotServiceBuilder, VoteRequest};
pub use cache::NamespaceCache;
pub use config::{BallotConfig, ConfigLoader};
pub use error::{BallotError, StorageError, VoteRejection};
pub use namespace::{NamespaceState, NamespaceWorkingSet, ValueChange, VoteOutcome};
pub use resolver::{ApprovalStatus, BaselineValue, ResolvedValue, WinningSource};
pub use types::{Deadline, NamespaceId, PathId, VoteKind, VoterId, INHERITANCE_MARKER};
