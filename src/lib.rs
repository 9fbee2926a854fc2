//! Core directory engine: DN normalization, schema registry, entry model,
//! transactional DN-keyed storage, RFC4515-style filters, a cost-based
//! query planner, the operation layer (bind/search/add/modify/delete/
//! modifyDN), a change-stream broker, and password policy/lockout, all
//! wrapped behind a single `Engine` (spec §6).

pub mod config;
pub mod dn;
pub mod engine;
pub mod entry;
pub mod error;
pub mod filter;
pub mod index;
pub mod op;
pub mod password;
pub mod planner;
pub mod schema;
pub mod storage;
pub mod stream;
pub mod timeutil;

pub use config::{DirectoryConfig, EngineConfig, SecurityConfig};
pub use dn::Dn;
pub use engine::Engine;
pub use entry::{Entry, ModOp, Modification};
pub use error::{EngineError, ErrorKind, Result};
pub use filter::{parse_filter, serialize_filter, Filter};
pub use index::IndexKind;
pub use op::ClusterWriter;
pub use password::{
    GraceLoginState, LockoutPolicy, LockoutTable, PasswordPolicy, PasswordVerifier, Sha256Verifier,
};
pub use planner::QueryPlan;
pub use schema::SchemaRegistry;
pub use storage::{Scope, StorageBackend, StorageTransaction};
pub use stream::{Broker, ChangeEvent, ChangeOp, Subscription, SubscriptionFilter};
