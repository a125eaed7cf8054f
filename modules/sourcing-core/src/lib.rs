pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod freshness;
pub mod keys;
pub mod loader;
mod locks;
pub mod manager;
pub mod profile;
pub mod session;
mod sourcing;
pub mod store;
pub mod upstream;

pub use batch::{split_into_batches, DEFAULT_BATCH_SIZE};
pub use cache::{CacheStats, CompanyCache, ProfileCache, Resolved};
pub use config::SourcingConfig;
pub use error::{Result, SourcingError};
pub use freshness::{Freshness, FreshnessPolicy};
pub use keys::{CandidateKey, CompanyKey};
pub use loader::{FetchFailure, FetchNext, FetchedBatch, LoaderConfig, MaterializedProfile, ProgressiveLoader};
pub use manager::SessionManager;
pub use profile::CompanyFilter;
pub use session::{BatchAdvance, BatchDiscovery, SearchQuery, SearchSession, SessionCreated, SessionSummary};
pub use sourcing::Sourcing;
pub use store::{CacheKind, CacheRecord, CacheStore, MemoryStore, PgStore, SessionStore};
