pub mod types;
pub mod text;
pub mod rate_limit;
pub mod retry;
pub mod sources;
pub mod store;
pub mod dedup;
pub mod cache;
pub mod translate;
pub mod deliver;
pub mod format;
pub mod pipeline;
pub mod health;
pub mod scheduler;

pub use types::*;
pub use rate_limit::{MultiServiceRateLimiter, RateLimiter};
pub use retry::RetryPolicy;
pub use sources::{SourceFetch, SourceFetcher};
pub use store::Store;
pub use dedup::DedupStore;
pub use cache::ContentCache;
pub use translate::{CachedTranslator, Translate};
pub use deliver::{ConsoleDeliverer, Deliver};
pub use pipeline::DeliveryPipeline;
pub use health::HealthChecker;
pub use scheduler::Scheduler;
