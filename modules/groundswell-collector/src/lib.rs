pub mod collector;
pub mod credentials;
pub mod dedup;
pub mod harvester;
pub mod planner;
pub mod reddit;
pub mod traits;
pub mod watermark;

pub use collector::{Collector, RunStats};
pub use credentials::CredentialPool;
pub use dedup::DedupIndex;
pub use harvester::{Harvester, StreamOptions};
pub use planner::{build_plan, PlanOptions, SamplingStrategy, SortMethod, TimeFilter};
pub use watermark::WatermarkStore;
