pub mod aggregator;
pub mod config;
pub mod ids;
pub mod session;

pub use aggregator::*;
pub use config::*;
pub use ids::*;
pub use session::*;
