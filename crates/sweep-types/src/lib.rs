pub mod config;
pub mod errors;
pub mod metrics;
pub mod objective;
pub mod parameters;

pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use objective::*;
pub use parameters::*;
