pub mod analysis;
pub mod channel;
pub mod collect;
pub mod config;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod intent;
pub mod io;
pub mod issue;
pub mod notify;
pub mod orchestrator;
pub mod paths;
pub mod plan;
pub mod ratelimit;
pub mod revalidate;
pub mod runner;
pub mod safety;
pub mod store;
pub mod types;
pub mod validate;

pub use error::{MenderError, Result};
