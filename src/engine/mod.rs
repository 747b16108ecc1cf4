// 12.0: request layer. one Engine owns the store and every component and
// exposes the market operations as &self methods, safe to share across threads.

mod bids;
mod config;
mod core;
mod pnl;
mod results;
mod settlement;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{CompletionTarget, EngineError, ErrorKind};
