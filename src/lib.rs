// dam-core: day-ahead electricity market core.
// bids in, hourly double auction, contracts out, PnL against real-time prices.
// no network or database I/O: prices come through a trait, time through a clock.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: BidId, Hour, Side, Price, Money, Timestamp
//   2.x  bid.rs: bid struct, status, request/amendment validation
//   3.x  ledger.rs: submit, cancel, amend, gate closure, per-hour cap
//   4.x  contract.rs: contract struct, filters, registry (complete/query)
//   5.x  pnl.rs: mark contracts to real-time, summaries, portfolio
//   6.x  clock.rs: injectable time source
//   7.x  config.rs: market settings, cutoff resolution, presets
//   8.x  price_feed.rs: day-ahead/real-time price source
//   9.x  store.rs: in-memory tables, indexes, atomic regions
//   10.x clearing.rs: per-hour matcher, serialized idempotent clear
//   11.x events.rs: state transition events for audit
//   12.x engine/: request layer over all of the above

// market modules
pub mod bid;
pub mod clearing;
pub mod contract;
pub mod ledger;
pub mod pnl;
pub mod types;

// infrastructure
pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod price_feed;
pub mod store;

// re exports for convenience
pub use bid::*;
pub use clearing::*;
pub use clock::*;
pub use config::*;
pub use contract::*;
pub use engine::*;
pub use events::*;
pub use ledger::*;
pub use pnl::*;
pub use price_feed::*;
pub use store::*;
pub use types::*;
