//! strata-core — Core library for the strata revision store.
//!
//! Strata keeps the full history of a text file inside a single store
//! file: the newest trunk revision is stored literally, every other
//! revision as a line-diff script against its neighbor. Trunk deltas run
//! backwards from the head, branch deltas forwards from their branch
//! point, so checking out any revision is one walk plus a replay.

pub mod codec;
pub mod commit;
pub mod diffgen;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod ident;
pub mod num;
pub mod scan;
pub mod store;
pub mod tree;

pub use error::{StrataError, StrataResult};
pub use store::Store;
