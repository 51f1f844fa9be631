//! ColibriDB engine
//!
//! An embeddable, single-process document database. Collections live
//! entirely in memory, queries and updates use a MongoDB-style operator
//! surface, and every dirty collection is snapshotted to a single JSON file
//! through a debounced, rename-atomic writer.
//!
//! ```rust,ignore
//! use colibridb_engine::{Config, Engine};
//! use colibridb_common::Value;
//!
//! let engine = Engine::open(Config::default()).await?;
//! engine
//!     .insert("users", vec![Value::from_json(serde_json::json!({
//!         "name": "Alice", "score": 1200
//!     }))])
//!     .await;
//! let found = engine
//!     .find("users", Value::from_json(serde_json::json!({
//!         "score": {"$gte": 1000}
//!     })), Default::default())
//!     .await;
//! engine.close().await?;
//! ```

pub mod config;
mod engine;
mod names;
pub mod persist;
pub mod query;
pub mod store;

pub use config::Config;
pub use engine::Engine;
pub use persist::PersistFailure;
pub use query::{FindOptions, PaginateOptions, UpdateReturn};

// Re-exported so embedders need only this crate.
pub use colibridb_common::{
    ColibriError, CollectionStats, DeleteReceipt, Document, Envelope, ErrorBody, InsertReceipt,
    Page, PageInfo, Result, UpdateReceipt, Value,
};
