//! Shared types for ColibriDB
//!
//! This crate defines the dynamic [`Value`] model documents are built from,
//! the [`ColibriError`] taxonomy, and the response [`Envelope`] every engine
//! operation returns.

mod envelope;
mod error;
mod value;

pub use envelope::{
    CollectionStats, DeleteReceipt, Envelope, ErrorBody, InsertReceipt, Page, PageInfo,
    UpdateReceipt,
};
pub use error::{ColibriError, Result};
pub use value::{Document, Value};
