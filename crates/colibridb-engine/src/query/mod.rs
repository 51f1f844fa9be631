//! Query surface: path resolution, filter evaluation, update application,
//! result shaping, and the per-collection result cache.

pub mod cache;
pub mod filter;
pub mod path;
pub mod pipeline;
pub mod update;

use serde::Deserialize;

use colibridb_common::Value;

pub use filter::Filter;
pub use path::{Resolved, resolve};
pub use update::UpdateDoc;

/// Options accepted by `find` and `findOne`.
///
/// `skip` and `limit` stay raw values so the pipeline can validate them
/// (`limit` also accepts the literal string `"all"`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FindOptions {
    pub projection: Option<Value>,
    pub sort: Option<Value>,
    pub skip: Option<Value>,
    pub limit: Option<Value>,
}

/// Options accepted by `paginate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaginateOptions {
    pub page: u64,
    pub limit: u64,
    pub sort: Option<Value>,
}

impl Default for PaginateOptions {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            sort: None,
        }
    }
}

/// What `update`/`updateById` should report back besides the count.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateReturn {
    /// Include the ids of updated documents
    pub return_ids: bool,
    /// Include the updated documents themselves
    pub return_documents: bool,
    /// Cap on returned ids/documents; overflow sets the truncation flag
    pub max_return: usize,
}

impl Default for UpdateReturn {
    fn default() -> Self {
        Self {
            return_ids: false,
            return_documents: false,
            max_return: 50,
        }
    }
}
