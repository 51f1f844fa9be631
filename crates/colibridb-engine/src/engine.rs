//! Engine facade.
//!
//! `Engine` owns the storage directory and a registry of collections,
//! created (and loaded from their snapshot, when one exists) lazily on
//! first access. Every public operation validates the collection name,
//! takes the collection's lock for the duration of the operation, and
//! returns the uniform response envelope. Mutations arm the collection's
//! debounced persister on the way out.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info};

use colibridb_common::{
    ColibriError, CollectionStats, DeleteReceipt, Document, Envelope, InsertReceipt, Page, Result,
    UpdateReceipt, Value,
};

use crate::config::Config;
use crate::names;
use crate::persist::{self, PersistFailure, PersistSlot};
use crate::query::{FindOptions, PaginateOptions, UpdateReturn};
use crate::store::collection::{Collection, CollectionState};

/// The in-memory document database engine.
pub struct Engine {
    config: Config,
    collections: DashMap<String, Arc<Collection>>,
    errors_tx: UnboundedSender<PersistFailure>,
    errors_rx: Mutex<Option<UnboundedReceiver<PersistFailure>>>,
}

impl Engine {
    /// Open an engine over a storage directory, creating it if missing.
    pub async fn open(config: Config) -> Result<Engine> {
        std::fs::create_dir_all(&config.storage_path).map_err(|e| {
            ColibriError::Io(format!(
                "creating storage directory {}: {e}",
                config.storage_path.display()
            ))
        })?;

        let (errors_tx, errors_rx) = unbounded_channel();
        info!(storage = %config.storage_path.display(), "engine opened");

        Ok(Engine {
            config,
            collections: DashMap::new(),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        })
    }

    /// Open with default configuration.
    pub async fn open_default() -> Result<Engine> {
        Self::open(Config::default()).await
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Take the receiver for persister failures. Yields None on second call.
    pub fn persist_errors(&self) -> Option<UnboundedReceiver<PersistFailure>> {
        self.errors_rx.lock().take()
    }

    /// Get or lazily create a collection, loading its snapshot if present.
    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        names::check_name(name)?;

        if let Some(existing) = self.collections.get(name) {
            return Ok(existing.clone());
        }

        match self.collections.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let file = persist::collection_file(&self.config.storage_path, name);
                let state = match persist::load_documents(&file)? {
                    Some(docs) => {
                        debug!(collection = %name, documents = docs.len(), "loaded snapshot");
                        CollectionState::from_documents(docs)
                    }
                    None => CollectionState::new(),
                };

                let collection = Arc::new(Collection::new(
                    name.to_string(),
                    state,
                    PersistSlot::new(file),
                ));
                persist::spawn_persister(
                    collection.clone(),
                    self.config.save_delay(),
                    self.errors_tx.clone(),
                );
                entry.insert(collection.clone());
                Ok(collection)
            }
        }
    }

    fn log_op(&self, collection: &str, op: &str) {
        if self.config.debug {
            debug!(collection = %collection, op = %op, "operation");
        }
    }

    // Reads

    /// Count documents matching a filter.
    pub async fn count(&self, collection: &str, filter: Value) -> Envelope<u64> {
        self.log_op(collection, "count");
        let result = (|| {
            let col = self.collection(collection)?;
            let mut state = col.state.write();
            state.count(&filter)
        })();
        Envelope::from_result(result)
    }

    /// Find documents matching a filter, shaped by the options pipeline.
    ///
    /// An empty result is reported as `success:false` with code 404 while
    /// still carrying the empty list.
    pub async fn find(
        &self,
        collection: &str,
        filter: Value,
        options: FindOptions,
    ) -> Envelope<Vec<Document>> {
        self.log_op(collection, "find");
        let result = (|| {
            let col = self.collection(collection)?;
            let mut state = col.state.write();
            state.find(&filter, &options)
        })();

        match result {
            Ok(docs) if docs.is_empty() => Envelope::fail_with(
                docs,
                ColibriError::NotFound("no matching documents".into()),
            ),
            other => Envelope::from_result(other),
        }
    }

    /// First matching document, or a 404 envelope.
    pub async fn find_one(
        &self,
        collection: &str,
        filter: Value,
        options: FindOptions,
    ) -> Envelope<Document> {
        self.log_op(collection, "findOne");
        let result = (|| {
            let col = self.collection(collection)?;
            let mut state = col.state.write();
            state.find_one(&filter, &options)
        })();

        match result {
            Ok(Some(doc)) => Envelope::ok(doc),
            Ok(None) => Envelope::fail(ColibriError::NotFound("no matching document".into())),
            Err(err) => Envelope::fail(err),
        }
    }

    /// Constant-time lookup through the primary id index.
    pub async fn find_by_id(&self, collection: &str, id: &str) -> Envelope<Document> {
        self.log_op(collection, "findById");
        let result = (|| {
            let col = self.collection(collection)?;
            let state = col.state.read();
            Ok(state.find_by_id(id))
        })();

        match result {
            Ok(Some(doc)) => Envelope::ok(doc),
            Ok(None) => {
                Envelope::fail(ColibriError::NotFound(format!("no document with id '{id}'")))
            }
            Err(err) => Envelope::fail(err),
        }
    }

    // Writes

    /// Insert documents; an existing id turns the entry into an upsert.
    pub async fn insert(&self, collection: &str, docs: Vec<Value>) -> Envelope<InsertReceipt> {
        self.log_op(collection, "insert");
        self.mutate(collection, |state| state.insert_many(docs))
    }

    /// Apply an update spec to every matching document.
    pub async fn update(
        &self,
        collection: &str,
        filter: Value,
        spec: Value,
        options: UpdateReturn,
    ) -> Envelope<UpdateReceipt> {
        self.log_op(collection, "update");
        self.mutate(collection, |state| {
            state.update_many(&filter, &spec, &options)
        })
    }

    /// Apply an update spec to the document with the given id.
    pub async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        spec: Value,
        options: UpdateReturn,
    ) -> Envelope<UpdateReceipt> {
        self.log_op(collection, "updateById");
        self.mutate(collection, |state| state.update_by_id(id, &spec, &options))
    }

    /// Delete every matching document.
    pub async fn delete(&self, collection: &str, filter: Value) -> Envelope<DeleteReceipt> {
        self.log_op(collection, "delete");
        self.mutate(collection, |state| state.delete_many(&filter))
    }

    /// Delete the document with the given id.
    pub async fn delete_by_id(&self, collection: &str, id: &str) -> Envelope<DeleteReceipt> {
        self.log_op(collection, "deleteById");
        self.mutate(collection, |state| state.delete_by_id(id))
    }

    /// Register a composite secondary index and populate it.
    pub async fn create_index(&self, collection: &str, spec: Value) -> Envelope<String> {
        self.log_op(collection, "createIndex");
        let result = (|| {
            let col = self.collection(collection)?;
            let mut state = col.state.write();
            state.create_index(&spec)
        })();
        Envelope::from_result(result)
    }

    /// Run a mutation under the collection's write lock and arm the
    /// persister if it dirtied the state.
    fn mutate<T>(
        &self,
        collection: &str,
        op: impl FnOnce(&mut CollectionState) -> Result<T>,
    ) -> Envelope<T> {
        let result = (|| {
            let col = self.collection(collection)?;
            let outcome = {
                let mut state = col.state.write();
                let outcome = op(&mut state)?;
                Ok::<_, ColibriError>((outcome, state.dirty))
            }?;
            if outcome.1 {
                col.persist.arm();
            }
            Ok(outcome.0)
        })();
        Envelope::from_result(result)
    }

    // Pagination

    /// One page of matches plus pagination metadata.
    pub async fn paginate(
        &self,
        collection: &str,
        filter: Value,
        options: PaginateOptions,
    ) -> Envelope<Page> {
        self.log_op(collection, "paginate");
        let result = (|| {
            let col = self.collection(collection)?;
            let mut state = col.state.write();
            state.paginate(&filter, &options)
        })();
        Envelope::from_result(result)
    }

    // Collection management

    /// Drop a collection: in-memory state and on-disk snapshot.
    ///
    /// Dropping is idempotent over a missing file but a collection that is
    /// neither loaded nor on disk reports 404.
    pub async fn drop_collection(&self, collection: &str) -> Envelope<bool> {
        self.log_op(collection, "drop");
        if let Err(err) = names::check_name(collection) {
            return Envelope::fail(err);
        }

        let file = persist::collection_file(&self.config.storage_path, collection);
        let loaded = self.collections.remove(collection);

        let existed_on_disk = match persist::remove_snapshot(&file).await {
            Ok(removed) => removed,
            Err(err) => return Envelope::fail(err),
        };

        match loaded {
            Some((_, col)) => {
                persist::shutdown_persister(&col).await;
                // The rename-based writer may have recreated the file while
                // shutting down; sweep once more.
                if let Err(err) = persist::remove_snapshot(&file).await {
                    return Envelope::fail(err);
                }
                Envelope::ok(true)
            }
            None if existed_on_disk => Envelope::ok(true),
            None => Envelope::fail(ColibriError::NotFound(format!(
                "collection '{collection}' does not exist"
            ))),
        }
    }

    /// Names of collections known in memory or present on disk.
    pub async fn list_collections(&self) -> Envelope<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let dir = match std::fs::read_dir(&self.config.storage_path) {
            Ok(dir) => dir,
            Err(e) => return Envelope::fail(ColibriError::Io(e.to_string())),
        };
        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if names::is_valid_name(stem) && !names.iter().any(|n| n == stem) {
                        names.push(stem.to_string());
                    }
                }
            }
        }

        names.sort();
        Envelope::ok(names)
    }

    /// Diagnostic stats for one collection.
    pub async fn stats(&self, collection: &str) -> Envelope<CollectionStats> {
        let result = (|| {
            names::check_name(collection)?;
            let file = persist::collection_file(&self.config.storage_path, collection);
            if self.collections.get(collection).is_none() && !file.exists() {
                return Err(ColibriError::NotFound(format!(
                    "collection '{collection}' does not exist"
                )));
            }
            let col = self.collection(collection)?;
            let state = col.state.read();
            Ok(state.stats(collection))
        })();
        Envelope::from_result(result)
    }

    // Shutdown

    /// Flush every dirty collection and stop all persister tasks.
    ///
    /// Returns once every outstanding snapshot is durably renamed into
    /// place. Not cancellable once started.
    pub async fn close(&self) -> Result<()> {
        let collections: Vec<Arc<Collection>> = self
            .collections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for col in &collections {
            persist::shutdown_persister(col).await;
        }

        let mut first_error = None;
        for col in &collections {
            let dirty = col.state.read().dirty;
            if dirty {
                if let Err(err) = persist::snapshot(col).await {
                    tracing::error!(collection = %col.name, error = %err, "flush on close failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        info!("engine closed");
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
