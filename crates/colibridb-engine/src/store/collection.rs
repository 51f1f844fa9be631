//! In-memory collection state and its operation set.
//!
//! `CollectionState` owns the document vector, the primary id index, the
//! secondary indexes, and the query cache. Positions in the data vector are
//! transient handles: both index structures record them and are kept exact
//! after every operation. Deletion uses the full-rebuild strategy — after
//! any removal the id index and every secondary index are rebuilt from the
//! data vector.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use rand::TryRngCore;
use rand::rngs::OsRng;
use tracing::warn;

use colibridb_common::{
    ColibriError, CollectionStats, DeleteReceipt, Document, InsertReceipt, Page, PageInfo, Result,
    UpdateReceipt, Value,
};

use crate::persist::PersistSlot;
use crate::query::cache::QueryCache;
use crate::query::pipeline::{self, Limit};
use crate::query::{Filter, FindOptions, PaginateOptions, UpdateDoc, UpdateReturn};
use crate::store::index::{IndexSpec, SecondaryIndex};

/// Above this many fresh inserts the receipt reports first/last/prefix
/// instead of the full id list.
const FULL_ID_LIST_MAX: usize = 20;

// Collection handle

/// One named collection: guarded state plus its persistence slot.
pub struct Collection {
    pub name: String,
    pub(crate) state: RwLock<CollectionState>,
    pub(crate) persist: PersistSlot,
}

impl Collection {
    pub(crate) fn new(name: String, state: CollectionState, persist: PersistSlot) -> Self {
        Self {
            name,
            state: RwLock::new(state),
            persist,
        }
    }
}

// Collection state

pub struct CollectionState {
    /// Documents in insertion order; position is a transient handle.
    pub(crate) data: Vec<Document>,
    /// id -> current position in `data`.
    pub(crate) id_index: HashMap<String, usize>,
    /// Registered secondary indexes.
    pub(crate) indexes: Vec<SecondaryIndex>,
    /// True iff an unpersisted mutation exists.
    pub(crate) dirty: bool,
    /// Write counter; bumps invalidate cached query results.
    pub(crate) epoch: u64,
    /// Wall-clock time of the last successful snapshot.
    pub(crate) last_save: Option<chrono::DateTime<Utc>>,
    cache: QueryCache,
}

impl CollectionState {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            id_index: HashMap::new(),
            indexes: Vec::new(),
            dirty: false,
            epoch: 0,
            last_save: None,
            cache: QueryCache::default(),
        }
    }

    /// Rehydrate from a loaded snapshot.
    pub fn from_documents(data: Vec<Document>) -> Self {
        let mut state = Self::new();
        state.data = data;
        state.rebuild_id_index();
        state
    }

    fn mark_written(&mut self) {
        self.dirty = true;
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn rebuild_id_index(&mut self) {
        self.id_index.clear();
        for (position, doc) in self.data.iter().enumerate() {
            if let Some(id) = document_id(doc) {
                if self.id_index.insert(id.clone(), position).is_some() {
                    warn!(id = %id, "duplicate id in collection data; keeping later document");
                }
            }
        }
    }

    fn rebuild_indexes(&mut self) {
        self.rebuild_id_index();
        for index in &mut self.indexes {
            index.rebuild(&self.data);
        }
    }

    /// Remove and re-add one position across all secondary indexes after a
    /// document changed in place.
    fn reindex_position(&mut self, position: usize, before: &Document) {
        let after = &self.data[position];
        for index in &mut self.indexes {
            index.remove_doc(position, before);
            index.insert_doc(position, after);
        }
    }

    // Reads

    /// Positions of documents matching a raw filter, cache-assisted.
    fn matching_positions(&mut self, raw_filter: &Value) -> Result<Vec<usize>> {
        let filter = Filter::parse(raw_filter)?;

        let key = serde_json::to_string(raw_filter)?;
        if let Some(hit) = self.cache.get(&key, self.epoch) {
            return Ok(hit);
        }

        let positions: Vec<usize> = self
            .data
            .iter()
            .enumerate()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(position, _)| position)
            .collect();

        self.cache.insert(key, self.epoch, positions.clone());
        Ok(positions)
    }

    pub fn count(&mut self, raw_filter: &Value) -> Result<u64> {
        Ok(self.matching_positions(raw_filter)?.len() as u64)
    }

    pub fn find(&mut self, raw_filter: &Value, options: &FindOptions) -> Result<Vec<Document>> {
        // Validate window options before touching the data
        let skip = pipeline::parse_skip(options.skip.as_ref())?;
        let limit = pipeline::parse_limit(options.limit.as_ref())?;

        let positions = self.matching_positions(raw_filter)?;
        let mut docs: Vec<Document> = positions.iter().map(|&p| self.data[p].clone()).collect();

        if let Some(sort) = &options.sort {
            pipeline::sort_documents(&mut docs, sort)?;
        }
        pipeline::apply_window(&mut docs, skip, limit);
        if let Some(projection) = &options.projection {
            docs = pipeline::project(docs, projection)?;
        }

        Ok(docs)
    }

    pub fn find_one(&mut self, raw_filter: &Value, options: &FindOptions) -> Result<Option<Document>> {
        let mut options = options.clone();
        options.limit = Some(Value::Number(1.0));
        Ok(self.find(raw_filter, &options)?.into_iter().next())
    }

    pub fn find_by_id(&self, id: &str) -> Option<Document> {
        self.id_index.get(id).map(|&position| self.data[position].clone())
    }

    // Writes

    pub fn insert_many(&mut self, inputs: Vec<Value>) -> Result<InsertReceipt> {
        let mut docs = Vec::with_capacity(inputs.len());
        for input in inputs {
            match input.into_object() {
                Some(doc) => docs.push(doc),
                None => {
                    return Err(ColibriError::Validation(
                        "insert expects an array of document objects".into(),
                    ));
                }
            }
        }

        let now = now_iso();
        let batch_prefix = if docs.len() >= 2 {
            Some(base36_millis())
        } else {
            None
        };

        let mut inserted_ids: Vec<String> = Vec::new();
        let mut updated_count = 0usize;
        let mut auto_seq = 0usize;

        for mut doc in docs {
            let id = match doc.get("id") {
                Some(value) => id_string(value),
                None => match &batch_prefix {
                    Some(prefix) => {
                        auto_seq += 1;
                        format!("{prefix}_{auto_seq}")
                    }
                    None => random_hex_id()?,
                },
            };

            if let Some(&position) = self.id_index.get(&id) {
                // Upsert: merge input fields over the existing document,
                // keeping the original createdAt.
                let before = self.data[position].clone();
                let existing = &mut self.data[position];
                for (field, value) in doc {
                    if field == "id" || field == "createdAt" {
                        continue;
                    }
                    existing.insert(field, value);
                }
                existing.insert("updatedAt".to_string(), Value::String(now.clone()));
                self.reindex_position(position, &before);
                updated_count += 1;
            } else {
                doc.insert("id".to_string(), Value::String(id.clone()));
                doc.insert("createdAt".to_string(), Value::String(now.clone()));
                doc.insert("updatedAt".to_string(), Value::String(now.clone()));

                let position = self.data.len();
                self.data.push(doc);
                self.id_index.insert(id.clone(), position);
                for index in &mut self.indexes {
                    index.insert_doc(position, &self.data[position]);
                }
                inserted_ids.push(id);
            }
        }

        if !inserted_ids.is_empty() || updated_count > 0 {
            self.mark_written();
        }
        Ok(build_insert_receipt(inserted_ids, updated_count))
    }

    pub fn update_many(
        &mut self,
        raw_filter: &Value,
        raw_spec: &Value,
        options: &UpdateReturn,
    ) -> Result<UpdateReceipt> {
        let update = UpdateDoc::parse(raw_spec)?;
        let positions = self.matching_positions(raw_filter)?;

        if positions.is_empty() {
            return Ok(UpdateReceipt {
                updated_count: 0,
                updated_ids: options.return_ids.then(Vec::new),
                documents: options.return_documents.then(Vec::new),
                truncated: false,
            });
        }

        let now = now_iso();
        for &position in &positions {
            let before = self.data[position].clone();
            update.apply(&mut self.data[position], &now);
            self.reindex_position(position, &before);
        }
        self.mark_written();

        Ok(self.build_update_receipt(&positions, options))
    }

    pub fn update_by_id(
        &mut self,
        id: &str,
        raw_spec: &Value,
        options: &UpdateReturn,
    ) -> Result<UpdateReceipt> {
        let update = UpdateDoc::parse(raw_spec)?;
        let position = *self
            .id_index
            .get(id)
            .ok_or_else(|| ColibriError::NotFound(format!("no document with id '{id}'")))?;

        let now = now_iso();
        let before = self.data[position].clone();
        update.apply(&mut self.data[position], &now);
        self.reindex_position(position, &before);
        self.mark_written();

        Ok(self.build_update_receipt(&[position], options))
    }

    fn build_update_receipt(&self, positions: &[usize], options: &UpdateReturn) -> UpdateReceipt {
        let wants_payload = options.return_ids || options.return_documents;
        let truncated = wants_payload && positions.len() > options.max_return;
        let capped = &positions[..positions.len().min(options.max_return)];

        UpdateReceipt {
            updated_count: positions.len(),
            updated_ids: options.return_ids.then(|| {
                capped
                    .iter()
                    .filter_map(|&p| document_id(&self.data[p]).cloned())
                    .collect()
            }),
            documents: options
                .return_documents
                .then(|| capped.iter().map(|&p| self.data[p].clone()).collect()),
            truncated,
        }
    }

    pub fn delete_many(&mut self, raw_filter: &Value) -> Result<DeleteReceipt> {
        let positions = self.matching_positions(raw_filter)?;
        if positions.is_empty() {
            return Ok(DeleteReceipt { deleted_count: 0 });
        }

        let doomed: std::collections::HashSet<usize> = positions.iter().copied().collect();
        let mut position = 0usize;
        self.data.retain(|_| {
            let keep = !doomed.contains(&position);
            position += 1;
            keep
        });

        self.rebuild_indexes();
        self.mark_written();
        Ok(DeleteReceipt {
            deleted_count: doomed.len(),
        })
    }

    pub fn delete_by_id(&mut self, id: &str) -> Result<DeleteReceipt> {
        let position = *self
            .id_index
            .get(id)
            .ok_or_else(|| ColibriError::NotFound(format!("no document with id '{id}'")))?;

        self.data.remove(position);
        self.rebuild_indexes();
        self.mark_written();
        Ok(DeleteReceipt { deleted_count: 1 })
    }

    pub fn paginate(&mut self, raw_filter: &Value, options: &PaginateOptions) -> Result<Page> {
        if options.page < 1 {
            return Err(ColibriError::Validation("page must be >= 1".into()));
        }
        if options.limit < 1 {
            return Err(ColibriError::Validation("limit must be >= 1".into()));
        }

        let positions = self.matching_positions(raw_filter)?;
        let total_items = positions.len() as u64;
        let total_pages = total_items.div_ceil(options.limit);

        let mut docs: Vec<Document> = positions.iter().map(|&p| self.data[p].clone()).collect();
        if let Some(sort) = &options.sort {
            pipeline::sort_documents(&mut docs, sort)?;
        }

        let skip = ((options.page - 1) * options.limit) as usize;
        pipeline::apply_window(&mut docs, skip, Limit::Count(options.limit as usize));

        let has_next = options.page < total_pages;
        let has_prev = options.page > 1;
        let (start_index, end_index) = if docs.is_empty() {
            (0, 0)
        } else {
            (skip as u64 + 1, skip as u64 + docs.len() as u64)
        };

        Ok(Page {
            data: docs,
            pagination: PageInfo {
                page: options.page,
                limit: options.limit,
                total_items,
                total_pages,
                has_next,
                has_prev,
                next_page: has_next.then(|| options.page + 1),
                prev_page: has_prev.then(|| options.page - 1),
                start_index,
                end_index,
            },
        })
    }

    pub fn create_index(&mut self, raw_spec: &Value) -> Result<String> {
        let spec = IndexSpec::parse(raw_spec)?;
        if self.indexes.iter().any(|index| index.spec.name == spec.name) {
            return Err(ColibriError::Conflict(format!(
                "index '{}' already exists",
                spec.name
            )));
        }

        let name = spec.name.clone();
        self.indexes.push(SecondaryIndex::build(spec, &self.data));
        Ok(name)
    }

    pub fn stats(&self, name: &str) -> CollectionStats {
        CollectionStats {
            name: name.to_string(),
            documents: self.data.len(),
            indexes: self.indexes.iter().map(|i| i.spec.name.clone()).collect(),
            dirty: self.dirty,
            last_save: self
                .last_save
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    /// Canonically ordered copies of every document, for snapshotting.
    pub fn snapshot_documents(&self) -> Vec<Document> {
        self.data.iter().map(canonicalize).collect()
    }
}

impl Default for CollectionState {
    fn default() -> Self {
        Self::new()
    }
}

// Helpers

fn document_id(doc: &Document) -> Option<&String> {
    match doc.get("id") {
        Some(Value::String(id)) => Some(id),
        _ => None,
    }
}

/// Coerce a supplied id value to its string form.
fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Current time in ISO-8601 with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 16-hex-digit id from the OS entropy source.
fn random_hex_id() -> Result<String> {
    let mut bytes = [0u8; 8];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| ColibriError::Internal(format!("entropy source failed: {e}")))?;
    Ok(hex::encode(bytes))
}

/// Base-36 rendering of the current wall-clock milliseconds, used as the
/// shared prefix for batch id assignment.
fn base36_millis() -> String {
    let mut millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    if millis == 0 {
        return "0".to_string();
    }

    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    while millis > 0 {
        out.push(DIGITS[(millis % 36) as usize]);
        millis /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn build_insert_receipt(inserted_ids: Vec<String>, updated_count: usize) -> InsertReceipt {
    let inserted_count = inserted_ids.len();

    if inserted_count == 0 {
        return InsertReceipt {
            inserted_count,
            updated_count,
            inserted_ids: None,
            first_id: None,
            last_id: None,
            prefix: None,
        };
    }

    if inserted_count <= FULL_ID_LIST_MAX {
        InsertReceipt {
            inserted_count,
            updated_count,
            inserted_ids: Some(inserted_ids),
            first_id: None,
            last_id: None,
            prefix: None,
        }
    } else {
        let prefix = common_prefix(&inserted_ids);
        InsertReceipt {
            inserted_count,
            updated_count,
            inserted_ids: None,
            first_id: inserted_ids.first().cloned(),
            last_id: inserted_ids.last().cloned(),
            prefix: Some(prefix),
        }
    }
}

fn common_prefix(ids: &[String]) -> String {
    let mut prefix = match ids.first() {
        Some(first) => first.clone(),
        None => return String::new(),
    };
    for id in &ids[1..] {
        let shared = prefix
            .chars()
            .zip(id.chars())
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(shared);
        if prefix.is_empty() {
            break;
        }
    }
    prefix
}

/// Canonical persisted field order: `id`, the rest lexicographically, then
/// the timestamps.
pub fn canonicalize(doc: &Document) -> Document {
    let mut out = Document::with_capacity(doc.len());

    if let Some(id) = doc.get("id") {
        out.insert("id".to_string(), id.clone());
    }

    let mut fields: Vec<&String> = doc
        .keys()
        .filter(|k| !matches!(k.as_str(), "id" | "createdAt" | "updatedAt"))
        .collect();
    fields.sort();
    for field in fields {
        if let Some(value) = doc.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }

    for field in ["createdAt", "updatedAt"] {
        if let Some(value) = doc.get(field) {
            out.insert(field.to_string(), value.clone());
        }
    }

    out
}
