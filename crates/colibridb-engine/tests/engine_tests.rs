//! End-to-end tests of the engine surface: insert/find/update/delete,
//! pagination, indexes, and the response envelope contract.

use tempfile::TempDir;

use colibridb_engine::{Config, Engine, FindOptions, PaginateOptions, UpdateReturn, Value};

fn v(json: serde_json::Value) -> Value {
    Value::from_json(json)
}

async fn open_engine(dir: &TempDir) -> Engine {
    let config = Config {
        storage_path: dir.path().join("storage"),
        save_delay_ms: 10,
        debug: false,
    };
    Engine::open(config).await.expect("engine opens")
}

#[tokio::test]
async fn basic_insert_and_find() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let receipt = engine
        .insert("users", vec![v(serde_json::json!({"name": "Alice", "age": 30}))])
        .await;
    assert!(receipt.success);
    let receipt = receipt.data.unwrap();
    assert_eq!(receipt.inserted_count, 1);
    assert_eq!(receipt.updated_count, 0);

    let ids = receipt.inserted_ids.unwrap();
    assert_eq!(ids[0].len(), 16);
    assert!(ids[0].chars().all(|c| c.is_ascii_hexdigit()));

    let found = engine
        .find("users", v(serde_json::json!({})), FindOptions::default())
        .await;
    assert!(found.success);
    let docs = found.data.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["name"], Value::String("Alice".into()));
    assert_eq!(docs[0]["createdAt"], docs[0]["updatedAt"]);
}

#[tokio::test]
async fn batch_insert_id_shape() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let docs: Vec<Value> = (0..30).map(|n| v(serde_json::json!({"n": n}))).collect();
    let receipt = engine.insert("batch", docs).await.data.unwrap();

    assert_eq!(receipt.inserted_count, 30);
    let prefix = receipt.prefix.unwrap();
    assert_eq!(receipt.first_id.unwrap(), format!("{prefix}1"));
    assert_eq!(receipt.last_id.unwrap(), format!("{prefix}30"));
    assert!(prefix.ends_with('_'));

    // Insertion order is preserved by an unfiltered find
    let found = engine
        .find("batch", v(serde_json::json!({})), FindOptions::default())
        .await
        .data
        .unwrap();
    let ns: Vec<f64> = found.iter().map(|d| d["n"].as_f64().unwrap()).collect();
    assert_eq!(ns, (0..30).map(f64::from).collect::<Vec<_>>());
}

#[tokio::test]
async fn complex_filter_matches_one() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    engine
        .insert(
            "accounts",
            vec![
                v(serde_json::json!({"active": true, "score": 1200, "tags": ["vip", "beta"]})),
                v(serde_json::json!({"active": false, "score": 1500, "tags": ["vip"]})),
                v(serde_json::json!({"active": true, "score": 800, "tags": ["vip"]})),
                v(serde_json::json!({"active": true, "score": 2000, "tags": ["free"]})),
                v(serde_json::json!({"active": true, "score": 999, "tags": []})),
            ],
        )
        .await;

    let filter = v(serde_json::json!({
        "active": true,
        "score": {"$gte": 1000},
        "tags": "vip"
    }));
    assert_eq!(engine.count("accounts", filter.clone()).await.data, Some(1));

    let found = engine
        .find("accounts", filter, FindOptions::default())
        .await
        .data
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["score"], Value::Number(1200.0));
}

#[tokio::test]
async fn dotted_update_by_id() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    engine
        .insert(
            "users",
            vec![v(serde_json::json!({"id": "u1", "stats": {"views": 10}, "name": "a"}))],
        )
        .await;
    let before = engine.find_by_id("users", "u1").await.data.unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    let receipt = engine
        .update_by_id(
            "users",
            "u1",
            v(serde_json::json!({"$set": {"stats.views": 50}})),
            UpdateReturn::default(),
        )
        .await;
    assert!(receipt.success);
    assert_eq!(receipt.data.unwrap().updated_count, 1);

    let after = engine.find_by_id("users", "u1").await.data.unwrap();
    assert_eq!(after["stats"]["views"], Value::Number(50.0));
    assert_eq!(after["name"], before["name"]);
    assert_eq!(after["createdAt"], before["createdAt"]);
    // ISO-8601 strings compare chronologically
    assert!(after["updatedAt"].as_str().unwrap() > before["updatedAt"].as_str().unwrap());
}

#[tokio::test]
async fn upsert_preserves_created_at_and_reports_updated() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let first = engine
        .insert(
            "users",
            vec![v(serde_json::json!({"id": "u1", "name": "Alice", "score": 100}))],
        )
        .await
        .data
        .unwrap();
    assert_eq!(first.inserted_count, 1);
    let created = engine.find_by_id("users", "u1").await.data.unwrap()["createdAt"].clone();

    let second = engine
        .insert(
            "users",
            vec![v(serde_json::json!({"id": "u1", "name": "Alice Updated", "score": 200}))],
        )
        .await
        .data
        .unwrap();
    assert_eq!(second.inserted_count, 0);
    assert_eq!(second.updated_count, 1);

    let doc = engine.find_by_id("users", "u1").await.data.unwrap();
    assert_eq!(doc["name"], Value::String("Alice Updated".into()));
    assert_eq!(doc["createdAt"], created);

    assert_eq!(engine.count("users", v(serde_json::json!({}))).await.data, Some(1));
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;
    let payload = serde_json::json!({"id": "x", "k": 1});

    engine.insert("c", vec![v(payload.clone())]).await;
    let created = engine.find_by_id("c", "x").await.data.unwrap()["createdAt"].clone();

    let receipt = engine.insert("c", vec![v(payload)]).await.data.unwrap();
    assert_eq!(receipt.inserted_count, 0);
    assert_eq!(receipt.updated_count, 1);

    let doc = engine.find_by_id("c", "x").await.data.unwrap();
    assert_eq!(doc["createdAt"], created);
    assert_eq!(engine.count("c", v(serde_json::json!({}))).await.data, Some(1));
}

#[tokio::test]
async fn paginate_past_the_end() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let docs: Vec<Value> = (0..50).map(|n| v(serde_json::json!({"n": n}))).collect();
    engine.insert("pages", docs).await;

    let page = engine
        .paginate(
            "pages",
            v(serde_json::json!({})),
            PaginateOptions {
                page: 999,
                limit: 10,
                sort: None,
            },
        )
        .await;
    assert!(page.success);
    let page = page.data.unwrap();
    assert!(page.data.is_empty());
    assert_eq!(page.pagination.total_pages, 5);
    assert!(!page.pagination.has_next);
    assert!(page.pagination.has_prev);
}

#[tokio::test]
async fn count_agrees_with_unbounded_find() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let docs: Vec<Value> = (0..25)
        .map(|n| v(serde_json::json!({"n": n, "bucket": n % 3})))
        .collect();
    engine.insert("nums", docs).await;
    engine
        .delete("nums", v(serde_json::json!({"n": {"$gte": 20}})))
        .await;
    engine
        .update(
            "nums",
            v(serde_json::json!({"bucket": 0})),
            v(serde_json::json!({"$set": {"bucket": 3}})),
            UpdateReturn::default(),
        )
        .await;

    for filter in [
        serde_json::json!({}),
        serde_json::json!({"bucket": 3}),
        serde_json::json!({"n": {"$lt": 10}}),
    ] {
        let count = engine.count("nums", v(filter.clone())).await.data.unwrap();
        let mut options = FindOptions::default();
        options.limit = Some(Value::String("all".into()));
        let found = engine.find("nums", v(filter), options).await.data.unwrap();
        assert_eq!(count as usize, found.len());
    }
}

#[tokio::test]
async fn empty_find_reports_404_with_empty_data() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;
    engine.insert("c", vec![v(serde_json::json!({"a": 1}))]).await;

    let found = engine
        .find("c", v(serde_json::json!({"a": 99})), FindOptions::default())
        .await;
    assert!(!found.success);
    assert_eq!(found.code(), Some(404));
    assert_eq!(found.data.unwrap().len(), 0);

    // count of zero stays a success
    let count = engine.count("c", v(serde_json::json!({"a": 99}))).await;
    assert!(count.success);
    assert_eq!(count.data, Some(0));

    // zero-match update and delete stay successes too
    let update = engine
        .update(
            "c",
            v(serde_json::json!({"a": 99})),
            v(serde_json::json!({"$set": {"b": 1}})),
            UpdateReturn::default(),
        )
        .await;
    assert!(update.success);
    assert_eq!(update.data.unwrap().updated_count, 0);

    let delete = engine.delete("c", v(serde_json::json!({"a": 99}))).await;
    assert!(delete.success);
    assert_eq!(delete.data.unwrap().deleted_count, 0);
}

#[tokio::test]
async fn unknown_id_operations_are_404() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;
    engine.insert("c", vec![v(serde_json::json!({"a": 1}))]).await;

    assert_eq!(engine.find_by_id("c", "ghost").await.code(), Some(404));
    assert_eq!(
        engine
            .update_by_id("c", "ghost", v(serde_json::json!({"a": 2})), UpdateReturn::default())
            .await
            .code(),
        Some(404)
    );
    assert_eq!(engine.delete_by_id("c", "ghost").await.code(), Some(404));
}

#[tokio::test]
async fn invalid_inputs_are_400() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    // invalid collection names
    for name in ["", "1abc", "a.b", "a/b", "a b"] {
        let res = engine.count(name, v(serde_json::json!({}))).await;
        assert_eq!(res.code(), Some(400), "name {name:?} should be rejected");
    }

    // non-object filter
    let res = engine.count("c", v(serde_json::json!([1, 2]))).await;
    assert_eq!(res.code(), Some(400));

    // negative skip
    let mut options = FindOptions::default();
    options.skip = Some(Value::Number(-1.0));
    engine.insert("c", vec![v(serde_json::json!({"a": 1}))]).await;
    let res = engine.find("c", v(serde_json::json!({})), options).await;
    assert_eq!(res.code(), Some(400));

    // bad paginate page
    let res = engine
        .paginate(
            "c",
            v(serde_json::json!({})),
            PaginateOptions { page: 0, limit: 10, sort: None },
        )
        .await;
    assert_eq!(res.code(), Some(400));
}

#[tokio::test]
async fn sort_skip_limit_projection_pipeline() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let docs: Vec<Value> = (0..10)
        .map(|n| v(serde_json::json!({"n": n, "tag": "x", "nested": {"deep": n * 2}})))
        .collect();
    engine.insert("c", docs).await;

    let mut options = FindOptions::default();
    options.sort = Some(v(serde_json::json!({"n": -1})));
    options.skip = Some(Value::Number(2.0));
    options.limit = Some(Value::Number(3.0));
    options.projection = Some(v(serde_json::json!({"n": 1, "nested.deep": 1})));

    let found = engine
        .find("c", v(serde_json::json!({})), options)
        .await
        .data
        .unwrap();
    assert_eq!(found.len(), 3);
    let ns: Vec<f64> = found.iter().map(|d| d["n"].as_f64().unwrap()).collect();
    assert_eq!(ns, vec![7.0, 6.0, 5.0]);
    // projection flattens the dotted path and drops everything else
    assert_eq!(found[0]["nested.deep"], Value::Number(14.0));
    assert!(found[0].get("tag").is_none());
}

#[tokio::test]
async fn update_returns_ids_and_documents_with_cap() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let docs: Vec<Value> = (0..5)
        .map(|n| v(serde_json::json!({"id": format!("d{n}"), "n": n})))
        .collect();
    engine.insert("c", docs).await;

    let receipt = engine
        .update(
            "c",
            v(serde_json::json!({})),
            v(serde_json::json!({"$inc": {"n": 100}})),
            UpdateReturn {
                return_ids: true,
                return_documents: true,
                max_return: 3,
            },
        )
        .await
        .data
        .unwrap();
    assert_eq!(receipt.updated_count, 5);
    assert_eq!(receipt.updated_ids.unwrap().len(), 3);
    assert_eq!(receipt.documents.unwrap().len(), 3);
    assert!(receipt.truncated);
}

#[tokio::test]
async fn create_index_conflicts_and_survives_writes() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    engine
        .insert(
            "places",
            vec![
                v(serde_json::json!({"id": "p1", "city": "Kigali", "zip": 100})),
                v(serde_json::json!({"id": "p2", "city": "Huye", "zip": 200})),
            ],
        )
        .await;

    let created = engine
        .create_index("places", v(serde_json::json!({"name": "geo", "fields": {"city": 1, "zip": 1}})))
        .await;
    assert!(created.success);
    assert_eq!(created.data.unwrap(), "geo");

    let duplicate = engine
        .create_index("places", v(serde_json::json!({"name": "geo", "fields": {"city": 1}})))
        .await;
    assert_eq!(duplicate.code(), Some(409));

    // Index maintenance across mutations keeps stats consistent
    engine.delete_by_id("places", "p1").await;
    engine
        .insert("places", vec![v(serde_json::json!({"id": "p3", "city": "Musanze", "zip": 300}))])
        .await;
    let stats = engine.stats("places").await.data.unwrap();
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.indexes, vec!["geo".to_string()]);
}

#[tokio::test]
async fn list_collections_reports_memory_and_disk() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    engine.insert("alpha", vec![v(serde_json::json!({"a": 1}))]).await;
    engine.insert("beta", vec![v(serde_json::json!({"b": 1}))]).await;
    engine.close().await.unwrap();

    // A fresh engine sees the snapshots without loading them
    let engine = open_engine(&dir).await;
    let names = engine.list_collections().await.data.unwrap();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}
