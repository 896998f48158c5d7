use std::time::Duration;

use bson::{Bson, doc};
use tempfile::TempDir;

use fakedb::prelude::*;

#[tokio::test]
async fn document_operations() {
    let db = DocumentDb::in_memory().into_async();

    let id = db
        .insert_one("events", doc! { "type": "click", "meta": { "x": 1 } })
        .await
        .unwrap();
    db.insert_one("events", doc! { "type": "view", "meta": { "x": 2 } })
        .await
        .unwrap();

    let found = db.find_one("events", Some(Filter::eq("meta.x", 1))).await.unwrap().unwrap();
    assert_eq!(found.get(ID_FIELD), Some(&id));

    let updated = db
        .update_many("events", None, Update::new().set_field("seen", true))
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(db.count_documents("events", Some(Filter::eq("seen", true))).await.unwrap(), 2);

    assert_eq!(db.delete_one("events", Some(Filter::eq("type", "view"))).await.unwrap(), 1);
    assert_eq!(db.list_collections().await.unwrap(), vec!["events".to_string()]);
}

#[tokio::test]
async fn relational_operations() {
    let db = RelationalDb::in_memory().into_async();
    db.create_table("users", TableSchema::from_pairs([("id", "int"), ("name", "str")]).unwrap())
        .await
        .unwrap();

    let id = db.insert("users", doc! { "name": "Ana" }).await.unwrap();
    assert_eq!(id, Bson::Int64(1));

    let updated = db
        .update("users", Some(Filter::eq("id", 1)), doc! { "name": "Ana Maria" })
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let rows = db.select("users", None, Some(vec!["name".to_string()])).await.unwrap();
    assert_eq!(rows, vec![doc! { "name": "Ana Maria" }]);

    let err = db.insert("missing", doc! {}).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_against_one_snapshot() {
    let dir = TempDir::new().unwrap();
    let db = DatabaseOptions::named(dir.path(), "tasks")
        .unwrap()
        .lock_timeout(Duration::from_secs(30))
        .build()
        .open_document()
        .into_async();

    let tasks = (0..10)
        .map(|task| {
            let db = db.clone();
            tokio::spawn(async move {
                for n in 0..5 {
                    db.insert_one("jobs", doc! { "task": task, "n": n }).await.unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(db.count_documents("jobs", None).await.unwrap(), 50);
    assert_eq!(db.blocking().count_documents("jobs", Some(&Filter::eq("task", 3))).unwrap(), 5);
}
