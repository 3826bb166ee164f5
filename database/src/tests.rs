#[cfg(test)]
mod tests {
    use crate::Database;
    use chrono::{TimeZone, Utc};
    use gleaner_core::{
        Comment, ExtractedItem, ItemKind, ItemMetadata, ItemRef, PersistenceError, ResultSink,
    };
    use std::env;
    use std::time::Duration;

    async fn setup_test_db() -> Database {
        let db_path = env::temp_dir().join(format!("test_gleaner_{}.db", uuid::Uuid::new_v4()));
        let db_url = format!("sqlite://{}", db_path.display());

        let mut db = Database::new(db_url);
        db.connect()
            .await
            .expect("Failed to connect to test database");
        db.run_migrations().await.expect("Failed to run migrations");

        db
    }

    fn item(id: &str, likes: u64, comments: Vec<Comment>) -> ExtractedItem {
        let item_ref = ItemRef::new(id, ItemKind::Post, format!("https://example.com/p/{}", id));
        let metadata = ItemMetadata {
            author: "someone".to_string(),
            content: format!("content {}", id),
            likes,
            comment_count: comments.len() as u64,
        };
        ExtractedItem::from_parts(&item_ref, metadata, comments)
    }

    #[tokio::test]
    async fn test_database_connection_and_migrations() {
        let db = setup_test_db().await;

        // Migrations are idempotent
        db.run_migrations().await.expect("Failed to rerun migrations");
        assert_eq!(db.item_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unconnected_database_reports_error() {
        let db = Database::new("sqlite::memory:".to_string());
        assert!(matches!(
            db.get_items().await,
            Err(PersistenceError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_items_round_trip_with_comments() {
        let db = setup_test_db().await;
        let posted = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let original = item(
            "A",
            7,
            vec![
                Comment::new("ana", "first").at(posted),
                Comment::new("ben", "second"),
            ],
        );

        db.upsert_items(std::slice::from_ref(&original))
            .await
            .expect("Failed to save items");

        let loaded = db.get_item("A").await.unwrap().expect("item missing");
        assert_eq!(loaded.likes, 7);
        assert_eq!(loaded.kind, ItemKind::Post);
        assert_eq!(loaded.comments.len(), 2);
        assert_eq!(loaded.comments[0].timestamp, Some(posted));
        assert_eq!(loaded.comments[1].timestamp, None);
        assert_eq!(loaded.timestamp.timestamp(), original.timestamp.timestamp());

        assert!(db.get_item("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_item_id() {
        let db = setup_test_db().await;

        db.persist(&[
            item("A", 1, vec![Comment::new("ana", "old one"), Comment::new("ana", "old two")]),
            item("B", 2, Vec::new()),
        ])
        .await
        .unwrap();

        // A second flush of a grown result set rewrites the earlier rows
        db.persist(&[
            item("A", 10, vec![Comment::new("cy", "new")]),
            item("B", 2, Vec::new()),
            item("C", 3, Vec::new()),
        ])
        .await
        .unwrap();

        let items = db.get_items().await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(items[0].likes, 10);
        assert_eq!(items[0].comments.len(), 1);
        assert_eq!(items[0].comments[0].author, "cy");
        assert_eq!(db.name(), "sqlite");
    }

    #[tokio::test]
    async fn test_oversized_counts_are_rejected_without_partial_writes() {
        let db = setup_test_db().await;

        let mut huge = item("H", 0, Vec::new());
        huge.likes = u64::MAX;
        let result = db.upsert_items(&[item("A", 1, Vec::new()), huge]).await;

        assert!(matches!(result, Err(PersistenceError::QueryFailed { .. })));
        // The whole batch rolls back
        assert_eq!(db.item_count().await.unwrap(), 0);

        let mut largest = item("M", 0, Vec::new());
        largest.likes = i64::MAX as u64;
        db.upsert_items(&[largest]).await.unwrap();
        assert_eq!(db.get_item("M").await.unwrap().unwrap().likes, i64::MAX as u64);
    }

    #[tokio::test]
    async fn test_write_contention_reports_database_locked() {
        let db_path = env::temp_dir().join(format!("test_gleaner_{}.db", uuid::Uuid::new_v4()));
        let db_url = format!("sqlite://{}", db_path.display());

        let holder = Database::open(db_url.clone()).await.unwrap();
        let mut contender = Database::new(db_url).with_busy_timeout(Duration::ZERO);
        contender.connect().await.unwrap();

        // Another writer holds the write lock
        let mut tx = holder.pool().unwrap().begin().await.unwrap();
        sqlx::query(
            "INSERT INTO items (item_id, kind, author, content, likes, comment_count, url, extracted_at) \
             VALUES ('X', 'post', 'a', 'b', 0, 0, 'https://example.com/p/X', '2024-05-01T10:00:00+00:00')",
        )
        .execute(&mut *tx)
        .await
        .unwrap();

        let blocked = contender.upsert_items(&[item("A", 1, Vec::new())]).await;
        assert!(matches!(blocked, Err(PersistenceError::DatabaseLocked)));

        tx.rollback().await.unwrap();
        assert_eq!(contender.upsert_items(&[item("A", 1, Vec::new())]).await.unwrap(), 1);
        assert_eq!(holder.item_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_custom_kind_survives_storage() {
        let db = Database::open(format!(
            "sqlite://{}",
            env::temp_dir()
                .join(format!("test_gleaner_{}.db", uuid::Uuid::new_v4()))
                .display()
        ))
        .await
        .unwrap();

        let item_ref = ItemRef::new("S1", ItemKind::from("story"), "https://example.com/s/S1");
        let story = ExtractedItem::from_parts(&item_ref, ItemMetadata::default(), Vec::new());
        db.upsert_items(&[story]).await.unwrap();

        let loaded = db.get_item("S1").await.unwrap().unwrap();
        assert_eq!(loaded.kind, ItemKind::Other("story".to_string()));
        assert_eq!(serde_json::to_value(&loaded.kind).unwrap(), "story");
    }
}
