use std::sync::Arc;
use std::time::Duration;

use crate::content::ContentLibrary;
use crate::test::utils::{create_standard_builder, TestDbBuilder, TestLearningItem};

#[rocket::async_test]
async fn lookup_by_identifier() {
    let test_db = create_standard_builder()
        .build()
        .await
        .expect("Failed to build test DB");
    let library = ContentLibrary::load(&test_db.pool).await.unwrap();

    let item = library.get_by_identifier("MATH-001").expect("Item should exist");
    assert_eq!(item.subject, "math");
    assert_eq!(item.total_goals, 5);

    assert!(library.get_by_identifier("NOPE-999").is_none());
}

#[rocket::async_test]
async fn identifiers_are_sorted_ascending() {
    let test_db = TestDbBuilder::new()
        .learning_item("SCI-001", "science", (1, 0, 0))
        .learning_item("MATH-002", "math", (1, 0, 0))
        .learning_item("MATH-001", "math", (1, 0, 0))
        .build()
        .await
        .expect("Failed to build test DB");
    let library = ContentLibrary::load(&test_db.pool).await.unwrap();

    assert_eq!(library.identifiers(), vec!["MATH-001", "MATH-002", "SCI-001"]);
}

#[rocket::async_test]
async fn stats_sum_goals_across_items() {
    let test_db = create_standard_builder()
        .build()
        .await
        .expect("Failed to build test DB");
    let library = ContentLibrary::load(&test_db.pool).await.unwrap();

    let stats = library.stats();
    assert_eq!(stats.total_identifiers, 3);
    // 5 (MATH-001) + 3 (MATH-002) + 3 (SCI-001)
    assert_eq!(stats.total_goals, 11);
    assert_eq!(stats.error_count, 0);
}

#[rocket::async_test]
async fn malformed_content_is_tolerated_and_counted() {
    let test_db = TestDbBuilder::new()
        .learning_item("MATH-001", "math", (2, 0, 0))
        .raw_learning_item(TestLearningItem {
            identifier: "BAD-001".to_string(),
            subject: "math".to_string(),
            grade: None,
            keywords: vec![],
            content_types: None,
        })
        .build()
        .await
        .expect("Failed to build test DB");

    // NULL content_types reads back as an empty string, which fails to parse
    let library = ContentLibrary::load(&test_db.pool).await.unwrap();

    let stats = library.stats();
    assert_eq!(stats.total_identifiers, 2);
    assert_eq!(stats.total_goals, 2);
    assert_eq!(stats.error_count, 1);

    let bad = library.get_by_identifier("BAD-001").expect("Item should still serve");
    assert_eq!(bad.total_goals, 0);
    assert_eq!(bad.grade, 0);
    assert!(bad.keywords.is_empty());
}

#[rocket::async_test]
async fn content_without_tracking_section_has_zero_goals() {
    let test_db = TestDbBuilder::new()
        .raw_learning_item(TestLearningItem {
            identifier: "PLAIN-001".to_string(),
            subject: "math".to_string(),
            grade: Some(2),
            keywords: vec!["counting".to_string()],
            content_types: Some(serde_json::json!({"worksheet": true})),
        })
        .build()
        .await
        .expect("Failed to build test DB");
    let library = ContentLibrary::load(&test_db.pool).await.unwrap();

    let stats = library.stats();
    assert_eq!(stats.error_count, 0);
    assert_eq!(stats.total_goals, 0);

    let item = library.get_by_identifier("PLAIN-001").unwrap();
    assert_eq!(item.grade, 2);
    assert_eq!(item.keywords, vec!["counting"]);
}

#[rocket::async_test]
async fn subjects_follow_curriculum_order_not_alphabetical() {
    let test_db = TestDbBuilder::new()
        .learning_item("A-001", "zoology", (1, 0, 0))
        .learning_item("B-001", "algebra", (1, 0, 0))
        .build()
        .await
        .expect("Failed to build test DB");
    let library = ContentLibrary::load(&test_db.pool).await.unwrap();

    // zoology owns the smallest identifier so it comes first
    let subjects = library.subjects(&test_db.pool).await.unwrap();
    assert_eq!(subjects, vec!["zoology", "algebra"]);
}

#[rocket::async_test]
async fn subject_groups_keep_item_order_within_group() {
    let test_db = create_standard_builder()
        .build()
        .await
        .expect("Failed to build test DB");
    let library = ContentLibrary::load(&test_db.pool).await.unwrap();

    let groups = library.subject_groups(&test_db.pool).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].subject, "math");
    let math_ids: Vec<&str> = groups[0].items.iter().map(|i| i.identifier.as_str()).collect();
    assert_eq!(math_ids, vec!["MATH-001", "MATH-002"]);
    assert_eq!(groups[1].subject, "science");
}

#[rocket::async_test]
async fn subject_grouping_is_cached_within_ttl() {
    let test_db = create_standard_builder()
        .build()
        .await
        .expect("Failed to build test DB");
    let library = ContentLibrary::load_with_ttl(&test_db.pool, Duration::from_secs(300))
        .await
        .unwrap();

    let first = library.subject_groups(&test_db.pool).await.unwrap();
    let second = library.subject_groups(&test_db.pool).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[rocket::async_test]
async fn subject_grouping_recomputes_after_ttl() {
    let test_db = create_standard_builder()
        .build()
        .await
        .expect("Failed to build test DB");
    let library = ContentLibrary::load_with_ttl(&test_db.pool, Duration::ZERO)
        .await
        .unwrap();

    let first = library.subject_groups(&test_db.pool).await.unwrap();
    let second = library.subject_groups(&test_db.pool).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.len(), second.len());
}
