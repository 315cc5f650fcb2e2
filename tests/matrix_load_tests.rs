mod common;

use common::*;
use matrixdata::query::{Filter, QueryBuilder, QueryDescriptor};
use matrixdata::naming::NamingResolver;
use matrixdata::{ColumnEntity, MatrixError, RowEntity, ServiceOptions};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_question_study_scenario() {
    let platform = question_study_platform();
    let service = service(&platform);

    let matrix = service
        .load_initial_matrix_data(&question_study_config(), None)
        .await
        .unwrap();

    assert_eq!(matrix.rows.len(), 2);
    assert_eq!(matrix.columns.len(), 2);
    assert_eq!(matrix.junctions.len(), 1);
    assert_eq!(matrix.total_row_count, 2);
    assert_eq!(matrix.total_column_count, 2);
    assert!(!matrix.has_more_rows);
    assert!(!matrix.has_more_columns);
    assert!(matrix.can_edit);
    assert_eq!(matrix.hidden_column_count, 0);
    assert!(matrix.version_analysis.is_none());

    let junction = &matrix.junctions[0];
    assert_eq!((junction.row_id.as_str(), junction.column_id.as_str()), ("q1", "s1"));

    let cell = matrix.cell_state("q1", "s1");
    assert!(cell.is_assigned);
    assert_eq!(cell.junction_id(), Some("l1"));
    let empty = matrix.cell_state("q2", "s1");
    assert!(!empty.is_assigned);
    assert_eq!(empty.junction_id(), None);
}

#[tokio::test]
async fn test_junctions_reference_loaded_entities_only() {
    let platform = question_study_platform();
    link(&platform, "l2", "q9", "s1");
    link(&platform, "l3", "q2", "s9");
    link(&platform, "l1", "q1", "s1");
    platform.insert("link", record(json!({"linkid": "l4"})));

    let service = service(&platform);
    let matrix = service
        .load_initial_matrix_data(&question_study_config(), None)
        .await
        .unwrap();

    let rows = matrix.row_ids();
    let columns = matrix.column_ids();
    for junction in &matrix.junctions {
        assert!(rows.contains(junction.row_id.as_str()));
        assert!(columns.contains(junction.column_id.as_str()));
    }
    assert_eq!(matrix.junctions.len(), 1);
}

#[tokio::test]
async fn test_empty_side_makes_no_calls() {
    let platform = question_study_platform();
    let service = service(&platform);
    let config = question_study_config();
    let rows = vec![RowEntity::new("q1", "Question 1", "question")];
    let columns = vec![ColumnEntity::new("s1", "Study A", "study")];

    let junctions = service
        .load_junction_records_for_entities(&config, &[], &columns)
        .await
        .unwrap();
    assert!(junctions.is_empty());

    let junctions = service
        .load_junction_records_for_entities(&config, &rows, &[])
        .await
        .unwrap();
    assert!(junctions.is_empty());
    assert_eq!(platform.total_calls(), 0);
}

#[tokio::test]
async fn test_repeated_load_served_from_cache() {
    let platform = question_study_platform();
    let service = service(&platform);
    let config = question_study_config();

    let first = service.load_initial_matrix_data(&config, None).await.unwrap();
    assert_eq!(platform.call_count("retrieve_multiple"), 3);
    assert_eq!(platform.call_count("can_write"), 1);

    platform.reset_calls();
    let second = service.load_initial_matrix_data(&config, None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(platform.total_calls(), 0);

    let cache = service.get_service_stats().cache;
    assert_eq!(cache.hits, 3);
    assert_eq!(cache.misses, 3);
}

#[tokio::test]
async fn test_clear_cache_refetches_everything() {
    let platform = question_study_platform();
    let service = service(&platform);
    let config = question_study_config();

    service.load_initial_matrix_data(&config, None).await.unwrap();
    platform.reset_calls();

    service.clear_cache();
    service.load_initial_matrix_data(&config, None).await.unwrap();

    assert_eq!(platform.call_count("retrieve_multiple"), 3);
    assert_eq!(platform.call_count("can_write"), 1);
    let cache = service.get_service_stats().cache;
    assert_eq!(cache.hits, 0);
    assert_eq!(cache.misses, 6);
}

#[tokio::test]
async fn test_pages_are_disjoint_and_ordered() {
    let platform = Arc::new(matrixdata::InMemoryPlatform::new());
    for (id, name) in [("q5", "E"), ("q3", "C"), ("q1", "A"), ("q4", "D"), ("q2", "B")] {
        platform.insert("question", record(json!({"questionid": id, "name": name})));
    }
    platform.insert("study", record(json!({"studyid": "s1", "name": "Study A"})));
    let service = service_with(&platform, ServiceOptions::default().page_size(2));
    let config = question_study_config();

    let matrix = service.load_initial_matrix_data(&config, None).await.unwrap();
    assert_eq!(matrix.total_row_count, 5);
    assert!(matrix.has_more_rows);

    let mut seen: Vec<String> = matrix.rows.iter().map(|r| r.id.clone()).collect();
    let mut offset = seen.len();
    loop {
        let page = service.load_more_rows(&config, offset, None).await.unwrap();
        assert_eq!(page.offset, offset);
        assert_eq!(page.total_count, 5);
        seen.extend(page.items.iter().map(|r| r.id.clone()));
        offset = page.next_offset();
        if !page.has_more {
            break;
        }
    }
    assert_eq!(seen, vec!["q1", "q2", "q3", "q4", "q5"]);
}

#[tokio::test]
async fn test_column_pages_are_disjoint_and_ordered() {
    let platform = Arc::new(matrixdata::InMemoryPlatform::new());
    platform.insert("question", record(json!({"questionid": "q1", "name": "Question 1"})));
    for (id, name) in [("s4", "D"), ("s2", "B"), ("s5", "E"), ("s1", "A"), ("s3", "C")] {
        platform.insert("study", record(json!({"studyid": id, "name": name})));
    }
    let service = service_with(&platform, ServiceOptions::default().page_size(2));
    let config = question_study_config();

    let matrix = service.load_initial_matrix_data(&config, None).await.unwrap();
    assert_eq!(matrix.total_column_count, 5);
    assert!(matrix.has_more_columns);

    let mut seen: Vec<String> = matrix.columns.iter().map(|c| c.id.clone()).collect();
    let mut offset = seen.len();
    loop {
        let page = service.load_more_columns(&config, offset, None).await.unwrap();
        assert_eq!(page.offset, offset);
        assert_eq!(page.total_count, 5);
        assert!(page.items.iter().all(|c| c.entity_name == "study"));
        seen.extend(page.items.iter().map(|c| c.id.clone()));
        offset = page.next_offset();
        if !page.has_more {
            break;
        }
    }
    assert_eq!(seen, vec!["s1", "s2", "s3", "s4", "s5"]);

    let err = service.load_more_columns(&config, 3, None).await.unwrap_err();
    assert!(matches!(err, MatrixError::InvalidQuery(_)));
}

#[tokio::test]
async fn test_later_column_pages_hide_superseded_versions() {
    let platform = Arc::new(matrixdata::InMemoryPlatform::new());
    platform.insert("question", record(json!({"questionid": "q1", "name": "Question 1"})));
    platform.insert("study", record(json!({"studyid": "s1", "name": "A", "versionno": 1})));
    platform.insert(
        "study",
        record(json!({"studyid": "s2", "name": "B", "_parentstudy_value": "s1", "versionno": 2})),
    );
    platform.insert("study", record(json!({"studyid": "s3", "name": "C", "versionno": 1})));
    platform.insert(
        "study",
        record(json!({"studyid": "s4", "name": "D", "_parentstudy_value": "s3", "versionno": 2})),
    );
    platform.insert("study", record(json!({"studyid": "s5", "name": "E"})));
    let config = question_study_config().version_fields("parentstudy", "versionno");
    let service = service_with(&platform, ServiceOptions::default().page_size(2));

    let page = service.load_more_columns(&config, 2, None).await.unwrap();
    let ids: Vec<&str> = page.items.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["s4"]);
    assert_eq!(page.items[0].version_parent_id.as_deref(), Some("s3"));
    assert_eq!(page.items[0].version_number, Some(2));
    // The raw total still counts superseded versions, and the hidden s3
    // still advances the window.
    assert_eq!(page.total_count, 5);
    assert!(page.has_more);
    assert_eq!(page.fetched, 2);
    assert_eq!(page.next_offset(), 4);

    let last = service
        .load_more_columns(&config, page.next_offset(), None)
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].id, "s5");
    assert!(!last.has_more);
}

#[tokio::test]
async fn test_misaligned_offset_rejected() {
    let platform = question_study_platform();
    let service = service_with(&platform, ServiceOptions::default().page_size(2));

    let err = service
        .load_more_rows(&question_study_config(), 3, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MatrixError::InvalidQuery(_)));
    assert_eq!(platform.total_calls(), 0);
}

#[tokio::test]
async fn test_parent_scopes_rows() {
    let platform = question_study_platform();
    platform.insert(
        "question",
        record(json!({"questionid": "q3", "name": "Question 3", "_survey_value": "v2"})),
    );
    let config = question_study_config().parent_fields(Some("survey"), None);
    let service = service(&platform);

    let matrix = service.load_initial_matrix_data(&config, Some("v2")).await.unwrap();
    assert_eq!(matrix.rows.len(), 1);
    assert_eq!(matrix.rows[0].id, "q3");
    assert_eq!(matrix.rows[0].parent_id.as_deref(), Some("v2"));
    assert_eq!(matrix.total_row_count, 1);
}

#[tokio::test]
async fn test_version_chains_hide_superseded_columns() {
    let platform = question_study_platform();
    platform.insert(
        "study",
        record(json!({"studyid": "s3", "name": "Study A v2", "_parentstudy_value": "s1", "versionno": 2})),
    );
    link(&platform, "l2", "q2", "s3");
    let config = question_study_config().version_fields("parentstudy", "versionno");
    let service = service(&platform);

    let matrix = service.load_initial_matrix_data(&config, None).await.unwrap();

    let visible: Vec<&str> = matrix.columns.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(visible, vec!["s3", "s2"]);
    assert_eq!(matrix.raw_columns.len(), 3);
    assert_eq!(matrix.hidden_column_count, 1);
    assert_eq!(pairs(&matrix.junctions), vec![("q2".to_string(), "s3".to_string())]);

    let analysis = matrix.version_analysis.unwrap();
    assert_eq!(analysis.versioned_chains, 1);
    assert_eq!(analysis.standalone, 1);
    assert_eq!(analysis.longest_chain, 2);
}

#[tokio::test]
async fn test_totals_counted_when_not_reported() {
    let platform = question_study_platform();
    platform.set_report_totals(false);
    let service = service(&platform);

    let matrix = service
        .load_initial_matrix_data(&question_study_config(), None)
        .await
        .unwrap();
    assert_eq!(matrix.total_row_count, 2);
    assert_eq!(matrix.total_column_count, 2);
    assert_eq!(platform.call_count("retrieve_multiple"), 5);
}

#[tokio::test]
async fn test_bulk_strategy_filters_client_side() {
    let platform = question_study_platform();
    platform.insert("question", record(json!({"questionid": "q3", "name": "Question 3"})));
    link(&platform, "l2", "q3", "s2");
    link(&platform, "l3", "q2", "s2");
    let options = ServiceOptions::default().page_size(2).bulk_threshold(1);
    let service = service_with(&platform, options);

    let matrix = service
        .load_initial_matrix_data(&question_study_config(), None)
        .await
        .unwrap();

    assert_eq!(
        pairs(&matrix.junctions),
        vec![
            ("q1".to_string(), "s1".to_string()),
            ("q2".to_string(), "s2".to_string())
        ]
    );
}

#[tokio::test]
async fn test_batched_chunks_shrink_to_fit_url_limit() {
    let platform = question_study_platform();
    let config = question_study_config();

    let options = ServiceOptions::default();
    let builder = QueryBuilder::new(Arc::new(NamingResolver::from_options(&options)), &options);
    let single = QueryDescriptor::new("link")
        .attribute("linkid")
        .attribute("question")
        .attribute("study")
        .order_by("linkid", false)
        .active_only()
        .filter(Filter::in_list("question", ["q1"]))
        .page(0, 5_000);
    let limit = builder.build(&single).unwrap().url_length;

    let service = service_with(&platform, options.max_url_length(limit));
    let rows = vec![
        RowEntity::new("q1", "Question 1", "question"),
        RowEntity::new("q2", "Question 2", "question"),
    ];
    let columns = vec![
        ColumnEntity::new("s1", "Study A", "study"),
        ColumnEntity::new("s2", "Study B", "study"),
    ];

    let junctions = service
        .load_junction_records_for_entities(&config, &rows, &columns)
        .await
        .unwrap();
    assert_eq!(pairs(&junctions), vec![("q1".to_string(), "s1".to_string())]);
    assert_eq!(platform.call_count("retrieve_multiple"), 2);
}

#[tokio::test]
async fn test_column_status_gates_interaction() {
    let platform = Arc::new(matrixdata::InMemoryPlatform::new());
    platform.insert("question", record(json!({"questionid": "q1", "name": "Question 1"})));
    platform.insert("study", record(json!({"studyid": "s1", "name": "Draft", "stage": 1})));
    platform.insert("study", record(json!({"studyid": "s2", "name": "Published", "stage": 2})));
    let config = question_study_config().status_field("stage");
    let service = service(&platform);

    let matrix = service.load_initial_matrix_data(&config, None).await.unwrap();
    assert!(matrix.cell_state("q1", "s1").is_interactable);
    assert!(!matrix.cell_state("q1", "s2").is_interactable);

    platform.set_writable(false);
    service.clear_cache();
    let matrix = service.load_initial_matrix_data(&config, None).await.unwrap();
    assert!(!matrix.can_edit);
    assert!(!matrix.cell_state("q1", "s1").is_interactable);
}

#[tokio::test]
async fn test_invalid_config_fails_before_any_call() {
    let platform = question_study_platform();
    let service = service(&platform);
    let config = question_study_config().junction_fields("", "study");

    let err = service.load_initial_matrix_data(&config, None).await.unwrap_err();
    assert!(matches!(err, MatrixError::Configuration(ref msg) if msg.contains("junctionRowField")));

    let config = question_study_config().display_fields("full name", "name");
    assert!(service.load_initial_matrix_data(&config, None).await.is_err());
    assert_eq!(platform.total_calls(), 0);
}

#[tokio::test]
async fn test_transport_failure_is_translated() {
    let platform = question_study_platform();
    platform.fail_on(
        "retrieve_multiple",
        Some("study"),
        None,
        matrixdata::PlatformError::new("service unavailable").with_status(503),
    );
    let service = service(&platform);

    let err = service
        .load_initial_matrix_data(&question_study_config(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MatrixError::Transport { status: Some(503), retryable: true, .. }));

    let stats = service.operation_stats();
    let load = stats.iter().find(|s| s.name == "load_initial_data").unwrap();
    assert_eq!(load.errors, 1);
}

#[tokio::test]
async fn test_publisher_prefix_resolves_physical_names() {
    let platform = Arc::new(matrixdata::InMemoryPlatform::new());
    platform.insert("cr_question", record(json!({"cr_questionid": "q1", "cr_name": "Question 1"})));
    platform.insert("cr_study", record(json!({"cr_studyid": "s1", "cr_name": "Study A"})));
    platform.insert(
        "cr_link",
        record(json!({"cr_linkid": "l1", "_cr_question_value": "q1", "_cr_study_value": "s1"})),
    );
    let service = service_with(&platform, ServiceOptions::default().publisher_prefix("cr_"));

    let matrix = service
        .load_initial_matrix_data(&question_study_config(), None)
        .await
        .unwrap();
    assert_eq!(matrix.rows[0].display_name, "Question 1");
    assert_eq!(matrix.rows[0].entity_name, "question");
    assert_eq!(matrix.junctions.len(), 1);
}

#[tokio::test]
async fn test_destroyed_service_rejects_calls() {
    let platform = question_study_platform();
    let service = service(&platform);
    service.destroy();

    assert!(service.is_destroyed());
    let err = service
        .load_initial_matrix_data(&question_study_config(), None)
        .await
        .unwrap_err();
    assert_eq!(err, MatrixError::ServiceDestroyed);
    assert_eq!(platform.total_calls(), 0);
}
