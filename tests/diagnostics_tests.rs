mod common;

use common::*;
use matrixdata::{InMemoryPlatform, MatrixConfig, ServiceOptions};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_healthy_mapping() {
    let platform = question_study_platform();
    link(&platform, "l2", "q2", "s2");
    let service = service(&platform);

    let diagnostics = service
        .diagnose_junction_field_mapping(&question_study_config(), 10)
        .await
        .unwrap();

    assert!(diagnostics.is_healthy());
    assert_eq!(diagnostics.sample_count, 2);
    assert_eq!(diagnostics.rows_resolved, 2);
    assert_eq!(diagnostics.columns_resolved, 2);
    assert_eq!(diagnostics.row_field, "question");
    assert!(diagnostics.samples.iter().all(|s| s.is_complete()));
    assert_eq!(
        diagnostics.candidate_fields,
        vec!["_question_value".to_string(), "_study_value".to_string()]
    );
}

#[tokio::test]
async fn test_samples_carry_every_column() {
    let platform = question_study_platform();
    platform.insert(
        "link",
        record(json!({
            "linkid": "l2",
            "_question_value": "q2",
            "_study_value": "s2",
            "_owner_value": "u1",
            "weight": 3
        })),
    );
    let service = service(&platform);

    let diagnostics = service
        .diagnose_junction_field_mapping(&question_study_config(), 10)
        .await
        .unwrap();

    // The platform answers column lists with those columns only, so the
    // sample query has to ask for everything.
    assert!(diagnostics.is_healthy());
    assert_eq!(diagnostics.rows_resolved, 2);
    assert_eq!(diagnostics.columns_resolved, 2);
    let sample = diagnostics
        .samples
        .iter()
        .find(|s| s.id.as_deref() == Some("l2"))
        .unwrap();
    assert!(sample.field_names.iter().any(|f| f == "weight"));
    assert!(sample.field_names.iter().any(|f| f == "statecode"));
    assert_eq!(
        diagnostics.candidate_fields,
        vec![
            "_owner_value".to_string(),
            "_question_value".to_string(),
            "_study_value".to_string()
        ]
    );
}

#[tokio::test]
async fn test_no_records_points_at_entity_name() {
    let platform = question_study_platform();
    let service = service(&platform);
    let config = MatrixConfig::new("question", "study", "nolink");

    let diagnostics = service.diagnose_junction_field_mapping(&config, 5).await.unwrap();

    assert_eq!(diagnostics.sample_count, 0);
    assert_eq!(diagnostics.recommendations.len(), 1);
    assert!(diagnostics.recommendations[0].contains("nolink"));
}

#[tokio::test]
async fn test_wrong_field_names_list_candidates() {
    let platform = question_study_platform();
    let service = service(&platform);
    let config = question_study_config().junction_fields("questionref", "studyref");

    let diagnostics = service.diagnose_junction_field_mapping(&config, 5).await.unwrap();

    assert!(!diagnostics.is_healthy());
    assert_eq!(diagnostics.rows_resolved, 0);
    let recommendation = &diagnostics.recommendations[0];
    assert!(recommendation.starts_with("Missing field mapping"));
    assert!(recommendation.contains("junctionRowField 'questionref'"));
    assert!(recommendation.contains("junctionColumnField 'studyref'"));
    assert!(recommendation.contains("_question_value"));
}

#[tokio::test]
async fn test_broken_junctions_dropped_on_load_and_flagged() {
    let platform = question_study_platform();
    platform.insert("link", record(json!({"linkid": "l2", "questionref": "q2"})));
    platform.insert("link", record(json!({"linkid": "l3"})));
    let service = service(&platform);
    let config = question_study_config();

    let matrix = service.load_initial_matrix_data(&config, None).await.unwrap();
    assert_eq!(matrix.junctions.len(), 1);

    let diagnostics = service.diagnose_junction_field_mapping(&config, 10).await.unwrap();
    assert_eq!(diagnostics.sample_count, 3);
    assert_eq!(diagnostics.rows_resolved, 1);
    assert!(
        diagnostics
            .recommendations
            .iter()
            .any(|r| r.starts_with("Missing field mapping"))
    );
}

#[tokio::test]
async fn test_minority_of_broken_samples_reported_as_dropped() {
    let platform = question_study_platform();
    link(&platform, "l2", "q2", "s2");
    platform.insert("link", record(json!({"linkid": "l3", "_question_value": "q2"})));
    let service = service(&platform);

    let diagnostics = service
        .diagnose_junction_field_mapping(&question_study_config(), 10)
        .await
        .unwrap();

    assert_eq!(
        diagnostics.recommendations,
        vec!["1 of 3 sampled junction records lack a row or column link and are dropped during loading".to_string()]
    );
}

#[tokio::test]
async fn test_inactive_records_are_sampled() {
    let platform = question_study_platform();
    let service = service(&platform);
    let config = question_study_config();
    service.delete_junction_record(&config, "l1").await.unwrap();

    let diagnostics = service.diagnose_junction_field_mapping(&config, 10).await.unwrap();
    assert_eq!(diagnostics.sample_count, 1);
    assert_eq!(diagnostics.samples[0].id.as_deref(), Some("l1"));
}

#[tokio::test]
async fn test_sample_size_caps_records() {
    let platform = question_study_platform();
    for i in 2..=6 {
        link(&platform, &format!("l{}", i), "q2", "s2");
    }
    let service = service(&platform);

    let diagnostics = service
        .diagnose_junction_field_mapping(&question_study_config(), 3)
        .await
        .unwrap();
    assert_eq!(diagnostics.sample_count, 3);
}

#[tokio::test]
async fn test_service_stats_reflect_activity() {
    let platform = question_study_platform();
    let service = service(&platform);
    let config = question_study_config();

    service.load_initial_matrix_data(&config, None).await.unwrap();
    service.diagnose_junction_field_mapping(&config, 5).await.unwrap();

    let stats = service.get_service_stats();
    assert!(stats.performance.operations >= 4);
    assert_eq!(stats.cache.misses, 3);
    assert!(stats.naming.schema_names_cache > 0);
    assert!(stats.config.enable_performance_tracking);
    assert!(!stats.config.debug_mode);

    let names: Vec<String> = service.operation_stats().into_iter().map(|s| s.name).collect();
    for expected in ["load_initial_data", "load_rows", "load_columns", "load_junctions", "diagnose_junction_mapping"] {
        assert!(names.iter().any(|n| n == expected), "missing {}", expected);
    }
}

#[tokio::test]
async fn test_disabled_tracking_records_nothing() {
    let platform = Arc::new(InMemoryPlatform::new());
    let service = service_with(&platform, ServiceOptions::default().performance_tracking(false));

    service
        .load_initial_matrix_data(&question_study_config(), None)
        .await
        .unwrap();
    assert!(service.operation_stats().is_empty());
    assert!(!service.get_service_stats().config.enable_performance_tracking);
}
