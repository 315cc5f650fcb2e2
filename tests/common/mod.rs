#![allow(dead_code)]

use matrixdata::{InMemoryPlatform, MatrixConfig, MatrixDataService, Record, ServiceOptions};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn record(value: Value) -> Record {
    value.as_object().cloned().expect("fixture records are JSON objects")
}

pub fn question_study_config() -> MatrixConfig {
    MatrixConfig::new("question", "study", "link")
}

/// Two questions, two studies and one link between q1 and s1.
pub fn question_study_platform() -> Arc<InMemoryPlatform> {
    let platform = Arc::new(InMemoryPlatform::new());
    platform.insert("question", record(json!({"questionid": "q1", "name": "Question 1"})));
    platform.insert("question", record(json!({"questionid": "q2", "name": "Question 2"})));
    platform.insert("study", record(json!({"studyid": "s1", "name": "Study A"})));
    platform.insert("study", record(json!({"studyid": "s2", "name": "Study B"})));
    link(&platform, "l1", "q1", "s1");
    platform
}

pub fn link(platform: &InMemoryPlatform, id: &str, question: &str, study: &str) {
    platform.insert(
        "link",
        record(json!({"linkid": id, "_question_value": question, "_study_value": study})),
    );
}

pub fn service(platform: &Arc<InMemoryPlatform>) -> MatrixDataService {
    service_with(platform, ServiceOptions::default())
}

pub fn service_with(platform: &Arc<InMemoryPlatform>, options: ServiceOptions) -> MatrixDataService {
    MatrixDataService::new(platform.clone(), options).expect("valid options")
}

pub fn pairs(junctions: &[matrixdata::JunctionRecord]) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = junctions
        .iter()
        .map(|j| (j.row_id.clone(), j.column_id.clone()))
        .collect();
    pairs.sort();
    pairs
}
