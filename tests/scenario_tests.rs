mod common;

use common::*;
use fhir_bundle_validator::*;
use serde_json::json;

#[tokio::test]
async fn test_invalid_required_binding_value() {
    let mut patient = create_test_patient();
    patient["gender"] = json!("malex");
    let bundle = create_test_bundle(vec![patient]);

    for (name, pipeline) in both_paths() {
        let response = pipeline.validate(&create_test_request(&bundle)).await.unwrap();
        let errors: Vec<_> = response.errors_with_code("INVALID_ENUM_VALUE").collect();

        assert_eq!(errors.len(), 1, "{name}: {:#?}", response.errors);
        let error = errors[0];
        assert_eq!(error.path, "Patient.gender");
        assert_eq!(error.entry_index, Some(0));
        assert_eq!(error.severity, Severity::Error);
        assert_eq!(error.source, ErrorSource::Structure);

        let pointer = error.json_pointer.as_deref().unwrap();
        assert_eq!(pointer, "/entry/0/resource/gender");
        assert_eq!(bundle.pointer(pointer), Some(&json!("malex")));
        assert!(!response.is_valid());
    }
}

#[tokio::test]
async fn test_one_error_per_offending_array_item() {
    let bundle = create_test_bundle(vec![create_test_patient()]);
    let rules = r#"[{
        "id": "system-allowed",
        "kind": "AllowedValues",
        "resourceType": "Patient",
        "path": "identifier.system",
        "params": {"values": ["sys-a"]}
    }]"#;

    for (name, pipeline) in both_paths() {
        let request = create_test_request(&bundle).with_rules(rules);
        let response = pipeline.validate(&request).await.unwrap();
        let errors: Vec<_> = response.errors_with_code("VALUE_NOT_ALLOWED").collect();

        assert_eq!(errors.len(), 2, "{name}: {:#?}", response.errors);
        assert_eq!(errors[0].path, "Patient.identifier[1].system");
        assert_eq!(errors[1].path, "Patient.identifier[2].system");
        assert!(errors[0].json_pointer.as_deref().unwrap().ends_with("/identifier/1/system"));
        assert!(errors[1].json_pointer.as_deref().unwrap().ends_with("/identifier/2/system"));
        assert_eq!(errors[0].details.get("ruleId"), Some(&json!("system-allowed")));
    }
}

#[tokio::test]
async fn test_absent_field_never_gets_fabricated_pointer() {
    let mut observation = create_test_observation();
    observation.as_object_mut().unwrap().remove("performer");
    let bundle = create_test_bundle(vec![create_test_patient(), observation]);
    let rules =
        r#"[{"kind": "Required", "resourceType": "Observation", "path": "performer.display"}]"#;

    for (name, pipeline) in both_paths() {
        let request = create_test_request(&bundle).with_rules(rules);
        let response = pipeline.validate(&request).await.unwrap();
        let errors: Vec<_> = response.errors_with_code("REQUIRED_FIELD_MISSING").collect();

        assert_eq!(errors.len(), 1, "{name}: {:#?}", response.errors);
        assert_eq!(errors[0].entry_index, Some(1));
        assert_eq!(errors[0].path, "Observation.performer.display");
        match errors[0].json_pointer.as_deref() {
            None => {}
            Some(pointer) => {
                assert_eq!(pointer, "/entry/1/resource", "{name}");
                assert!(bundle.pointer(pointer).is_some());
            }
        }
    }
}

#[tokio::test]
async fn test_contract_rule_is_never_downgraded() {
    let bundle = create_test_bundle(vec![create_test_patient()]);
    let rule = |class: &str| {
        format!(
            r#"[{{
                "kind": "AllowedValues",
                "resourceType": "Patient",
                "path": "gender",
                "severity": "error",
                "validationClass": "{class}",
                "heuristic": true,
                "params": {{"values": ["male"]}}
            }}]"#
        )
    };

    for (name, pipeline) in both_paths() {
        let request = create_test_request(&bundle).with_rules(rule("Contract"));
        let response = pipeline.validate(&request).await.unwrap();
        let error = response.errors_with_code("VALUE_NOT_ALLOWED").next().unwrap();
        assert_eq!(error.severity, Severity::Error, "{name}");
        assert_eq!(error.validation_class, ValidationClass::Contract);
        assert!(error.downgrade_reason.is_none());

        let request = create_test_request(&bundle).with_rules(rule("Advisory"));
        let response = pipeline.validate(&request).await.unwrap();
        let error = response.errors_with_code("VALUE_NOT_ALLOWED").next().unwrap();
        assert_eq!(error.severity, Severity::Warning, "{name}");
        assert_eq!(error.configured_severity, Some(Severity::Error));
        assert!(error.downgrade_reason.is_some());
    }
}

#[tokio::test]
async fn test_first_and_filtered_scopes_on_both_paths() {
    let bundle = create_test_bundle(vec![create_test_patient()]);
    let rules = r#"[
        {"id": "first", "kind": "AllowedValues", "resourceType": "Patient", "path": "identifier.system",
         "instanceScope": "First", "params": {"values": ["sys-b"]}},
        {"id": "filtered", "kind": "Pattern", "resourceType": "Patient", "path": "identifier.value",
         "instanceScope": {"type": "Filtered", "condition": "system = 'sys-c'"},
         "params": {"pattern": "[a-z]+"}}
    ]"#;

    for (name, pipeline) in both_paths() {
        let request = create_test_request(&bundle).with_rules(rules);
        let response = pipeline.validate(&request).await.unwrap();

        let first: Vec<_> = response.errors_with_code("VALUE_NOT_ALLOWED").collect();
        assert_eq!(first.len(), 1, "{name}");
        assert_eq!(first[0].path, "Patient.identifier[0].system");

        let filtered: Vec<_> = response.errors_with_code("PATTERN_MISMATCH").collect();
        assert_eq!(filtered.len(), 1, "{name}");
        assert_eq!(
            filtered[0].json_pointer.as_deref(),
            Some("/entry/0/resource/identifier/2/value")
        );
    }
}

#[tokio::test]
async fn test_nested_questionnaire_answers() {
    let response_resource = json!({
        "resourceType": "QuestionnaireResponse",
        "status": "completed",
        "item": [
            {"linkId": "intro", "answer": [{"valueString": "hello"}]},
            {"linkId": "habits", "item": [
                {"linkId": "smoker", "answer": [{"valueCoding": {"system": "http://example.org/yn", "code": "maybe"}}]}
            ]},
            {"linkId": "smoker", "answer": [{"valueCoding": {"system": "http://example.org/yn", "code": "no"}}]}
        ]
    });
    let bundle = create_test_bundle(vec![response_resource]);
    let rules = r#"[{
        "kind": "QuestionAnswer",
        "resourceType": "QuestionnaireResponse",
        "path": "QuestionnaireResponse",
        "params": {"linkId": "smoker", "required": true, "allowedAnswers": ["yes", "no"], "answerType": "coding"}
    }]"#;

    for (name, pipeline) in both_paths() {
        let request = create_test_request(&bundle).with_rules(rules);
        let response = pipeline.validate(&request).await.unwrap();
        let errors: Vec<_> = response.errors_with_code("QUESTION_ANSWER_INVALID").collect();

        assert_eq!(errors.len(), 1, "{name}: {:#?}", response.errors);
        assert_eq!(
            errors[0].json_pointer.as_deref(),
            Some("/entry/0/resource/item/1/item/0/answer/0/valueCoding")
        );
        assert_eq!(response.errors_with_code("QUESTION_ANSWER_MISSING").count(), 0);
    }
}
