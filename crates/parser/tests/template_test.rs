//! Integration tests for template loading

use apb_packager_common::MappingTables;
use apb_packager_parser::{
    load_service_spec, load_template, CloudFormationTemplate, IntrinsicForm, KeyMapper,
};
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn test_load_yaml_template_with_embedded_spec() {
    let template = load_template(&fixture("sqs.yaml")).unwrap();
    assert_eq!(
        template.parameter_names(),
        vec!["FifoQueue", "DelaySeconds", "MaximumMessageSize"]
    );

    let spec = load_service_spec(&template, None).unwrap();
    let plans = spec.service_plans().unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].0, "standard");
    assert!(spec.bindings().unwrap().wants_keypair());

    let ui = template.interface();
    assert_eq!(ui.label("FifoQueue"), Some("FIFO Queue"));
    assert_eq!(ui.group_of("MaximumMessageSize"), Some("Queue Settings"));
}

#[test]
fn test_yaml_round_trip_is_stable() {
    let template = load_template(&fixture("sqs.yaml")).unwrap();
    let first = template.to_yaml_string().unwrap();
    let reparsed = CloudFormationTemplate::from_yaml_str(&first).unwrap();
    let second = reparsed.to_yaml_string().unwrap();

    assert_eq!(first, second);
    assert_eq!(reparsed, template);
    assert!(first.contains("!GetAtt Queue.Arn"));
    assert!(first.contains("!Equals"));
}

#[test]
fn test_json_template_long_form_rewrite() {
    let mut template = load_template(&fixture("vpc.json")).unwrap();
    assert_eq!(template.count_references("AvailabilityZones"), 2);

    let replaced = template.rewrite_references("AvailabilityZones", |form| {
        assert_eq!(form, IntrinsicForm::Long);
        form.condition_if(
            "AutoAzs",
            form.get_att("AWSSBInjectedGetAzs", "AvailabilityZones"),
            form.reference("AvailabilityZones"),
        )
    });
    assert_eq!(replaced, 2);

    let subnet = template.resource("SubnetA").unwrap();
    let zone = &subnet["Properties"]["AvailabilityZone"]["Fn::Select"][1];
    assert!(zone.get("Fn::If").is_some());
}

#[test]
fn test_key_mapper_over_builtin_tables() {
    let tables = MappingTables::builtin().unwrap();
    let mapper = KeyMapper::new(&tables.spec_mappings);
    assert_eq!(
        mapper.lookup("LongDescription", "cfn").unwrap().as_deref(),
        Some("metadata.longDescription")
    );
    assert_eq!(mapper.lookup("plans.free", "apb").unwrap().as_deref(), Some("ServicePlans[].Free"));
    assert!(mapper.lookup("Name", "yaml").is_err());
    assert_eq!(mapper.map_to_apb("ServicePlans[].ParameterValues"), None);

    // a key the template supplies through the mapping lands on a nested path
    let template = load_template(&fixture("sqs.yaml")).unwrap();
    let spec = load_service_spec(&template, None).unwrap();
    let display = spec.get("DisplayName").cloned().unwrap_or(Value::Null);
    let path = mapper.map_to_apb("DisplayName").unwrap();
    let mut out = Mapping::new();
    path.insert_into(&mut out, display);
    let out = Value::Mapping(out);
    assert_eq!(out["metadata"]["displayName"].as_str(), Some("Amazon SQS"));
}
