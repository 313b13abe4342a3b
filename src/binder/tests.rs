//! Tests for configuration merging and binding.

use super::*;
use crate::test_support::{DriverScript, ScriptedDriver};
use rstest::{fixture, rstest};

#[fixture]
fn declared() -> Vec<OptionSpec> {
    vec![
        OptionSpec::new("zone", "fr-par-1", "Availability zone"),
        OptionSpec::new("size", 20_i64, "Disk size in gigabytes"),
        OptionSpec::new("public", true, "Attach a public address"),
        OptionSpec::new("tags", Vec::<String>::new(), "Tags to apply"),
    ]
}

fn overrides(pairs: &[(&str, OptionValue)]) -> Overrides {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), value.clone()))
        .collect()
}

#[rstest]
fn merge_without_overrides_yields_declared_defaults(declared: Vec<OptionSpec>) {
    let config = merge(&declared, &Overrides::new());

    let keys: Vec<&str> = config.keys().collect();
    assert_eq!(keys, vec!["zone", "size", "public", "tags"]);
    assert_eq!(config.string("zone").ok().flatten(), Some("fr-par-1"));
    assert_eq!(config.integer("size").ok().flatten(), Some(20));
}

#[rstest]
fn merge_replaces_declared_values(declared: Vec<OptionSpec>) {
    let config = merge(
        &declared,
        &overrides(&[("zone", OptionValue::from("nl-ams-1"))]),
    );

    assert_eq!(config.get("zone"), Some(&OptionValue::from("nl-ams-1")));
    assert_eq!(config.bool("public").ok().flatten(), Some(true));
    assert_eq!(config.len(), declared.len());
}

#[rstest]
fn merge_passes_unknown_keys_through_after_declared(declared: Vec<OptionSpec>) {
    let config = merge(
        &declared,
        &overrides(&[
            ("zz-extension", OptionValue::from(true)),
            ("aa-extension", OptionValue::from("x")),
        ]),
    );

    let keys: Vec<&str> = config.keys().collect();
    assert_eq!(
        keys,
        vec!["zone", "size", "public", "tags", "aa-extension", "zz-extension"]
    );
}

#[rstest]
fn merge_keeps_every_declared_key(declared: Vec<OptionSpec>) {
    let config = merge(
        &declared,
        &overrides(&[
            ("size", OptionValue::from(40_i64)),
            ("unrelated", OptionValue::from("value")),
        ]),
    );

    for spec in &declared {
        assert!(config.contains(&spec.name), "missing {}", spec.name);
    }
}

#[rstest]
fn merge_does_not_let_unknown_keys_supply_defaults(declared: Vec<OptionSpec>) {
    let config = merge(&declared, &overrides(&[("Zone", OptionValue::from("x"))]));

    assert_eq!(config.string("zone").ok().flatten(), Some("fr-par-1"));
    assert_eq!(config.string("Zone").ok().flatten(), Some("x"));
}

#[test]
fn typed_reads_reject_mismatched_values() {
    let config = merge(
        &[OptionSpec::new("size", "large", "Disk size")],
        &Overrides::new(),
    );

    let err = config.integer("size").expect_err("string is not an integer");
    assert_eq!(
        err,
        DriverError::InvalidConfig(String::from(
            "option size must be a integer, got a string"
        ))
    );
}

#[test]
fn list_reads_accept_a_single_string() {
    let config = merge(
        &[OptionSpec::new("tags", "solo", "Tags")],
        &Overrides::new(),
    );

    assert_eq!(
        config.list("tags").ok().flatten(),
        Some(vec![String::from("solo")])
    );
}

#[test]
fn option_values_deserialise_from_plain_json() {
    let parsed: Overrides = serde_json::from_str(
        r#"{"flag": false, "count": 3, "name": "web", "tags": ["a", "b"]}"#,
    )
    .unwrap_or_else(|err| panic!("parse overrides: {err}"));

    assert_eq!(parsed.get("flag"), Some(&OptionValue::Bool(false)));
    assert_eq!(parsed.get("count").and_then(OptionValue::as_i64), Some(3));
    assert_eq!(parsed.get("name"), Some(&OptionValue::from("web")));
    assert_eq!(
        parsed.get("tags").and_then(OptionValue::as_list),
        Some([String::from("a"), String::from("b")].as_slice())
    );
}

#[test]
fn bind_applies_merged_configuration() {
    let script = DriverScript::new();
    let mut driver = ScriptedDriver::new("h1", script.clone());

    let config = bind(
        &mut driver,
        &overrides(&[("region", OptionValue::from("eu-west"))]),
    )
    .unwrap_or_else(|err| panic!("bind: {err}"));

    assert_eq!(config.string("region").ok().flatten(), Some("eu-west"));
    assert_eq!(script.applied_configs(), vec![config]);
}

#[test]
fn apply_surfaces_driver_rejection_verbatim() {
    let script = DriverScript::new();
    script.reject_config("region eu-nowhere is not offered");
    let mut driver = ScriptedDriver::new("h1", script);

    let err = bind(&mut driver, &Overrides::new()).expect_err("driver rejects config");
    assert_eq!(err, InvalidConfig(String::from("region eu-nowhere is not offered")));
}
