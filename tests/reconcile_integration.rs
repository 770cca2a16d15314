use oxitask::{
    ALWAYS_PRESERVED, EntitySchema, FieldValue, Record, SanitizeOptions, SchemaChange,
    from_reference, parse_document, reconcile, rewrite_header, serialize_document, to_reference,
};
use proptest::prelude::*;

fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        proptest::string::string_regex("[ -~]{0,24}")
            .unwrap_or_else(|e| panic!("regex failed: {e}")),
        Just("true".to_string()),
        Just("123".to_string()),
        Just("[[Projects/X|X]]".to_string()),
        Just("- item".to_string()),
        Just("#tag".to_string()),
        Just(" padded ".to_string()),
    ]
}

fn value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        (-1000i32..1000).prop_map(|n| FieldValue::Number(f64::from(n))),
        text_strategy().prop_map(FieldValue::String),
        proptest::collection::vec(text_strategy(), 0..4).prop_map(FieldValue::strings),
    ]
}

fn key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Status".to_string()),
        Just("Done".to_string()),
        Just("Priority".to_string()),
        Just("Areas".to_string()),
        Just("Name".to_string()),
        Just("tags".to_string()),
        Just("aliases".to_string()),
        Just("publish".to_string()),
        proptest::string::string_regex("[a-z][a-z0-9_-]{0,10}")
            .unwrap_or_else(|e| panic!("regex failed: {e}")),
    ]
}

/// Task records with a title, no conflicting `Type`, and arbitrary other keys.
fn task_record_strategy() -> impl Strategy<Value = Record> {
    (
        text_strategy(),
        proptest::collection::vec((key_strategy(), value_strategy()), 0..8),
    )
        .prop_map(|(title, pairs)| {
            let mut record = Record::new();
            for (key, value) in pairs {
                record.insert(key, value);
            }
            record.insert("Title", FieldValue::String(title));
            record
        })
}

fn reference_name_strategy() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[A-Za-z0-9][A-Za-z0-9 :?*#/._-]{0,30}")
        .unwrap_or_else(|e| panic!("regex failed: {e}"))
}

proptest! {
    #[test]
    fn reconcile_is_idempotent(record in task_record_strategy()) {
        let schema = EntitySchema::task();
        let once = reconcile(&record, &schema, &[]).unwrap_or_else(|e| panic!("reconcile: {e}"));
        let twice = reconcile(&once.record, &schema, &[]).unwrap_or_else(|e| panic!("reconcile: {e}"));
        prop_assert!(!twice.changed(), "second pass changed: {:?}", twice.changes);
        prop_assert_eq!(twice.record, once.record);
    }

    #[test]
    fn preserved_keys_survive_untouched(
        record in task_record_strategy(),
        extra in value_strategy(),
    ) {
        let mut record = record;
        record.insert("Name", extra);
        let preserve = vec!["Name".to_string()];
        let out = reconcile(&record, &EntitySchema::task(), &preserve)
            .unwrap_or_else(|e| panic!("reconcile: {e}"));
        for key in ALWAYS_PRESERVED.iter().copied().chain(["Name"]) {
            if record.contains_key(key) {
                prop_assert_eq!(out.record.get(key), record.get(key));
            }
        }
    }

    #[test]
    fn every_schema_field_is_present_after_reconcile(record in task_record_strategy()) {
        let schema = EntitySchema::task();
        let out = reconcile(&record, &schema, &[]).unwrap_or_else(|e| panic!("reconcile: {e}"));
        let names = schema.field_names();
        let head: Vec<&str> = out.record.keys().take(names.len()).collect();
        prop_assert_eq!(head, names);
    }

    #[test]
    fn reference_round_trip(name in reference_name_strategy(), folder in "[A-Z][a-z]{0,8}") {
        let opts = SanitizeOptions::default();
        let token = to_reference(&name, &folder, &opts);
        prop_assert_eq!(from_reference(&token), name.clone());
        prop_assert_eq!(to_reference(&token, &folder, &opts), token);
    }

    #[test]
    fn header_survives_serialize_and_parse(record in task_record_strategy()) {
        let text = serialize_document(&record, &[], "body\n");
        let doc = parse_document(&text).unwrap_or_else(|e| panic!("parse {text:?}: {e}"));
        prop_assert_eq!(doc.record, record);
        prop_assert_eq!(doc.body, "body\n");
    }
}

#[test]
fn migrating_a_legacy_task_counts_each_change() -> anyhow::Result<()> {
    let text = "---\nStatus: Done\nTitle: Ship release\nSub-tasks: []\nreviewer: sam\n---\n# Notes\n\n  keep   this\n";
    let schema = EntitySchema::task().with_retired(["Sub-tasks"]);

    let doc = parse_document(text)?;
    let plan = reconcile(&doc.record, &schema, &[])?;
    assert!(plan.changes.contains(&SchemaChange::Reordered));
    assert!(plan.changes.contains(&SchemaChange::Removed("Sub-tasks".into())));
    assert!(plan.changes.contains(&SchemaChange::Added("Done".into())));
    assert_eq!(
        plan.changes.iter().filter(|c| **c == SchemaChange::Reordered).count(),
        1
    );

    let rewritten = rewrite_header(text, &mut |record| {
        *record = reconcile(record, &schema, &[])?.record;
        Ok(())
    })?
    .expect("header changed");
    assert!(rewritten.ends_with("---\n# Notes\n\n  keep   this\n"));
    assert!(rewritten.starts_with("---\nTitle: Ship release\nType: Task\n"));
    assert!(rewritten.contains("\nPriority:\n"));
    assert!(rewritten.contains("\nreviewer: sam\n---\n"));
    assert!(!rewritten.contains("Sub-tasks"));
    Ok(())
}

#[test]
fn example_task_gains_category_and_priority() -> anyhow::Result<()> {
    let record: Record = [
        ("Title", FieldValue::text("X")),
        ("Type", FieldValue::text("Task")),
        ("Areas", FieldValue::List(vec![])),
        ("Project", FieldValue::Null),
        ("Done", FieldValue::Bool(false)),
        ("Status", FieldValue::text("Backlog")),
        ("Parent task", FieldValue::Null),
        ("Do Date", FieldValue::Null),
        ("Due Date", FieldValue::Null),
        ("Estimate", FieldValue::Null),
        ("tags", FieldValue::List(vec![])),
    ]
    .into_iter()
    .collect();

    let out = reconcile(&record, &EntitySchema::task(), &[])?;
    assert_eq!(out.change_count(), 2);
    assert_eq!(out.record.get("Category"), Some(&FieldValue::text("Task")));
    assert_eq!(out.record.get("Priority"), Some(&FieldValue::Null));
    Ok(())
}
