//! Diff classification and migration DDL across configuration versions.

use ort::diag::Diagnostics;
use ort::diff::diff;
use ort::sqldiff::write_migration;
use ort::{parse_config, parse_link, Config, Error};

fn linked(input: &str) -> Config {
    let mut cfg = Config::new();
    parse_config(&mut cfg, input, "test.ort").expect("parse");
    parse_link(&mut cfg).expect("link");
    cfg
}

fn migrate(from: &str, into: &str, destruct: bool) -> Result<String, (usize, Vec<String>)> {
    let from = linked(from);
    let into = linked(into);
    let records = diff(&from, &into);
    let mut diags = Diagnostics::new();
    let mut out = Vec::new();
    match write_migration(&mut out, &from, &into, &records, destruct, &mut diags) {
        Ok(()) => Ok(String::from_utf8(out).unwrap()),
        Err(Error::Migration(n)) => {
            assert!(out.is_empty(), "no DDL may be written on failure");
            Err((n, diags.iter().map(|m| m.to_string()).collect()))
        }
        Err(err) => panic!("unexpected error {err}"),
    }
}

#[test]
fn test_safe_field_addition() {
    let out = migrate(
        "struct user { field id int rowid; field name text; };",
        "struct user { field id int rowid; field name text; field age int; };",
        false,
    )
    .unwrap();
    assert_eq!(
        out,
        "PRAGMA foreign_keys=ON;\n\nALTER TABLE user ADD COLUMN age INTEGER NOT NULL;\n"
    );
}

#[test]
fn test_type_change_suppresses_ddl() {
    for destruct in [false, true] {
        let (errors, msgs) = migrate(
            "struct user { field id int rowid; field name text; };",
            "struct user { field id int rowid; field name int; };",
            destruct,
        )
        .unwrap_err();
        assert_eq!(errors, 1);
        // Both positions surface in the diagnostic.
        assert!(msgs[0].starts_with("test.ort:1:"));
        assert!(msgs[0].contains("field type has changed"));
        assert!(msgs[0].contains("(now at test.ort:1:"));
    }
}

#[test]
fn test_destructive_table_drop() {
    let from = "struct old_table { field id int rowid; };\n\
                struct keep_table { field id int rowid; };";
    let into = "struct keep_table { field id int rowid; };";

    let (errors, msgs) = migrate(from, into, false).unwrap_err();
    assert_eq!(errors, 1);
    assert!(msgs[0].contains("deleted table"));

    assert_eq!(
        migrate(from, into, true).unwrap(),
        "PRAGMA foreign_keys=ON;\n\nDROP TABLE old_table;\n"
    );
}

#[test]
fn test_identity_diff_is_empty() {
    let text = "enum st { item a 0; };\n\
                bits b { item x 3; };\n\
                roles { role admin; };\n\
                struct user {\n\
                \tfield id int rowid;\n\
                \tfield s enum st;\n\
                \tfield p bits b;\n\
                \tsearch id eq;\n\
                \troles admin { all; };\n\
                };";
    let a = linked(text);
    let b = linked(text);
    assert!(diff(&a, &b).is_empty());
    assert_eq!(migrate(text, text, false).unwrap(), "");
}

#[test]
fn test_new_table_before_new_columns() {
    let out = migrate(
        "struct user { field id int rowid; };",
        "struct user { field id int rowid; field age int; };\n\
         struct log { field id int rowid; };",
        false,
    )
    .unwrap();
    let table = out.find("CREATE TABLE log").unwrap();
    let column = out.find("ALTER TABLE user ADD COLUMN age").unwrap();
    assert!(table < column);
    assert!(out.starts_with("PRAGMA foreign_keys=ON;\n\n"));
    assert_eq!(out.matches("PRAGMA").count(), 1);
}

#[test]
fn test_dropped_column_is_comment_only() {
    let out = migrate(
        "struct user { field id int rowid; field legacy text; };",
        "struct user { field id int rowid; };",
        true,
    )
    .unwrap();
    assert!(out.contains("-- ALTER TABLE user DROP COLUMN legacy;\n"));
}

#[test]
fn test_enum_and_bitfield_gates() {
    let from = "enum st { item a 0; item b 1; };\n\
                bits bf { item x 0; item y 1; };\n\
                struct t { field id int rowid; field s enum st; field p bits bf; };";
    let into = "enum st { item a 0; };\n\
                bits bf { item x 0; };\n\
                struct t { field id int rowid; field s enum st; field p bits bf; };";

    let (errors, msgs) = migrate(from, into, false).unwrap_err();
    assert_eq!(errors, 2);
    assert!(msgs.iter().any(|m| m.contains("deleted enumeration item")));
    assert!(msgs.iter().any(|m| m.contains("deleted bitfield item")));

    assert_eq!(migrate(from, into, true).unwrap(), "");
}

#[test]
fn test_value_changes_always_error() {
    let from = "enum st { item a 0; };\nstruct t { field id int rowid; field s enum st; };";
    let into = "enum st { item a 2; };\nstruct t { field id int rowid; field s enum st; };";
    assert!(migrate(from, into, true).is_err());

    let from = "bits bf { item x 0; };\nstruct t { field id int rowid; field p bits bf; };";
    let into = "bits bf { item x 5; };\nstruct t { field id int rowid; field p bits bf; };";
    let (_, msgs) = migrate(from, into, true).unwrap_err();
    assert!(msgs[0].contains("bitfield item has changed value"));
}

#[test]
fn test_added_unique_is_never_safe() {
    for destruct in [false, true] {
        let (errors, msgs) = migrate(
            "struct t { field id int rowid; field a text; field b text; };",
            "struct t { field id int rowid; field a text; field b text; unique a b; };",
            destruct,
        )
        .unwrap_err();
        assert_eq!(errors, 1);
        assert!(msgs[0].contains("new unique field"));
    }
}

#[test]
fn test_sql_irrelevant_flag_changes_pass() {
    // noexport has no relational footprint; null does.
    assert_eq!(
        migrate(
            "struct t { field id int rowid; field a text; };",
            "struct t { field id int rowid; field a text noexport; };",
            false,
        )
        .unwrap(),
        ""
    );
    assert!(migrate(
        "struct t { field id int rowid; field a text; };",
        "struct t { field id int rowid; field a text null; };",
        false,
    )
    .is_err());
}

#[test]
fn test_doc_and_default_changes_are_safe() {
    let out = migrate(
        "struct t { field id int rowid; field a int; };",
        "struct t { field id int rowid; field a int default 3 comment \"count\"; };",
        false,
    )
    .unwrap();
    // No DDL is emitted for default or doc modifications.
    assert_eq!(out, "");
}

#[test]
fn test_multiple_errors_are_all_reported() {
    let (errors, msgs) = migrate(
        "struct a { field id int rowid; };\n\
         struct b { field id int rowid; field x text; };",
        "struct b { field id int rowid; field x int; };",
        false,
    )
    .unwrap_err();
    assert_eq!(errors, 2);
    assert!(msgs.iter().any(|m| m.contains("field type has changed")));
    assert!(msgs.iter().any(|m| m.contains("deleted table")));
}

#[test]
fn test_struct_field_reference_changes_are_ignored() {
    // Retargeting the struct-typed view follows its source column; only the
    // remote reference itself is schema.
    let from = "struct c { field id int rowid; };\n\
                struct d { field id int rowid; };\n\
                struct t {\n\
                \tfield id int rowid;\n\
                \tfield cid:c.id int;\n\
                \tfield did:d.id int;\n\
                \tfield view struct cid;\n\
                };";
    let into = "struct c { field id int rowid; };\n\
                struct d { field id int rowid; };\n\
                struct t {\n\
                \tfield id int rowid;\n\
                \tfield cid:c.id int;\n\
                \tfield did:d.id int;\n\
                \tfield view struct did;\n\
                };";
    assert_eq!(migrate(from, into, false).unwrap(), "");
}

#[test]
fn test_remote_reference_change_errors() {
    let from = "struct c { field id int rowid; };\n\
                struct d { field id int rowid; };\n\
                struct t { field id int rowid; field rid:c.id int; };";
    let into = "struct c { field id int rowid; };\n\
                struct d { field id int rowid; };\n\
                struct t { field id int rowid; field rid:d.id int; };";
    let (_, msgs) = migrate(from, into, false).unwrap_err();
    assert!(msgs[0].contains("field reference has changed"));
}

#[test]
fn test_migration_is_deterministic() {
    let from = "struct user { field id int rowid; };";
    let into = "struct user { field id int rowid; field a int; field b text null; };";
    assert_eq!(
        migrate(from, into, false).unwrap(),
        migrate(from, into, false).unwrap()
    );
}
