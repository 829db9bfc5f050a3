//! Schema DDL output, including the file-driven path the CLI uses.

use std::fs;
use std::io::Write;

use ort::{parse_config, parse_link, sql, Config};

fn schema(input: &str) -> String {
    let mut cfg = Config::new();
    parse_config(&mut cfg, input, "test.ort").expect("parse");
    parse_link(&mut cfg).expect("link");
    let mut out = Vec::new();
    sql::write_schema(&mut out, &cfg).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_minimal_table_bytes() {
    assert_eq!(
        schema("struct user { field id int rowid; field name text; };"),
        "PRAGMA foreign_keys=ON;\n\n\
         CREATE TABLE user (\n\
         \tid INTEGER PRIMARY KEY,\n\
         \tname TEXT NOT NULL\n\
         );\n\n"
    );
}

#[test]
fn test_schema_read_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "struct user {{ field id int rowid; field name text; }};"
    )
    .unwrap();

    let text = fs::read_to_string(file.path()).unwrap();
    let mut cfg = Config::new();
    parse_config(&mut cfg, &text, &file.path().display().to_string()).expect("parse");
    parse_link(&mut cfg).expect("link");

    let mut out = Vec::new();
    sql::write_schema(&mut out, &cfg).unwrap();
    assert!(String::from_utf8(out)
        .unwrap()
        .contains("CREATE TABLE user ("));
}

#[test]
fn test_full_schema_features() {
    let out = schema(
        "enum status { item active 0; item gone 1; };\n\
         struct company {\n\
         \tcomment \"An employer.\";\n\
         \tfield id int rowid;\n\
         \tfield name text unique;\n\
         };\n\
         struct user {\n\
         \tfield id int rowid;\n\
         \tfield companyid:company.id int actdel cascade;\n\
         \tfield company struct companyid;\n\
         \tfield email email;\n\
         \tfield pass password;\n\
         \tfield st enum status;\n\
         \tfield joined epoch;\n\
         \tfield bio text null;\n\
         \tunique email companyid;\n\
         };",
    );

    assert!(out.starts_with("PRAGMA foreign_keys=ON;\n\n"));
    assert!(out.contains("-- An employer.\nCREATE TABLE company ("));
    assert!(out.contains("\tname TEXT UNIQUE NOT NULL\n"));
    assert!(out.contains("\temail TEXT NOT NULL,\n"));
    assert!(out.contains("\tpass TEXT NOT NULL,\n"));
    assert!(out.contains("\tst INTEGER NOT NULL,\n"));
    assert!(out.contains("\t-- (Stored as a UNIX epoch value.)\n\tjoined INTEGER NOT NULL,\n"));
    assert!(out.contains("\tbio TEXT,\n"));
    assert!(out.contains(",\n\tFOREIGN KEY(companyid) REFERENCES company(id) ON DELETE CASCADE"));
    assert!(out.contains(",\n\tUNIQUE(email, companyid)\n"));

    // Struct-typed fields never become columns.
    assert!(!out.contains("\tcompany INTEGER"));
}

#[test]
fn test_tables_in_declaration_order() {
    let out = schema(
        "struct zebra { field id int rowid; };\n\
         struct apple { field id int rowid; };",
    );
    let z = out.find("CREATE TABLE zebra").unwrap();
    let a = out.find("CREATE TABLE apple").unwrap();
    assert!(z < a);
}

#[test]
fn test_schema_is_deterministic() {
    let text = "struct a { field id int rowid; };\nstruct b { field id int rowid; };";
    assert_eq!(schema(text), schema(text));
}
