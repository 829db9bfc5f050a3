//! End-to-end audit report checks over parsed configurations.

use ort::audit::{audit, write_json, write_script, AuditReport};
use ort::{parse_config, parse_link, Config};

fn linked(input: &str) -> Config {
    let mut cfg = Config::new();
    parse_config(&mut cfg, input, "test.ort").expect("parse");
    parse_link(&mut cfg).expect("link");
    cfg
}

fn script(cfg: &Config, role: &str) -> String {
    let role = cfg.find_role(role).expect("role");
    let queue = audit(cfg, role);
    let report = AuditReport::new(cfg, role, &queue);
    let mut out = Vec::new();
    write_script(&mut out, &report).unwrap();
    String::from_utf8(out).unwrap()
}

/// Pull the JSON object back out of the script wrapper.
fn embedded_json(script: &str) -> serde_json::Value {
    let start = script.find("var audit = ").expect("prelude") + "var audit = ".len();
    let end = script.find(";\n\n\troot.audit = audit;").expect("postlude");
    serde_json::from_str(&script[start..end]).expect("embedded JSON parses")
}

const MINIMAL: &str = "roles { role admin; };\n\
     struct user {\n\
     \tfield id int rowid;\n\
     \tfield name text;\n\
     \tsearch id eq;\n\
     \troles admin { all; };\n\
     };";

#[test]
fn test_minimal_report_shape() {
    let cfg = linked(MINIMAL);
    let out = script(&cfg, "admin");

    assert!(out.starts_with("(function(root) {\n\t'use strict';\n"));
    assert!(out.ends_with("root.audit = audit;\n})(this);\n"));
    assert!(out.contains("\"role\": \"admin\""));

    let audit = embedded_json(&out);
    let access = &audit["access"][0];
    assert_eq!(access["name"], "user");
    assert_eq!(access["access"]["insert"], serde_json::Value::Null);
    assert_eq!(access["access"]["updates"].as_array().unwrap().len(), 0);
    assert_eq!(access["access"]["deletes"].as_array().unwrap().len(), 0);
    assert_eq!(
        access["access"]["searches"],
        serde_json::json!(["db_user_get_by_id_eq"])
    );
    assert_eq!(access["access"]["exportable"], true);
    assert_eq!(
        access["access"]["data"],
        serde_json::json!(["id", "name"])
    );

    assert_eq!(audit["fields"]["user.id"]["export"], true);
    assert_eq!(audit["fields"]["user.name"]["export"], true);
    assert_eq!(
        audit["functions"]["db_user_get_by_id_eq"]["type"],
        "get"
    );
}

#[test]
fn test_update_symbol_naming() {
    let cfg = linked(
        "roles { role admin; };\n\
         struct user {\n\
         \tfield id int rowid;\n\
         \tfield name text;\n\
         \tfield age int;\n\
         \tupdate name strset, age set: id eq;\n\
         \troles admin { all; };\n\
         };",
    );
    let out = script(&cfg, "admin");
    assert!(out.contains("\"db_user_update_name_strset_age_set_by_id_eq\""));

    let audit = embedded_json(&out);
    assert_eq!(
        audit["functions"]["db_user_update_name_strset_age_set_by_id_eq"]["type"],
        "update"
    );
}

#[test]
fn test_named_and_anonymous_symbols() {
    let cfg = linked(
        "roles { role admin; };\n\
         struct user {\n\
         \tfield id int rowid;\n\
         \tfield name text;\n\
         \tsearch name eq: name byname;\n\
         \tlist name like;\n\
         \titerate;\n\
         \tcount id gt;\n\
         \tdelete id eq;\n\
         \tupdate;\n\
         \troles admin { all; };\n\
         };",
    );
    let audit = embedded_json(&script(&cfg, "admin"));
    let access = &audit["access"][0]["access"];
    assert_eq!(access["searches"], serde_json::json!(["db_user_get_byname"]));
    assert_eq!(
        access["lists"],
        serde_json::json!(["db_user_list_by_name_like"])
    );
    assert_eq!(access["iterates"], serde_json::json!(["db_user_iterate"]));
    // The update-all form does not spell out its columns.
    assert_eq!(access["updates"], serde_json::json!(["db_user_update"]));
    assert_eq!(
        access["deletes"],
        serde_json::json!(["db_user_delete_by_id_eq"])
    );
    assert!(audit["functions"]["db_user_count_by_id_gt"]["type"] == "count");
}

#[test]
fn test_insert_only_struct_is_reachable() {
    let cfg = linked(
        "roles { role admin; };\n\
         struct log {\n\
         \tfield id int rowid;\n\
         \tfield msg text;\n\
         \tinsert;\n\
         \troles admin { insert; };\n\
         };",
    );
    let audit = embedded_json(&script(&cfg, "admin"));
    let access = &audit["access"][0]["access"];
    assert_eq!(access["insert"], "db_log_insert");
    // A visible insert reaches its structure directly: exportable, all
    // fields listed, no traversal paths.
    assert_eq!(access["exportable"], true);
    assert_eq!(access["data"], serde_json::json!(["id", "msg"]));
    assert_eq!(access["accessfrom"], serde_json::json!([]));
}

#[test]
fn test_struct_without_visible_operations_has_no_export_keys() {
    let cfg = linked(
        "roles { role admin; role writer; };\n\
         struct log {\n\
         \tfield id int rowid;\n\
         \tfield msg text;\n\
         \tinsert;\n\
         \tdelete id eq: name purge;\n\
         \troles writer { insert; delete purge; };\n\
         };",
    );
    // Every operation is granted to "writer" only; nothing reaches log
    // for "admin".
    let audit = embedded_json(&script(&cfg, "admin"));
    let access = &audit["access"][0]["access"];
    assert_eq!(access["insert"], serde_json::Value::Null);
    assert!(access.get("exportable").is_none());
    assert!(access.get("data").is_none());
    assert!(access.get("accessfrom").is_none());
}

#[test]
fn test_reachability_paths_and_export() {
    let cfg = linked(
        "roles { role admin; };\n\
         struct company {\n\
         \tfield id int rowid;\n\
         \tfield name text;\n\
         };\n\
         struct user {\n\
         \tfield id int rowid;\n\
         \tfield companyid:company.id int;\n\
         \tfield company struct companyid;\n\
         \tsearch id eq;\n\
         \troles admin { all; };\n\
         };",
    );
    let audit = embedded_json(&script(&cfg, "admin"));
    let company = &audit["access"][0]["access"];
    assert_eq!(company["exportable"], true);
    assert_eq!(
        company["accessfrom"][0]["function"],
        "db_user_get_by_id_eq"
    );
    assert_eq!(company["accessfrom"][0]["path"], "company");
    let user = &audit["access"][1]["access"];
    assert_eq!(user["accessfrom"][0]["path"], "");
}

#[test]
fn test_password_and_noexport_fields_hidden() {
    let cfg = linked(
        "roles { role admin; };\n\
         struct user {\n\
         \tfield id int rowid;\n\
         \tfield pass password;\n\
         \tfield secret text noexport;\n\
         \tfield name text;\n\
         \tsearch id eq;\n\
         \troles admin { all; };\n\
         };",
    );
    let audit = embedded_json(&script(&cfg, "admin"));
    assert_eq!(audit["fields"]["user.pass"]["export"], false);
    assert_eq!(audit["fields"]["user.secret"]["export"], false);
    assert_eq!(audit["fields"]["user.name"]["export"], true);
}

#[test]
fn test_field_rolemap_is_a_deny_list() {
    let cfg = linked(
        "roles { role admin; role viewer; };\n\
         struct user {\n\
         \tfield id int rowid;\n\
         \tfield salary int;\n\
         \tsearch id eq;\n\
         \troles admin, viewer { all; };\n\
         \troles viewer { noexport salary; };\n\
         };",
    );
    let viewer = embedded_json(&script(&cfg, "viewer"));
    assert_eq!(viewer["fields"]["user.salary"]["export"], false);
    let admin = embedded_json(&script(&cfg, "admin"));
    assert_eq!(admin["fields"]["user.salary"]["export"], true);
}

#[test]
fn test_doc_strings_round_trip_through_escaping() {
    // Configuration strings have no escape syntax; the characters are
    // carried through literally and escaped only on output.
    let cfg = linked(
        "roles { role admin; };\n\
         struct user {\n\
         \tfield id int rowid comment \"tab\tnl\nback\\slash/end\";\n\
         \tsearch id eq;\n\
         \troles admin { all; };\n\
         };",
    );
    let audit = embedded_json(&script(&cfg, "admin"));
    assert_eq!(
        audit["fields"]["user.id"]["doc"],
        "tab\tnl\nback\\slash/end"
    );
    // The raw bytes use the two-character escapes.
    let out = script(&cfg, "admin");
    assert!(out.contains("tab\\tnl\\nback\\\\slash\\/end"));
}

#[test]
fn test_output_is_deterministic() {
    let cfg = linked(MINIMAL);
    assert_eq!(script(&cfg, "admin"), script(&cfg, "admin"));
}

#[test]
fn test_role_lookup_is_case_insensitive() {
    let cfg = linked(MINIMAL);
    assert_eq!(script(&cfg, "ADMIN"), script(&cfg, "admin"));
}

#[test]
fn test_plain_json_mode() {
    let cfg = linked(MINIMAL);
    let role = cfg.find_role("admin").unwrap();
    let queue = audit(&cfg, role);
    let report = AuditReport::new(&cfg, role, &queue);
    let mut out = Vec::new();
    write_json(&mut out, &report).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(value["role"], "admin");
    assert_eq!(value["access"][0]["name"], "user");
}

#[test]
fn test_descendant_role_inherits_grants() {
    let cfg = linked(
        "roles { role admin { role auditor; }; };\n\
         struct user {\n\
         \tfield id int rowid;\n\
         \tinsert;\n\
         \troles admin { insert; };\n\
         };",
    );
    let audit = embedded_json(&script(&cfg, "auditor"));
    assert_eq!(audit["access"][0]["access"]["insert"], "db_user_insert");
    // The sibling built-in "default" has no grant.
    let none = embedded_json(&script(&cfg, "default"));
    assert_eq!(
        none["access"][0]["access"]["insert"],
        serde_json::Value::Null
    );
}
