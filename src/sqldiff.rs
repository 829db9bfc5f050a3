//! Migration validation and forward DDL.
//!
//! Every diff record is classified before any output: additive changes are
//! safe, deletions are allowed only in destructive mode, and in-place
//! modifications of types, values, flags, actions, or references can never
//! be expressed as forward DDL. If anything is objectionable the whole
//! migration is suppressed.

use std::io::Write;

use crate::config::{Config, DefaultValue, Field, FieldFlags, FieldType};
use crate::diag::{Diagnostics, Pos};
use crate::diff::DiffRecord;
use crate::sql;
use crate::Error;

const CHANNEL: &str = "sqldiff";

/// Validate `records` and, when clean, write the migration DDL.
///
/// Returns [`Error::Migration`] with the number of objections when the diff
/// cannot be expressed; nothing is written in that case.
pub fn write_migration<W: Write>(
    w: &mut W,
    from: &Config,
    into: &Config,
    records: &[DiffRecord],
    destruct: bool,
    diags: &mut Diagnostics,
) -> Result<(), Error> {
    let mut errors = 0usize;
    errors += check_enums(from, into, records, destruct, diags);
    errors += check_bitfields(from, into, records, destruct, diags);
    errors += check_fields(from, into, records, destruct, diags);
    errors += check_structs(from, records, destruct, diags);
    errors += check_uniques(into, records, diags);
    if errors > 0 {
        return Err(Error::Migration(errors));
    }

    let mut prologue = false;
    let mut begin = |w: &mut W| -> std::io::Result<()> {
        if !prologue {
            w.write_all(b"PRAGMA foreign_keys=ON;\n\n")?;
            prologue = true;
        }
        Ok(())
    };

    for record in records {
        if let DiffRecord::AddStruct(sid) = record {
            begin(w)?;
            sql::write_struct(w, into, into.strct(*sid), false)?;
        }
    }
    for record in records {
        if let DiffRecord::AddField(fid) = record {
            begin(w)?;
            write_add_column(w, into, into.field(*fid), &into.strct(fid.strct).name)?;
        }
    }
    if destruct {
        for record in records {
            if let DiffRecord::DelStruct(sid) = record {
                begin(w)?;
                writeln!(w, "DROP TABLE {};", from.strct(*sid).name)?;
            }
        }
        for record in records {
            if let DiffRecord::DelField(fid) = record {
                let field = from.field(*fid);
                if field.ftype == FieldType::Struct {
                    continue;
                }
                begin(w)?;
                writeln!(
                    w,
                    "-- ALTER TABLE {} DROP COLUMN {};",
                    from.strct(fid.strct).name,
                    field.name
                )?;
            }
        }
    }
    Ok(())
}

/// `ALTER TABLE ... ADD COLUMN` mirroring the CREATE TABLE column form, with
/// the reference and default inline.
fn write_add_column<W: Write>(
    w: &mut W,
    cfg: &Config,
    field: &Field,
    table: &str,
) -> std::io::Result<()> {
    let ctype = match &field.ftype {
        FieldType::Real => "REAL",
        FieldType::Blob => "BLOB",
        FieldType::Text | FieldType::Password | FieldType::Email => "TEXT",
        _ => "INTEGER",
    };
    write!(w, "ALTER TABLE {} ADD COLUMN {} {}", table, field.name, ctype)?;
    if field.flags.rowid {
        w.write_all(b" PRIMARY KEY")?;
    }
    if field.flags.unique {
        w.write_all(b" UNIQUE")?;
    }
    if !field.flags.rowid && !field.flags.null {
        w.write_all(b" NOT NULL")?;
    }
    if let Some(target) = field.reference.as_ref().and_then(|r| r.target) {
        write!(
            w,
            " REFERENCES {}({})",
            cfg.strct(target.strct).name,
            cfg.field(target).name
        )?;
    }
    if let Some(act) = field.actup.sql() {
        write!(w, " ON UPDATE {}", act)?;
    }
    if let Some(act) = field.actdel.sql() {
        write!(w, " ON DELETE {}", act)?;
    }
    if let Some(default) = &field.default {
        w.write_all(b" DEFAULT ")?;
        match default {
            DefaultValue::Integer(v) => write!(w, "{}", v)?,
            DefaultValue::Real(v) => write!(w, "{}", v)?,
            DefaultValue::String(s) => write!(w, "'{}'", s)?,
            DefaultValue::EnumItem(item) => {
                let value = field
                    .enum_ref
                    .and_then(|id| cfg.enm(id).find_item(item))
                    .map(|i| i.value)
                    .unwrap_or_default();
                write!(w, "{}", value)?;
            }
        }
    }
    w.write_all(b";\n")
}

/// Message anchored at the *from* position, pointing at the *into* one.
fn moved(
    diags: &mut Diagnostics,
    from_pos: &Pos,
    into_pos: &Pos,
    text: &str,
) {
    diags.error(
        CHANNEL,
        Some(from_pos.clone()),
        format!("{} (now at {})", text, into_pos),
    );
}

fn check_enums(
    from: &Config,
    into: &Config,
    records: &[DiffRecord],
    destruct: bool,
    diags: &mut Diagnostics,
) -> usize {
    let mut errors = 0;
    for record in records {
        match record {
            DiffRecord::DelEnum(id) => {
                if !destruct {
                    diags.warn(
                        CHANNEL,
                        Some(from.enm(*id).pos.clone()),
                        "deleted enumeration",
                    );
                    errors += 1;
                }
            }
            DiffRecord::DelEitem { from: (id, item) } => {
                if !destruct {
                    diags.warn(
                        CHANNEL,
                        Some(from.enm(*id).items[*item].pos.clone()),
                        "deleted enumeration item",
                    );
                    errors += 1;
                }
            }
            DiffRecord::ModEitemValue {
                from: (fid, fitem),
                into: (iid, iitem),
            } => {
                moved(
                    diags,
                    &from.enm(*fid).items[*fitem].pos,
                    &into.enm(*iid).items[*iitem].pos,
                    "item has changed value",
                );
                errors += 1;
            }
            _ => {}
        }
    }
    errors
}

fn check_bitfields(
    from: &Config,
    into: &Config,
    records: &[DiffRecord],
    destruct: bool,
    diags: &mut Diagnostics,
) -> usize {
    let mut errors = 0;
    for record in records {
        match record {
            DiffRecord::DelBitf(id) => {
                if !destruct {
                    diags.warn(
                        CHANNEL,
                        Some(from.bitf(*id).pos.clone()),
                        "deleted bitfield",
                    );
                    errors += 1;
                }
            }
            DiffRecord::DelBitidx { from: (id, item) } => {
                if !destruct {
                    diags.warn(
                        CHANNEL,
                        Some(from.bitf(*id).items[*item].pos.clone()),
                        "deleted bitfield item",
                    );
                    errors += 1;
                }
            }
            DiffRecord::ModBitidxValue {
                from: (fid, fitem),
                into: (iid, iitem),
            } => {
                moved(
                    diags,
                    &from.bitf(*fid).items[*fitem].pos,
                    &into.bitf(*iid).items[*iitem].pos,
                    "bitfield item has changed value",
                );
                errors += 1;
            }
            _ => {}
        }
    }
    errors
}

fn check_fields(
    from: &Config,
    into: &Config,
    records: &[DiffRecord],
    destruct: bool,
    diags: &mut Diagnostics,
) -> usize {
    // Only flags with a relational footprint are objectionable.
    let sql_flags = |flags: &FieldFlags| (flags.rowid, flags.null, flags.unique);

    let mut errors = 0;
    for record in records {
        match record {
            DiffRecord::DelField(fid) => {
                let field = from.field(*fid);
                if destruct || field.ftype == FieldType::Struct {
                    continue;
                }
                diags.warn(
                    CHANNEL,
                    Some(field.pos.clone()),
                    "field column was dropped",
                );
                errors += 1;
            }
            DiffRecord::ModFieldType { from: f, into: i }
            | DiffRecord::ModFieldEnm { from: f, into: i }
            | DiffRecord::ModFieldBitf { from: f, into: i } => {
                moved(
                    diags,
                    &from.field(*f).pos,
                    &into.field(*i).pos,
                    "field type has changed",
                );
                errors += 1;
            }
            DiffRecord::ModFieldFlags { from: f, into: i } => {
                if sql_flags(&from.field(*f).flags) == sql_flags(&into.field(*i).flags) {
                    continue;
                }
                moved(
                    diags,
                    &from.field(*f).pos,
                    &into.field(*i).pos,
                    "field flag has changed",
                );
                errors += 1;
            }
            DiffRecord::ModFieldActions { from: f, into: i } => {
                moved(
                    diags,
                    &from.field(*f).pos,
                    &into.field(*i).pos,
                    "field action has changed",
                );
                errors += 1;
            }
            DiffRecord::ModFieldReference { from: f, into: i } => {
                // Struct-typed sides are bookkeeping, not schema.
                if from.field(*f).ftype == FieldType::Struct
                    || into.field(*i).ftype == FieldType::Struct
                {
                    continue;
                }
                moved(
                    diags,
                    &from.field(*f).pos,
                    &into.field(*i).pos,
                    "field reference has changed",
                );
                errors += 1;
            }
            _ => {}
        }
    }
    errors
}

fn check_structs(
    from: &Config,
    records: &[DiffRecord],
    destruct: bool,
    diags: &mut Diagnostics,
) -> usize {
    let mut errors = 0;
    for record in records {
        if let DiffRecord::DelStruct(sid) = record {
            if !destruct {
                diags.warn(CHANNEL, Some(from.strct(*sid).pos.clone()), "deleted table");
                errors += 1;
            }
        }
    }
    errors
}

fn check_uniques(into: &Config, records: &[DiffRecord], diags: &mut Diagnostics) -> usize {
    let mut errors = 0;
    for record in records {
        if let DiffRecord::AddUnique { into: (sid, ui) } = record {
            diags.warn(
                CHANNEL,
                Some(into.strct(*sid).uniques[*ui].pos.clone()),
                "new unique field",
            );
            errors += 1;
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::parser::{parse_config, parse_link};

    fn linked(input: &str) -> Config {
        let mut cfg = Config::new();
        parse_config(&mut cfg, input, "test.ort").expect("parse");
        parse_link(&mut cfg).expect("link");
        cfg
    }

    fn migrate(from: &str, into: &str, destruct: bool) -> Result<String, (usize, Diagnostics)> {
        let from = linked(from);
        let into = linked(into);
        let records = diff(&from, &into);
        let mut diags = Diagnostics::new();
        let mut out = Vec::new();
        match write_migration(&mut out, &from, &into, &records, destruct, &mut diags) {
            Ok(()) => Ok(String::from_utf8(out).unwrap()),
            Err(Error::Migration(n)) => {
                assert!(out.is_empty(), "DDL must be suppressed on error");
                Err((n, diags))
            }
            Err(err) => panic!("unexpected error {err}"),
        }
    }

    #[test]
    fn test_identity_migration_is_empty() {
        let text = "struct user { field id int rowid; field name text; };";
        assert_eq!(migrate(text, text, false).unwrap(), "");
    }

    #[test]
    fn test_safe_column_addition() {
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
    fn test_new_struct_emits_create_table() {
        let out = migrate(
            "struct user { field id int rowid; };",
            "struct user { field id int rowid; };\n\
             struct log { field id int rowid; field msg text; };",
            false,
        )
        .unwrap();
        assert!(out.starts_with("PRAGMA foreign_keys=ON;\n\nCREATE TABLE log (\n"));
        assert!(out.contains("\tmsg TEXT NOT NULL\n);\n"));
    }

    #[test]
    fn test_type_change_is_an_error() {
        let (errors, diags) = migrate(
            "struct user { field id int rowid; field name text; };",
            "struct user { field id int rowid; field name int; };",
            true,
        )
        .unwrap_err();
        assert_eq!(errors, 1);
        let msg = diags.iter().next().unwrap();
        assert!(msg.text.contains("field type has changed"));
        assert!(msg.text.contains("now at"));
    }

    #[test]
    fn test_dropped_struct_requires_destruct() {
        let from = "struct old_table { field id int rowid; };\n\
                    struct keep_table { field id int rowid; };";
        let into = "struct keep_table { field id int rowid; };";

        let (errors, diags) = migrate(from, into, false).unwrap_err();
        assert_eq!(errors, 1);
        assert!(diags.iter().any(|m| m.text.contains("deleted table")));

        let out = migrate(from, into, true).unwrap();
        assert_eq!(out, "PRAGMA foreign_keys=ON;\n\nDROP TABLE old_table;\n");
    }

    #[test]
    fn test_dropped_column_comment_only() {
        let out = migrate(
            "struct user { field id int rowid; field legacy text; };",
            "struct user { field id int rowid; };",
            true,
        )
        .unwrap();
        assert_eq!(
            out,
            "PRAGMA foreign_keys=ON;\n\n-- ALTER TABLE user DROP COLUMN legacy;\n"
        );
    }

    #[test]
    fn test_dropped_struct_field_is_ignored() {
        let out = migrate(
            "struct c { field id int rowid; };\n\
             struct user { field id int rowid; field cid:c.id int; field c struct cid; };",
            "struct c { field id int rowid; };\n\
             struct user { field id int rowid; field cid:c.id int; };",
            false,
        )
        .unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn test_added_unique_cannot_be_retrofitted() {
        let (errors, diags) = migrate(
            "struct t { field id int rowid; field a text; field b text; };",
            "struct t { field id int rowid; field a text; field b text; unique a b; };",
            true,
        )
        .unwrap_err();
        assert_eq!(errors, 1);
        assert!(diags.iter().any(|m| m.text.contains("new unique field")));
    }

    #[test]
    fn test_enum_deletion_gated_by_destruct() {
        let from = "enum st { item a 0; item b 1; };\n\
                    struct t { field id int rowid; field s enum st; };";
        let into = "enum st { item a 0; };\n\
                    struct t { field id int rowid; field s enum st; };";
        assert!(migrate(from, into, false).is_err());
        assert_eq!(migrate(from, into, true).unwrap(), "");
    }

    #[test]
    fn test_item_value_change_is_always_an_error() {
        let from = "enum st { item a 0; };\nstruct t { field id int rowid; field s enum st; };";
        let into = "enum st { item a 1; };\nstruct t { field id int rowid; field s enum st; };";
        assert!(migrate(from, into, true).is_err());
    }

    #[test]
    fn test_noexport_flag_change_is_ignored() {
        let out = migrate(
            "struct t { field id int rowid; field a text; };",
            "struct t { field id int rowid; field a text noexport; };",
            false,
        )
        .unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn test_null_flag_change_is_an_error() {
        let (_, diags) = migrate(
            "struct t { field id int rowid; field a text; };",
            "struct t { field id int rowid; field a text null; };",
            true,
        )
        .unwrap_err();
        assert!(diags.iter().any(|m| m.text.contains("field flag has changed")));
    }

    #[test]
    fn test_add_column_with_reference_and_default() {
        let out = migrate(
            "struct c { field id int rowid; };\n\
             struct t { field id int rowid; };",
            "struct c { field id int rowid; };\n\
             struct t {\n\
             \tfield id int rowid;\n\
             \tfield cid:c.id int actup cascade null;\n\
             \tfield score real default 0.5;\n\
             \tfield label text default \"new\";\n\
             };",
            false,
        )
        .unwrap();
        assert!(out.contains(
            "ALTER TABLE t ADD COLUMN cid INTEGER REFERENCES c(id) ON UPDATE CASCADE;\n"
        ));
        assert!(out.contains("ALTER TABLE t ADD COLUMN score REAL NOT NULL DEFAULT 0.5;\n"));
        assert!(out.contains("ALTER TABLE t ADD COLUMN label TEXT NOT NULL DEFAULT 'new';\n"));
    }

    #[test]
    fn test_enum_default_uses_item_value() {
        let out = migrate(
            "enum st { item a 0; item b 4; };\nstruct t { field id int rowid; };",
            "enum st { item a 0; item b 4; };\n\
             struct t { field id int rowid; field s enum st default b; };",
            false,
        )
        .unwrap();
        assert!(out.contains("ALTER TABLE t ADD COLUMN s INTEGER NOT NULL DEFAULT 4;\n"));
    }
}
