//! SQLite schema emission.

use std::io::{self, Write};

use crate::config::{Config, Field, FieldType, StructDef, Unique};

/// Column type for a field, or `None` for struct-typed fields, which only
/// materialize through their source column.
fn column_type(ftype: &FieldType) -> Option<&'static str> {
    match ftype {
        FieldType::Bit
        | FieldType::Date
        | FieldType::Epoch
        | FieldType::Int
        | FieldType::Enum(_)
        | FieldType::Bits(_) => Some("INTEGER"),
        FieldType::Real => Some("REAL"),
        FieldType::Blob => Some("BLOB"),
        FieldType::Text | FieldType::Password | FieldType::Email => Some("TEXT"),
        FieldType::Struct => None,
    }
}

fn write_comment<W: Write>(w: &mut W, level: usize, doc: Option<&str>) -> io::Result<()> {
    let Some(doc) = doc else { return Ok(()) };
    for line in doc.lines() {
        for _ in 0..level {
            w.write_all(b"\t")?;
        }
        writeln!(w, "-- {}", line)?;
    }
    Ok(())
}

fn write_field<W: Write>(
    w: &mut W,
    field: &Field,
    first: &mut bool,
    comments: bool,
) -> io::Result<()> {
    let Some(ctype) = column_type(&field.ftype) else {
        return Ok(());
    };
    write!(w, "{}\n", if *first { "" } else { "," })?;
    if comments {
        write_comment(w, 1, field.doc.as_deref())?;
    }
    if matches!(field.ftype, FieldType::Epoch | FieldType::Date) {
        write_comment(w, 1, Some("(Stored as a UNIX epoch value.)"))?;
    }
    write!(w, "\t{} {}", field.name, ctype)?;
    if field.flags.rowid {
        w.write_all(b" PRIMARY KEY")?;
    }
    if field.flags.unique {
        w.write_all(b" UNIQUE")?;
    }
    if !field.flags.rowid && !field.flags.null {
        w.write_all(b" NOT NULL")?;
    }
    *first = false;
    Ok(())
}

fn write_fkey<W: Write>(
    w: &mut W,
    cfg: &Config,
    field: &Field,
    first: &mut bool,
) -> io::Result<()> {
    if field.ftype == FieldType::Struct {
        return Ok(());
    }
    let Some(reference) = &field.reference else {
        return Ok(());
    };
    let Some(target) = reference.target else {
        return Ok(());
    };

    write!(
        w,
        "{}\n\tFOREIGN KEY({}) REFERENCES {}({})",
        if *first { "" } else { "," },
        field.name,
        cfg.strct(target.strct).name,
        cfg.field(target).name
    )?;
    if let Some(act) = field.actdel.sql() {
        write!(w, " ON DELETE {}", act)?;
    }
    if let Some(act) = field.actup.sql() {
        write!(w, " ON UPDATE {}", act)?;
    }
    *first = false;
    Ok(())
}

fn write_unique<W: Write>(w: &mut W, unique: &Unique, first: &mut bool) -> io::Result<()> {
    write!(w, "{}\n\tUNIQUE(", if *first { "" } else { "," })?;
    for (i, name) in unique.field_names.iter().enumerate() {
        write!(w, "{}{}", if i == 0 { "" } else { ", " }, name)?;
    }
    w.write_all(b")")?;
    *first = false;
    Ok(())
}

/// One `CREATE TABLE` statement with columns, foreign keys, and uniques.
pub(crate) fn write_struct<W: Write>(
    w: &mut W,
    cfg: &Config,
    strct: &StructDef,
    comments: bool,
) -> io::Result<()> {
    if comments {
        write_comment(w, 0, strct.doc.as_deref())?;
    }
    write!(w, "CREATE TABLE {} (", strct.name)?;
    let mut first = true;
    for field in &strct.fields {
        write_field(w, field, &mut first, comments)?;
    }
    for field in &strct.fields {
        write_fkey(w, cfg, field, &mut first)?;
    }
    for unique in &strct.uniques {
        write_unique(w, unique, &mut first)?;
    }
    w.write_all(b"\n);\n\n")
}

/// The full schema: pragma prologue, then one table per structure in
/// declaration order.
pub fn write_schema<W: Write>(w: &mut W, cfg: &Config) -> io::Result<()> {
    w.write_all(b"PRAGMA foreign_keys=ON;\n\n")?;
    for strct in &cfg.structs {
        write_struct(w, cfg, strct, true)?;
    }
    Ok(())
}
