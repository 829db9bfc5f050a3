//! Audit report serialization.
//!
//! The default output embeds the report as a JSON object inside a small
//! script wrapper. Its byte layout is part of the tool's contract, down to
//! the `\/` escape, so it is written directly rather than through a JSON
//! library; the `--json` mode hands the same report to serde instead.

use std::io::{self, Write};

use crate::audit::AuditReport;

/// Write a doc string in its quoted, escaped form, or the literal `null`.
fn write_doc<W: Write>(w: &mut W, doc: Option<&str>) -> io::Result<()> {
    let Some(doc) = doc else {
        return w.write_all(b"null");
    };
    w.write_all(b"\"")?;
    for c in doc.chars() {
        match c {
            '"' | '\\' | '/' => write!(w, "\\{}", c)?,
            '\u{8}' => w.write_all(b"\\b")?,
            '\u{c}' => w.write_all(b"\\f")?,
            '\n' => w.write_all(b"\\n")?,
            '\r' => w.write_all(b"\\r")?,
            '\t' => w.write_all(b"\\t")?,
            c => write!(w, "{}", c)?,
        }
    }
    w.write_all(b"\"")
}

fn write_symbol_array<W: Write>(w: &mut W, key: &str, symbols: &[String]) -> io::Result<()> {
    write!(w, "\t\t\t\"{}\": [", key)?;
    for (i, sym) in symbols.iter().enumerate() {
        write!(w, "{}\n\t\t\t\t\"{}\"", if i == 0 { "" } else { "," }, sym)?;
    }
    Ok(())
}

/// Write the script-wrapped report.
pub fn write_script<W: Write>(w: &mut W, report: &AuditReport) -> io::Result<()> {
    write!(
        w,
        "(function(root) {{\n\t'use strict';\n\tvar audit = {{\n\t    \"role\": \"{}\",\n\t    \"doc\": ",
        report.role
    )?;
    write_doc(w, report.doc.as_deref())?;
    w.write_all(b",\n\t    \"access\": [\n")?;

    let naccess = report.access.len();
    for (i, strct) in report.access.iter().enumerate() {
        write!(
            w,
            "\t\t{{ \"name\": \"{}\",\n\t\t  \"access\": {{\n",
            strct.name
        )?;

        if let Some(reach) = &strct.reach {
            write!(
                w,
                "\t\t\t\"exportable\": {},\n\t\t\t\"data\": [\n",
                reach.exportable
            )?;
            let nfields = reach.data.len();
            for (fi, name) in reach.data.iter().enumerate() {
                write!(
                    w,
                    "\t\t\t\t\"{}\"{}\n",
                    name,
                    if fi + 1 < nfields { "," } else { "" }
                )?;
            }
            w.write_all(b"\t\t\t],\n\t\t\t\"accessfrom\": [\n")?;
            let nsrcs = reach.accessfrom.len();
            for (pi, path) in reach.accessfrom.iter().enumerate() {
                write!(
                    w,
                    "\t\t\t\t{{ \"function\": \"{}\",\n\t\t\t\t  \"exporting\": {},\n\t\t\t\t  \"path\": \"{}\" }}{}\n",
                    path.function,
                    path.exporting,
                    path.path,
                    if pi + 1 < nsrcs { "," } else { "" }
                )?;
            }
            w.write_all(b"\t\t\t],\n")?;
        }

        match &strct.insert {
            Some(sym) => write!(w, "\t\t\t\"insert\": \"{}\",\n", sym)?,
            None => w.write_all(b"\t\t\t\"insert\": null,\n")?,
        }
        write_symbol_array(w, "updates", &strct.updates)?;
        w.write_all(b"],\n")?;
        write_symbol_array(w, "deletes", &strct.deletes)?;
        w.write_all(b"],\n")?;
        write_symbol_array(w, "iterates", &strct.iterates)?;
        w.write_all(b"],\n")?;
        write_symbol_array(w, "lists", &strct.lists)?;
        w.write_all(b"],\n")?;
        write_symbol_array(w, "searches", &strct.searches)?;
        w.write_all(b"]\n")?;

        write!(w, "\t\t}}}}{}\n", if i + 1 < naccess { "," } else { "" })?;
    }

    w.write_all(b"\t],\n\t\"functions\": {")?;
    for (i, func) in report.functions.iter().enumerate() {
        write!(
            w,
            "{}\n\t\t\"{}\": {{\n\t\t\t\"doc\": ",
            if i == 0 { "" } else { "," },
            func.symbol
        )?;
        write_doc(w, func.doc.as_deref())?;
        write!(w, ",\n\t\t\t\"type\": \"{}\" }}", func.kind)?;
    }

    w.write_all(b"\n\t},\n\t\"fields\": {\n")?;
    for (i, field) in report.fields.iter().enumerate() {
        write!(
            w,
            "{}\n\t\t\"{}\": {{\n\t\t\t\"export\": {},\n\t\t\t\"doc\": ",
            if i == 0 { "" } else { "," },
            field.name,
            field.export
        )?;
        write_doc(w, field.doc.as_deref())?;
        w.write_all(b" }")?;
    }

    w.write_all(b"\n\t}};\n\n\troot.audit = audit;\n})(this);\n")
}

/// Write the report as plain pretty-printed JSON.
pub fn write_json<W: Write>(w: &mut W, report: &AuditReport) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *w, report)?;
    w.write_all(b"\n")
}
