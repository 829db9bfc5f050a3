//! C data-model bindings: a header describing the schema's types and
//! operation surface, and a source file implementing it over sqlite3.
//!
//! Operation names here are the same deterministic symbols the audit report
//! uses. The emitters favor a compact, readable rendition of each operation
//! over covering every corner of the language.

use std::io::{self, Write};

use crate::config::{
    Config, Field, FieldId, FieldType, Search, SearchKind, StructDef, StructId, Update,
    UpdateKind,
};

const WARNING: &str = "/*\n * WARNING: automatically generated by ort 0.1.0.\n * DO NOT EDIT!\n */\n";

/// C member type for a field; blobs add a companion `_sz` member.
fn member_type(field: &Field) -> String {
    match &field.ftype {
        FieldType::Real => "double ".into(),
        FieldType::Text | FieldType::Password | FieldType::Email => "char *".into(),
        FieldType::Blob => "void *".into(),
        FieldType::Enum(name) => format!("enum {} ", name),
        FieldType::Struct => String::new(),
        _ => "int64_t ".into(),
    }
}

/// C parameter declaration(s) for binding a field's value.
fn param_decl(field: &Field, name: &str) -> String {
    match &field.ftype {
        FieldType::Real => format!("double {}", name),
        FieldType::Text | FieldType::Password | FieldType::Email => {
            format!("const char *{}", name)
        }
        FieldType::Blob => format!("const void *{}, size_t {}_sz", name, name),
        FieldType::Enum(ename) => format!("enum {} {}", ename, name),
        _ => format!("int64_t {}", name),
    }
}

/// `sqlite3_bind_*` call for one parameter at a running index.
fn bind_call(field: &Field, name: &str) -> String {
    match &field.ftype {
        FieldType::Real => format!("sqlite3_bind_double(stmt, i++, {});", name),
        FieldType::Text | FieldType::Password | FieldType::Email => format!(
            "sqlite3_bind_text(stmt, i++, {}, -1, SQLITE_STATIC);",
            name
        ),
        FieldType::Blob => format!(
            "sqlite3_bind_blob(stmt, i++, {}, (int){}_sz, SQLITE_STATIC);",
            name, name
        ),
        FieldType::Enum(_) => format!("sqlite3_bind_int64(stmt, i++, (int64_t){});", name),
        _ => format!("sqlite3_bind_int64(stmt, i++, {});", name),
    }
}

/// `STMT_` constant derived from an operation symbol.
fn stmt_name(symbol: &str) -> String {
    format!("STMT_{}", symbol.trim_start_matches("db_").to_uppercase())
}

/// Fields that have their own column, in declaration order.
fn columns(strct: &StructDef) -> Vec<&Field> {
    strct
        .fields
        .iter()
        .filter(|f| f.ftype != FieldType::Struct)
        .collect()
}

/// Fields settable by an insert or whole-row update.
fn settable(strct: &StructDef) -> Vec<&Field> {
    columns(strct)
        .into_iter()
        .filter(|f| !f.flags.rowid)
        .collect()
}

/// Bindable `(param name, field)` pairs of a query sentence.
fn search_params<'a>(cfg: &'a Config, search: &'a Search) -> Vec<(&'a str, &'a Field)> {
    search
        .entries
        .iter()
        .filter(|e| !e.op.is_unary())
        .filter_map(|e| {
            e.chain
                .last()
                .map(|&fid| (e.uname.as_str(), cfg.field(fid)))
        })
        .collect()
}

fn cond_params<'a>(cfg: &'a Config, update: &'a Update) -> Vec<(&'a str, &'a Field)> {
    update
        .conds
        .iter()
        .filter(|c| !c.op.is_unary())
        .filter_map(|c| c.field.map(|fid| (c.field_name.as_str(), cfg.field(fid))))
        .collect()
}

fn mod_params<'a>(cfg: &'a Config, update: &'a Update) -> Vec<(&'a str, &'a Field)> {
    if update.update_all {
        settable(cfg.strct(update.parent))
            .into_iter()
            .map(|f| (f.name.as_str(), f))
            .collect()
    } else {
        update
            .mods
            .iter()
            .filter_map(|m| m.field.map(|fid| (m.field_name.as_str(), cfg.field(fid))))
            .collect()
    }
}

fn join_params(params: &[(&str, &Field)]) -> String {
    params
        .iter()
        .map(|(name, field)| param_decl(field, name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Structures ordered so that embedded struct members are complete before
/// use. The linker guarantees the edges form a DAG.
fn definition_order(cfg: &Config) -> Vec<StructId> {
    fn visit(cfg: &Config, s: usize, done: &mut Vec<bool>, out: &mut Vec<StructId>) {
        if done[s] {
            return;
        }
        done[s] = true;
        for field in &cfg.structs[s].fields {
            if field.ftype != FieldType::Struct {
                continue;
            }
            if let Some(target) = field.reference.as_ref().and_then(|r| r.target) {
                visit(cfg, target.strct.0, done, out);
            }
        }
        out.push(StructId(s));
    }

    let mut done = vec![false; cfg.structs.len()];
    let mut out = Vec::new();
    for s in 0..cfg.structs.len() {
        visit(cfg, s, &mut done, &mut out);
    }
    out
}

// ----------------------------------------------------------------------
// SQL statement table
// ----------------------------------------------------------------------

/// Alias bookkeeping for dotted sentence paths.
struct Joins {
    clauses: Vec<String>,
    aliases: Vec<(String, String)>,
}

impl Joins {
    fn new() -> Self {
        Self {
            clauses: Vec::new(),
            aliases: Vec::new(),
        }
    }

    /// Qualify the terminal field of `chain`, adding INNER JOINs for every
    /// struct-typed hop.
    fn qualify(&mut self, cfg: &Config, table: &str, chain: &[FieldId]) -> String {
        let mut from_alias = table.to_string();
        let mut prefix = String::new();
        for &fid in &chain[..chain.len().saturating_sub(1)] {
            let field = cfg.field(fid);
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(&field.name);
            if let Some((_, alias)) = self.aliases.iter().find(|(p, _)| *p == prefix) {
                from_alias = alias.clone();
                continue;
            }
            let alias = format!("a{}", self.aliases.len());
            let (source_col, target) = match field.reference.as_ref() {
                Some(r) => (
                    r.source
                        .map(|s| cfg.field(s).name.clone())
                        .unwrap_or_else(|| field.name.clone()),
                    r.target,
                ),
                None => (field.name.clone(), None),
            };
            if let Some(target) = target {
                self.clauses.push(format!(
                    " INNER JOIN {} AS {} ON {}.{} = {}.{}",
                    cfg.strct(target.strct).name,
                    alias,
                    alias,
                    cfg.field(target).name,
                    from_alias,
                    source_col
                ));
            }
            self.aliases.push((prefix.clone(), alias.clone()));
            from_alias = alias;
        }
        match chain.last() {
            Some(&fid) => format!("{}.{}", from_alias, cfg.field(fid).name),
            None => from_alias,
        }
    }
}

fn where_clause(cfg: &Config, table: &str, search: &Search, joins: &mut Joins) -> String {
    if search.entries.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = search
        .entries
        .iter()
        .map(|e| {
            let col = joins.qualify(cfg, table, &e.chain);
            if e.op.is_unary() {
                format!("{} {}", col, e.op.sql())
            } else {
                format!("{} {} ?", col, e.op.sql())
            }
        })
        .collect();
    format!(" WHERE {}", terms.join(" AND "))
}

fn select_sql(cfg: &Config, search: &Search) -> String {
    let strct = cfg.strct(search.parent);
    let table = &strct.name;
    let cols = if search.kind == SearchKind::Count {
        "COUNT(*)".to_string()
    } else {
        columns(strct)
            .iter()
            .map(|f| format!("{}.{}", table, f.name))
            .collect::<Vec<_>>()
            .join(",")
    };

    let mut joins = Joins::new();
    let filter = where_clause(cfg, table, search, &mut joins);
    let mut order_terms = Vec::new();
    for ord in &search.order {
        let col = joins.qualify(cfg, table, &ord.chain);
        order_terms.push(if ord.descending {
            format!("{} DESC", col)
        } else {
            col
        });
    }

    let distinct = if search.distinct.is_some() {
        "DISTINCT "
    } else {
        ""
    };
    let mut sql = format!(
        "SELECT {}{} FROM {}{}{}",
        distinct,
        cols,
        table,
        joins.clauses.join(""),
        filter
    );
    if let Some(group) = &search.group {
        sql.push_str(&format!(" GROUP BY {}.{}", table, group.replace('.', "_")));
    }
    if !order_terms.is_empty() {
        sql.push_str(&format!(" ORDER BY {}", order_terms.join(",")));
    }
    if let Some(limit) = search.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
        if let Some(offset) = search.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }
    sql
}

fn insert_sql(strct: &StructDef) -> String {
    let fields = settable(strct);
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    let marks = vec!["?"; fields.len()];
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        strct.name,
        names.join(","),
        marks.join(",")
    )
}

fn update_sql(cfg: &Config, update: &Update) -> String {
    let table = &cfg.strct(update.parent).name;
    let sets: Vec<String> = mod_params(cfg, update)
        .iter()
        .map(|(name, _)| (*name).to_string())
        .zip(update_mod_ops(cfg, update))
        .map(|(name, op)| match op {
            "cat" => format!("{} = {} || ?", name, name),
            "inc" => format!("{} = {} + ?", name, name),
            "dec" => format!("{} = {} - ?", name, name),
            _ => format!("{} = ?", name),
        })
        .collect();
    format!(
        "UPDATE {} SET {}{}",
        table,
        sets.join(", "),
        update_where(update)
    )
}

fn update_mod_ops<'a>(cfg: &'a Config, update: &'a Update) -> Vec<&'static str> {
    if update.update_all {
        vec!["set"; mod_params(cfg, update).len()]
    } else {
        update
            .mods
            .iter()
            .filter(|m| m.field.is_some())
            .map(|m| m.modifier.tag())
            .collect()
    }
}

fn update_where(update: &Update) -> String {
    if update.conds.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = update
        .conds
        .iter()
        .map(|c| {
            if c.op.is_unary() {
                format!("{} {}", c.field_name, c.op.sql())
            } else {
                format!("{} {} ?", c.field_name, c.op.sql())
            }
        })
        .collect();
    format!(" WHERE {}", terms.join(" AND "))
}

fn delete_sql(cfg: &Config, update: &Update) -> String {
    format!(
        "DELETE FROM {}{}",
        cfg.strct(update.parent).name,
        update_where(update)
    )
}

/// Every operation's `(symbol, sql)` in declaration order.
fn statements(cfg: &Config) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for strct in &cfg.structs {
        if strct.insert.is_some() {
            out.push((format!("db_{}_insert", strct.name), insert_sql(strct)));
        }
        for search in &strct.searches {
            out.push((search.symbol(cfg), select_sql(cfg, search)));
        }
        for update in &strct.updates {
            out.push((update.symbol(cfg), update_sql(cfg, update)));
        }
        for delete in &strct.deletes {
            out.push((delete.symbol(cfg), delete_sql(cfg, delete)));
        }
    }
    out
}

// ----------------------------------------------------------------------
// Header
// ----------------------------------------------------------------------

fn write_c_comment<W: Write>(w: &mut W, level: usize, doc: Option<&str>) -> io::Result<()> {
    let Some(doc) = doc else { return Ok(()) };
    let tabs = "\t".repeat(level);
    writeln!(w, "{}/*", tabs)?;
    for line in doc.lines() {
        writeln!(w, "{} * {}", tabs, line)?;
    }
    writeln!(w, "{} */", tabs)
}

/// The `-C` output: type declarations and operation prototypes.
pub fn write_header<W: Write>(
    w: &mut W,
    cfg: &Config,
    json: bool,
    valids: bool,
) -> io::Result<()> {
    w.write_all(WARNING.as_bytes())?;
    w.write_all(b"#ifndef DB_H\n#define DB_H\n\n#include <stddef.h>\n#include <stdint.h>\n")?;
    if json {
        w.write_all(b"#include <stdio.h>\n")?;
    }
    w.write_all(b"\nstruct sqlite3;\n")?;

    for enm in &cfg.enums {
        w.write_all(b"\n")?;
        write_c_comment(w, 0, enm.doc.as_deref())?;
        writeln!(w, "enum {} {{", enm.name)?;
        let n = enm.items.len();
        for (i, item) in enm.items.iter().enumerate() {
            write_c_comment(w, 1, item.doc.as_deref())?;
            writeln!(
                w,
                "\t{}_{} = {}{}",
                enm.name.to_uppercase(),
                item.name,
                item.value,
                if i + 1 < n { "," } else { "" }
            )?;
        }
        w.write_all(b"};\n")?;
    }

    for bitf in &cfg.bitfields {
        w.write_all(b"\n")?;
        write_c_comment(w, 0, bitf.doc.as_deref())?;
        writeln!(w, "enum {} {{", bitf.name)?;
        let n = bitf.items.len();
        for (i, item) in bitf.items.iter().enumerate() {
            write_c_comment(w, 1, item.doc.as_deref())?;
            let prefix = bitf.name.to_uppercase();
            writeln!(w, "\tBITI_{}_{} = {},", prefix, item.name, item.value)?;
            writeln!(
                w,
                "\tBITF_{}_{} = (1 << {}){}",
                prefix,
                item.name,
                item.value,
                if i + 1 < n { "," } else { "" }
            )?;
        }
        w.write_all(b"};\n")?;
    }

    if cfg.roles_enabled() {
        w.write_all(b"\nenum db_role {\n")?;
        let n = cfg.roles.len();
        for (i, role) in cfg.roles.iter().enumerate() {
            writeln!(
                w,
                "\tROLE_{}{}",
                role.name,
                if i + 1 < n { "," } else { "" }
            )?;
        }
        w.write_all(b"};\n")?;
    }

    for sid in definition_order(cfg) {
        let strct = cfg.strct(sid);
        w.write_all(b"\n")?;
        write_c_comment(w, 0, strct.doc.as_deref())?;
        writeln!(w, "struct {} {{", strct.name)?;
        for field in &strct.fields {
            write_c_comment(w, 1, field.doc.as_deref())?;
            if field.ftype == FieldType::Struct {
                if let Some(r) = &field.reference {
                    writeln!(w, "\tstruct {} {};", r.target_struct, field.name)?;
                }
                continue;
            }
            writeln!(w, "\t{}{};", member_type(field), field.name)?;
            if field.ftype == FieldType::Blob {
                writeln!(w, "\tsize_t {}_sz;", field.name)?;
            }
            if field.flags.null {
                writeln!(w, "\tint has_{};", field.name)?;
            }
        }
        w.write_all(b"};\n")?;
    }

    w.write_all(b"\n__BEGIN_DECLS\n")?;
    for strct in &cfg.structs {
        w.write_all(b"\n")?;
        writeln!(w, "void db_{}_free(struct {} *p);", strct.name, strct.name)?;
        if strct.insert.is_some() {
            let params = settable(strct)
                .iter()
                .map(|f| param_decl(f, &f.name))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                w,
                "int64_t db_{}_insert(struct sqlite3 *db{}{});",
                strct.name,
                if params.is_empty() { "" } else { ", " },
                params
            )?;
        }
        for search in &strct.searches {
            let params = join_params(&search_params(cfg, search));
            let sep = if params.is_empty() { "" } else { ", " };
            let sym = search.symbol(cfg);
            match search.kind {
                SearchKind::Count => writeln!(
                    w,
                    "uint64_t {}(struct sqlite3 *db{}{});",
                    sym, sep, params
                )?,
                SearchKind::Get => writeln!(
                    w,
                    "struct {} *{}(struct sqlite3 *db{}{});",
                    strct.name, sym, sep, params
                )?,
                SearchKind::List => writeln!(
                    w,
                    "struct {} **{}(struct sqlite3 *db{}{});",
                    strct.name, sym, sep, params
                )?,
                SearchKind::Iterate => writeln!(
                    w,
                    "void {}(struct sqlite3 *db, void (*cb)(const struct {} *, void *), void *arg{}{});",
                    sym, strct.name, sep, params
                )?,
            }
        }
        for update in strct.updates.iter().chain(&strct.deletes) {
            let mut params: Vec<(&str, &Field)> = Vec::new();
            if update.kind == UpdateKind::Modify {
                params.extend(mod_params(cfg, update));
            }
            params.extend(cond_params(cfg, update));
            let joined = join_params(&params);
            let sep = if joined.is_empty() { "" } else { ", " };
            writeln!(
                w,
                "int {}(struct sqlite3 *db{}{});",
                update.symbol(cfg),
                sep,
                joined
            )?;
        }
        if json {
            writeln!(
                w,
                "void json_print_{}(FILE *f, const struct {} *p);",
                strct.name, strct.name
            )?;
        }
        if valids {
            for field in columns(strct) {
                writeln!(
                    w,
                    "int valid_{}_{}(const char *v);",
                    strct.name, field.name
                )?;
            }
        }
    }
    w.write_all(b"\n__END_DECLS\n\n#endif\n")
}

// ----------------------------------------------------------------------
// Source
// ----------------------------------------------------------------------

fn write_fill<W: Write>(w: &mut W, strct: &StructDef) -> io::Result<()> {
    writeln!(
        w,
        "\nstatic void\ndb_{}_fill(struct {} *p, sqlite3_stmt *stmt)\n{{\n\tint i = 0;\n\n\tmemset(p, 0, sizeof(*p));",
        strct.name, strct.name
    )?;
    for field in columns(strct) {
        if field.flags.null {
            writeln!(
                w,
                "\tp->has_{} = sqlite3_column_type(stmt, i) != SQLITE_NULL;",
                field.name
            )?;
        }
        match &field.ftype {
            FieldType::Real => {
                writeln!(w, "\tp->{} = sqlite3_column_double(stmt, i++);", field.name)?
            }
            FieldType::Text | FieldType::Password | FieldType::Email => writeln!(
                w,
                "\tp->{} = strdup((const char *)sqlite3_column_text(stmt, i++));",
                field.name
            )?,
            FieldType::Blob => {
                writeln!(
                    w,
                    "\tp->{}_sz = (size_t)sqlite3_column_bytes(stmt, i);",
                    field.name
                )?;
                writeln!(
                    w,
                    "\tif ((p->{} = malloc(p->{}_sz)) != NULL)",
                    field.name, field.name
                )?;
                writeln!(
                    w,
                    "\t\tmemcpy(p->{}, sqlite3_column_blob(stmt, i), p->{}_sz);",
                    field.name, field.name
                )?;
                writeln!(w, "\ti++;")?;
            }
            FieldType::Enum(ename) => writeln!(
                w,
                "\tp->{} = (enum {})sqlite3_column_int64(stmt, i++);",
                field.name, ename
            )?,
            _ => writeln!(w, "\tp->{} = sqlite3_column_int64(stmt, i++);", field.name)?,
        }
    }
    w.write_all(b"}\n")
}

fn write_free<W: Write>(w: &mut W, strct: &StructDef) -> io::Result<()> {
    writeln!(
        w,
        "\nvoid\ndb_{}_free(struct {} *p)\n{{\n\tif (p == NULL)\n\t\treturn;",
        strct.name, strct.name
    )?;
    for field in columns(strct) {
        if field.ftype.is_text() || field.ftype == FieldType::Blob {
            writeln!(w, "\tfree(p->{});", field.name)?;
        }
    }
    w.write_all(b"\tfree(p);\n}\n")
}

fn write_binds<W: Write>(w: &mut W, params: &[(&str, &Field)]) -> io::Result<()> {
    if params.is_empty() {
        return Ok(());
    }
    for (name, field) in params {
        writeln!(w, "\t{}", bind_call(field, name))?;
    }
    Ok(())
}

/// The `-c` output: statement table plus operation definitions.
pub fn write_source<W: Write>(
    w: &mut W,
    cfg: &Config,
    json: bool,
    valids: bool,
    header: &str,
) -> io::Result<()> {
    w.write_all(WARNING.as_bytes())?;
    w.write_all(b"#include <stdint.h>\n#include <stdio.h>\n#include <stdlib.h>\n#include <string.h>\n")?;
    if json {
        w.write_all(b"#include <inttypes.h>\n")?;
    }
    w.write_all(b"\n#include <sqlite3.h>\n\n")?;
    writeln!(w, "#include \"{}\"", header)?;

    let stmts = statements(cfg);
    w.write_all(b"\nenum stmt {\n")?;
    for (symbol, _) in &stmts {
        writeln!(w, "\t{},", stmt_name(symbol))?;
    }
    w.write_all(b"\tSTMT__MAX\n};\n\nstatic const char *const stmts[STMT__MAX] = {\n")?;
    for (_, sql) in &stmts {
        writeln!(w, "\t\"{}\",", sql)?;
    }
    w.write_all(b"};\n")?;

    for strct in &cfg.structs {
        write_fill(w, strct)?;
        write_free(w, strct)?;

        if strct.insert.is_some() {
            let fields = settable(strct);
            let params = fields
                .iter()
                .map(|f| param_decl(f, &f.name))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                w,
                "\nint64_t\ndb_{}_insert(struct sqlite3 *db{}{})\n{{\n\tsqlite3_stmt *stmt;\n\tint64_t id = -1;\n\tint i = 1;",
                strct.name,
                if params.is_empty() { "" } else { ", " },
                params
            )?;
            writeln!(
                w,
                "\n\tif (sqlite3_prepare_v2(db, stmts[{}], -1, &stmt, NULL) != SQLITE_OK)\n\t\treturn -1;",
                stmt_name(&format!("db_{}_insert", strct.name))
            )?;
            let pairs: Vec<(&str, &Field)> =
                fields.iter().map(|f| (f.name.as_str(), *f)).collect();
            write_binds(w, &pairs)?;
            w.write_all(
                b"\tif (sqlite3_step(stmt) == SQLITE_DONE)\n\t\tid = sqlite3_last_insert_rowid(db);\n\tsqlite3_finalize(stmt);\n\treturn id;\n}\n",
            )?;
        }

        for search in &strct.searches {
            let sym = search.symbol(cfg);
            let params = search_params(cfg, search);
            let joined = join_params(&params);
            let sep = if joined.is_empty() { "" } else { ", " };
            match search.kind {
                SearchKind::Count => {
                    writeln!(
                        w,
                        "\nuint64_t\n{}(struct sqlite3 *db{}{})\n{{\n\tsqlite3_stmt *stmt;\n\tuint64_t count = 0;\n\tint i = 1;",
                        sym, sep, joined
                    )?;
                    writeln!(
                        w,
                        "\n\tif (sqlite3_prepare_v2(db, stmts[{}], -1, &stmt, NULL) != SQLITE_OK)\n\t\treturn 0;",
                        stmt_name(&sym)
                    )?;
                    write_binds(w, &params)?;
                    w.write_all(b"\tif (sqlite3_step(stmt) == SQLITE_ROW)\n\t\tcount = (uint64_t)sqlite3_column_int64(stmt, 0);\n\tsqlite3_finalize(stmt);\n\treturn count;\n}\n")?;
                }
                SearchKind::Get => {
                    writeln!(
                        w,
                        "\nstruct {} *\n{}(struct sqlite3 *db{}{})\n{{\n\tsqlite3_stmt *stmt;\n\tstruct {} *p = NULL;\n\tint i = 1;",
                        strct.name, sym, sep, joined, strct.name
                    )?;
                    writeln!(
                        w,
                        "\n\tif (sqlite3_prepare_v2(db, stmts[{}], -1, &stmt, NULL) != SQLITE_OK)\n\t\treturn NULL;",
                        stmt_name(&sym)
                    )?;
                    write_binds(w, &params)?;
                    writeln!(
                        w,
                        "\tif (sqlite3_step(stmt) == SQLITE_ROW &&\n\t    (p = malloc(sizeof(struct {}))) != NULL)\n\t\tdb_{}_fill(p, stmt);\n\tsqlite3_finalize(stmt);\n\treturn p;\n}}",
                        strct.name, strct.name
                    )?;
                }
                SearchKind::List => {
                    writeln!(
                        w,
                        "\nstruct {} **\n{}(struct sqlite3 *db{}{})\n{{\n\tsqlite3_stmt *stmt;\n\tstruct {} **rows = NULL;\n\tvoid *pp;\n\tsize_t n = 0;\n\tint i = 1;",
                        strct.name, sym, sep, joined, strct.name
                    )?;
                    writeln!(
                        w,
                        "\n\tif (sqlite3_prepare_v2(db, stmts[{}], -1, &stmt, NULL) != SQLITE_OK)\n\t\treturn NULL;",
                        stmt_name(&sym)
                    )?;
                    write_binds(w, &params)?;
                    writeln!(
                        w,
                        "\twhile (sqlite3_step(stmt) == SQLITE_ROW) {{\n\t\tif ((pp = realloc(rows,\n\t\t    (n + 2) * sizeof(struct {} *))) == NULL)\n\t\t\tbreak;\n\t\trows = pp;\n\t\tif ((rows[n] = malloc(sizeof(struct {}))) == NULL)\n\t\t\tbreak;\n\t\tdb_{}_fill(rows[n++], stmt);\n\t\trows[n] = NULL;\n\t}}\n\tsqlite3_finalize(stmt);\n\treturn rows;\n}}",
                        strct.name, strct.name, strct.name
                    )?;
                }
                SearchKind::Iterate => {
                    writeln!(
                        w,
                        "\nvoid\n{}(struct sqlite3 *db, void (*cb)(const struct {} *, void *), void *arg{}{})\n{{\n\tsqlite3_stmt *stmt;\n\tstruct {} p;\n\tint i = 1;",
                        sym, strct.name, sep, joined, strct.name
                    )?;
                    writeln!(
                        w,
                        "\n\tif (sqlite3_prepare_v2(db, stmts[{}], -1, &stmt, NULL) != SQLITE_OK)\n\t\treturn;",
                        stmt_name(&sym)
                    )?;
                    write_binds(w, &params)?;
                    writeln!(
                        w,
                        "\twhile (sqlite3_step(stmt) == SQLITE_ROW) {{\n\t\tdb_{}_fill(&p, stmt);\n\t\tcb(&p, arg);\n\t}}\n\tsqlite3_finalize(stmt);\n}}",
                        strct.name
                    )?;
                }
            }
        }

        for update in strct.updates.iter().chain(&strct.deletes) {
            let sym = update.symbol(cfg);
            let mut params: Vec<(&str, &Field)> = Vec::new();
            if update.kind == UpdateKind::Modify {
                params.extend(mod_params(cfg, update));
            }
            params.extend(cond_params(cfg, update));
            let joined = join_params(&params);
            let sep = if joined.is_empty() { "" } else { ", " };
            writeln!(
                w,
                "\nint\n{}(struct sqlite3 *db{}{})\n{{\n\tsqlite3_stmt *stmt;\n\tint rc;\n\tint i = 1;",
                sym, sep, joined
            )?;
            writeln!(
                w,
                "\n\tif (sqlite3_prepare_v2(db, stmts[{}], -1, &stmt, NULL) != SQLITE_OK)\n\t\treturn 0;",
                stmt_name(&sym)
            )?;
            write_binds(w, &params)?;
            w.write_all(b"\trc = sqlite3_step(stmt) == SQLITE_DONE;\n\tsqlite3_finalize(stmt);\n\treturn rc;\n}\n")?;
        }

        if json {
            write_json_print(w, strct)?;
        }
        if valids {
            write_valids(w, strct)?;
        }
    }
    Ok(())
}

fn write_json_print<W: Write>(w: &mut W, strct: &StructDef) -> io::Result<()> {
    writeln!(
        w,
        "\nvoid\njson_print_{}(FILE *f, const struct {} *p)\n{{\n\tfputc('{{', f);",
        strct.name, strct.name
    )?;
    let mut first = true;
    for field in columns(strct) {
        if field.ftype == FieldType::Password || field.flags.noexport {
            continue;
        }
        let comma = if first { "" } else { "," };
        match &field.ftype {
            FieldType::Real => writeln!(
                w,
                "\tfprintf(f, \"{}\\\"{}\\\": %g\", p->{});",
                comma, field.name, field.name
            )?,
            FieldType::Text | FieldType::Email => writeln!(
                w,
                "\tfprintf(f, \"{}\\\"{}\\\": \\\"%s\\\"\", p->{});",
                comma, field.name, field.name
            )?,
            FieldType::Blob => continue,
            _ => writeln!(
                w,
                "\tfprintf(f, \"{}\\\"{}\\\": %\" PRId64, (int64_t)p->{});",
                comma, field.name, field.name
            )?,
        }
        first = false;
    }
    w.write_all(b"\tfputc('}', f);\n}\n")
}

fn write_valids<W: Write>(w: &mut W, strct: &StructDef) -> io::Result<()> {
    for field in columns(strct) {
        writeln!(
            w,
            "\nint\nvalid_{}_{}(const char *v)\n{{\n\tif (v == NULL)\n\t\treturn 0;",
            strct.name, field.name
        )?;
        for limit in &field.limits {
            let test = match &field.ftype {
                FieldType::Real => format!("strtod(v, NULL) {} {}", limit.op.sql(), limit.value),
                t if t.is_text() => format!(
                    "strlen(v) {} (size_t){}",
                    limit.op.sql(),
                    limit.value
                ),
                _ => format!(
                    "strtoll(v, NULL, 10) {} {}",
                    limit.op.sql(),
                    limit.value
                ),
            };
            writeln!(w, "\tif (!({}))\n\t\treturn 0;", test)?;
        }
        w.write_all(b"\treturn 1;\n}\n")?;
    }
    Ok(())
}
