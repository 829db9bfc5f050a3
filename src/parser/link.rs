//! Reference resolution and invariant checking after parsing.

use std::collections::HashMap;

use crate::config::{
    Config, DefaultValue, FieldId, FieldType, Modifier, Operator, Rolemap, RolemapTarget,
    RoleRef, StructId,
};
use crate::diag::Pos;
use crate::Error;

const CHANNEL: &str = "link";

/// Resolve every cross-entity reference in `cfg` and verify the structural
/// invariants. All violations are queued; the first error does not stop the
/// remaining checks.
pub fn parse_link(cfg: &mut Config) -> Result<(), Error> {
    let before = cfg.diagnostics.error_count();

    check_names(cfg);
    check_enums(cfg);
    check_bitfields(cfg);
    resolve_field_types(cfg);
    resolve_remote_refs(cfg);
    resolve_struct_refs(cfg);
    check_reference_cycles(cfg);
    resolve_uniques(cfg);
    resolve_searches(cfg);
    resolve_updates(cfg);
    resolve_rolemaps(cfg);

    let errors = cfg.diagnostics.error_count() - before;
    if errors > 0 {
        Err(Error::Link(errors))
    } else {
        log::debug!(
            "linked {} structure(s), {} enum(s), {} bitfield(s)",
            cfg.structs.len(),
            cfg.enums.len(),
            cfg.bitfields.len()
        );
        Ok(())
    }
}

/// Top-level names share one namespace; field names are per-structure.
fn check_names(cfg: &mut Config) {
    let mut names: Vec<(String, &'static str, Pos)> = Vec::new();
    for s in &cfg.structs {
        names.push((s.name.clone(), "structure", s.pos.clone()));
    }
    for e in &cfg.enums {
        names.push((e.name.clone(), "enumeration", e.pos.clone()));
    }
    for b in &cfg.bitfields {
        names.push((b.name.clone(), "bitfield", b.pos.clone()));
    }

    let mut seen: HashMap<String, &'static str> = HashMap::new();
    let mut errors = Vec::new();
    for (name, kind, pos) in names {
        if let Some(prev) = seen.get(&name) {
            errors.push((
                pos,
                format!("name '{}' already declared as a {}", name, prev),
            ));
        } else {
            seen.insert(name, kind);
        }
    }
    for (pos, msg) in errors {
        cfg.diagnostics.error(CHANNEL, Some(pos), msg);
    }

    let mut field_errors = Vec::new();
    for s in &cfg.structs {
        if s.fields.is_empty() {
            field_errors.push((s.pos.clone(), format!("structure '{}' has no fields", s.name)));
        }
        let mut rowids = 0usize;
        let mut seen: HashMap<&str, ()> = HashMap::new();
        for f in &s.fields {
            if seen.insert(f.name.as_str(), ()).is_some() {
                field_errors.push((f.pos.clone(), format!("duplicate field '{}'", f.name)));
            }
            if f.flags.rowid {
                rowids += 1;
                if rowids > 1 {
                    field_errors.push((
                        f.pos.clone(),
                        format!("structure '{}' has more than one rowid", s.name),
                    ));
                }
                if !matches!(f.ftype, FieldType::Int) {
                    field_errors.push((f.pos.clone(), "rowid fields must be integers".into()));
                }
            }
        }
    }
    for (pos, msg) in field_errors {
        cfg.diagnostics.error(CHANNEL, Some(pos), msg);
    }
}

fn check_enums(cfg: &mut Config) {
    let mut errors = Vec::new();
    for e in &cfg.enums {
        let mut names: HashMap<&str, ()> = HashMap::new();
        let mut values: HashMap<i64, &str> = HashMap::new();
        for item in &e.items {
            if names.insert(item.name.as_str(), ()).is_some() {
                errors.push((item.pos.clone(), format!("duplicate item '{}'", item.name)));
            }
            if let Some(prev) = values.insert(item.value, item.name.as_str()) {
                errors.push((
                    item.pos.clone(),
                    format!("item '{}' reuses the value of '{}'", item.name, prev),
                ));
            }
        }
    }
    for (pos, msg) in errors {
        cfg.diagnostics.error(CHANNEL, Some(pos), msg);
    }
}

fn check_bitfields(cfg: &mut Config) {
    let mut errors = Vec::new();
    for b in &cfg.bitfields {
        let mut names: HashMap<&str, ()> = HashMap::new();
        let mut values: HashMap<i64, &str> = HashMap::new();
        for item in &b.items {
            if names.insert(item.name.as_str(), ()).is_some() {
                errors.push((item.pos.clone(), format!("duplicate item '{}'", item.name)));
            }
            if !(0..64).contains(&item.value) {
                errors.push((
                    item.pos.clone(),
                    format!("bit index {} out of range", item.value),
                ));
            } else if let Some(prev) = values.insert(item.value, item.name.as_str()) {
                errors.push((
                    item.pos.clone(),
                    format!("item '{}' reuses the bit of '{}'", item.name, prev),
                ));
            }
        }
    }
    for (pos, msg) in errors {
        cfg.diagnostics.error(CHANNEL, Some(pos), msg);
    }
}

/// Resolve `enum`/`bits` type references and enum-item defaults.
fn resolve_field_types(cfg: &mut Config) {
    for s in 0..cfg.structs.len() {
        for f in 0..cfg.structs[s].fields.len() {
            let (ftype, default, pos) = {
                let fld = &cfg.structs[s].fields[f];
                (fld.ftype.clone(), fld.default.clone(), fld.pos.clone())
            };
            match &ftype {
                FieldType::Enum(name) => match cfg.find_enum(name) {
                    Some(id) => {
                        cfg.structs[s].fields[f].enum_ref = Some(id);
                        if let Some(DefaultValue::EnumItem(item)) = &default {
                            if cfg.enm(id).find_item(item).is_none() {
                                cfg.diagnostics.error(
                                    CHANNEL,
                                    Some(pos),
                                    format!("unknown item '{}' in enum '{}'", item, name),
                                );
                            }
                        }
                    }
                    None => {
                        cfg.diagnostics.error(
                            CHANNEL,
                            Some(pos),
                            format!("unknown enumeration '{}'", name),
                        );
                    }
                },
                FieldType::Bits(name) => match cfg.find_bitfield(name) {
                    Some(id) => cfg.structs[s].fields[f].bitf_ref = Some(id),
                    None => {
                        cfg.diagnostics.error(
                            CHANNEL,
                            Some(pos),
                            format!("unknown bitfield '{}'", name),
                        );
                    }
                },
                _ => {}
            }
        }
    }
}

/// Resolve `field name:strct.field` references. Targets must be the rowid of
/// another structure and carry the same type as the source.
fn resolve_remote_refs(cfg: &mut Config) {
    for s in 0..cfg.structs.len() {
        for f in 0..cfg.structs[s].fields.len() {
            let (reference, ftype, pos) = {
                let fld = &cfg.structs[s].fields[f];
                (fld.reference.clone(), fld.ftype.clone(), fld.pos.clone())
            };
            let Some(r) = reference else { continue };
            if ftype == FieldType::Struct {
                continue;
            }

            let Some(tsid) = cfg.find_struct(&r.target_struct) else {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    format!("unknown structure '{}'", r.target_struct),
                );
                continue;
            };
            if tsid.0 == s {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    "reference targets its own structure",
                );
                continue;
            }
            let Some(tfi) = cfg.strct(tsid).find_field(&r.target_field) else {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    format!(
                        "unknown field '{}.{}'",
                        r.target_struct, r.target_field
                    ),
                );
                continue;
            };
            let target = &cfg.strct(tsid).fields[tfi];
            if !target.flags.rowid {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    format!(
                        "reference target '{}.{}' is not a rowid",
                        r.target_struct, r.target_field
                    ),
                );
                continue;
            }
            if !target.ftype.same_kind(&ftype) {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    "reference and target types differ",
                );
                continue;
            }

            if let Some(fref) = cfg.structs[s].fields[f].reference.as_mut() {
                fref.source = Some(FieldId {
                    strct: StructId(s),
                    index: f,
                });
                fref.target = Some(FieldId {
                    strct: tsid,
                    index: tfi,
                });
            }
        }
    }
}

/// Wire struct-typed fields to the reference of their source field.
fn resolve_struct_refs(cfg: &mut Config) {
    for s in 0..cfg.structs.len() {
        for f in 0..cfg.structs[s].fields.len() {
            let (is_struct, source_name, pos) = {
                let fld = &cfg.structs[s].fields[f];
                (
                    fld.ftype == FieldType::Struct,
                    fld.reference.as_ref().map(|r| r.source_name.clone()),
                    fld.pos.clone(),
                )
            };
            if !is_struct {
                continue;
            }
            let Some(source_name) = source_name else { continue };

            let Some(si) = cfg.structs[s].find_field(&source_name) else {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    format!("unknown source field '{}'", source_name),
                );
                continue;
            };
            if si == f {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    "struct field names itself as source",
                );
                continue;
            }
            let source = &cfg.structs[s].fields[si];
            let Some(sref) = source.reference.clone() else {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    format!("source field '{}' has no reference", source_name),
                );
                continue;
            };
            // Unresolved source reference: already reported there.
            let Some(target) = sref.target else { continue };

            if let Some(fref) = cfg.structs[s].fields[f].reference.as_mut() {
                fref.source = Some(FieldId {
                    strct: StructId(s),
                    index: si,
                });
                fref.target = Some(target);
                fref.target_struct = sref.target_struct;
                fref.target_field = sref.target_field;
            }
        }
    }
}

/// Struct-typed field edges must form a DAG; the audit traversal depends on
/// it even though it guards against revisits anyway.
fn check_reference_cycles(cfg: &mut Config) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unseen,
        Active,
        Done,
    }

    fn visit(
        cfg: &Config,
        s: usize,
        marks: &mut Vec<Mark>,
        cycles: &mut Vec<(Pos, String)>,
    ) {
        marks[s] = Mark::Active;
        for f in &cfg.structs[s].fields {
            if f.ftype != FieldType::Struct {
                continue;
            }
            let Some(target) = f.reference.as_ref().and_then(|r| r.target) else {
                continue;
            };
            let t = target.strct.0;
            match marks[t] {
                Mark::Active => cycles.push((
                    f.pos.clone(),
                    format!(
                        "reference cycle through '{}.{}'",
                        cfg.structs[s].name, f.name
                    ),
                )),
                Mark::Unseen => visit(cfg, t, marks, cycles),
                Mark::Done => {}
            }
        }
        marks[s] = Mark::Done;
    }

    let mut marks = vec![Mark::Unseen; cfg.structs.len()];
    let mut cycles = Vec::new();
    for s in 0..cfg.structs.len() {
        if marks[s] == Mark::Unseen {
            visit(cfg, s, &mut marks, &mut cycles);
        }
    }
    for (pos, msg) in cycles {
        cfg.diagnostics.error(CHANNEL, Some(pos), msg);
    }
}

fn resolve_uniques(cfg: &mut Config) {
    for s in 0..cfg.structs.len() {
        for u in 0..cfg.structs[s].uniques.len() {
            let (names, pos) = {
                let unique = &cfg.structs[s].uniques[u];
                (unique.field_names.clone(), unique.pos.clone())
            };
            let mut fields = Vec::new();
            let mut ok = true;
            for name in &names {
                match cfg.structs[s].find_field(name) {
                    Some(fi) => fields.push(FieldId {
                        strct: StructId(s),
                        index: fi,
                    }),
                    None => {
                        cfg.diagnostics.error(
                            CHANNEL,
                            Some(pos.clone()),
                            format!("unknown field '{}' in unique", name),
                        );
                        ok = false;
                    }
                }
            }
            if ok && names.len() < 2 {
                cfg.diagnostics.error(
                    CHANNEL,
                    Some(pos),
                    "unique constraints need at least two fields",
                );
            } else if ok {
                cfg.structs[s].uniques[u].fields = fields;
            }
        }
    }
}

/// Resolve a dotted path from `start`; every hop but the last must be a
/// linked struct-typed field.
fn resolve_chain(cfg: &Config, start: StructId, path: &str) -> Result<Vec<FieldId>, String> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut chain = Vec::with_capacity(parts.len());
    let mut cur = start;
    for (i, part) in parts.iter().enumerate() {
        let Some(fi) = cfg.strct(cur).find_field(part) else {
            return Err(format!(
                "unknown field '{}' in '{}'",
                part,
                cfg.strct(cur).name
            ));
        };
        let fid = FieldId {
            strct: cur,
            index: fi,
        };
        chain.push(fid);
        if i + 1 < parts.len() {
            let field = cfg.field(fid);
            if field.ftype != FieldType::Struct {
                return Err(format!("field '{}' is not a struct", part));
            }
            let Some(target) = field.reference.as_ref().and_then(|r| r.target) else {
                return Err(format!("field '{}' is unresolved", part));
            };
            cur = target.strct;
        }
    }
    Ok(chain)
}

/// Operator/type agreement for a comparison against `fid`.
fn check_operator(cfg: &Config, fid: FieldId, op: Operator) -> Option<String> {
    let field = cfg.field(fid);
    if field.ftype == FieldType::Struct {
        return Some(format!("cannot compare struct field '{}'", field.name));
    }
    if op.is_unary() {
        if !field.flags.null {
            return Some(format!(
                "operator '{}' requires a nullable field",
                op.tag()
            ));
        }
        return None;
    }
    match op {
        Operator::Like | Operator::Streq | Operator::Strneq => {
            if !field.ftype.is_text() {
                return Some(format!("operator '{}' requires a string field", op.tag()));
            }
        }
        Operator::Ge | Operator::Gt | Operator::Le | Operator::Lt | Operator::And
        | Operator::Or => {
            if !field.ftype.is_numeric() {
                return Some(format!(
                    "operator '{}' requires a numeric field",
                    op.tag()
                ));
            }
        }
        _ => {}
    }
    None
}

fn resolve_searches(cfg: &mut Config) {
    for s in 0..cfg.structs.len() {
        for q in 0..cfg.structs[s].searches.len() {
            for e in 0..cfg.structs[s].searches[q].entries.len() {
                let (path, op, pos) = {
                    let ent = &cfg.structs[s].searches[q].entries[e];
                    (ent.path.clone(), ent.op, ent.pos.clone())
                };
                match resolve_chain(cfg, StructId(s), &path) {
                    Ok(chain) => {
                        let Some(&last) = chain.last() else { continue };
                        if let Some(msg) = check_operator(cfg, last, op) {
                            cfg.diagnostics.error(CHANNEL, Some(pos), msg);
                        } else {
                            cfg.structs[s].searches[q].entries[e].chain = chain;
                        }
                    }
                    Err(msg) => cfg.diagnostics.error(CHANNEL, Some(pos), msg),
                }
            }
            for o in 0..cfg.structs[s].searches[q].order.len() {
                let (path, pos) = {
                    let ord = &cfg.structs[s].searches[q].order[o];
                    (ord.path.clone(), ord.pos.clone())
                };
                match resolve_chain(cfg, StructId(s), &path) {
                    Ok(chain) => cfg.structs[s].searches[q].order[o].chain = chain,
                    Err(msg) => cfg.diagnostics.error(CHANNEL, Some(pos), msg),
                }
            }
            let extra: Vec<(Option<String>, Pos)> = {
                let search = &cfg.structs[s].searches[q];
                vec![
                    (search.distinct.clone(), search.pos.clone()),
                    (search.group.clone(), search.pos.clone()),
                    (
                        search.aggregate.as_ref().map(|a| a.path.clone()),
                        search.pos.clone(),
                    ),
                ]
            };
            for (path, pos) in extra {
                if let Some(path) = path {
                    if let Err(msg) = resolve_chain(cfg, StructId(s), &path) {
                        cfg.diagnostics.error(CHANNEL, Some(pos), msg);
                    }
                }
            }
        }
    }
}

fn resolve_updates(cfg: &mut Config) {
    for s in 0..cfg.structs.len() {
        for kind in 0..2usize {
            let count = if kind == 0 {
                cfg.structs[s].updates.len()
            } else {
                cfg.structs[s].deletes.len()
            };
            for u in 0..count {
                let (mods, conds): (Vec<_>, Vec<_>) = {
                    let up = if kind == 0 {
                        &cfg.structs[s].updates[u]
                    } else {
                        &cfg.structs[s].deletes[u]
                    };
                    (
                        up.mods
                            .iter()
                            .map(|m| (m.field_name.clone(), m.modifier, m.pos.clone()))
                            .collect(),
                        up.conds
                            .iter()
                            .map(|c| (c.field_name.clone(), c.op, c.pos.clone()))
                            .collect(),
                    )
                };

                for (m, (name, modifier, pos)) in mods.into_iter().enumerate() {
                    let resolved = match cfg.structs[s].find_field(&name) {
                        Some(fi) => {
                            let fid = FieldId {
                                strct: StructId(s),
                                index: fi,
                            };
                            let field = cfg.field(fid);
                            if field.ftype == FieldType::Struct {
                                cfg.diagnostics.error(
                                    CHANNEL,
                                    Some(pos),
                                    format!("cannot modify struct field '{}'", name),
                                );
                                None
                            } else if field.flags.rowid {
                                cfg.diagnostics.error(
                                    CHANNEL,
                                    Some(pos),
                                    "cannot modify the rowid",
                                );
                                None
                            } else {
                                let bad = match modifier {
                                    Modifier::Strset | Modifier::Concat => {
                                        !field.ftype.is_text()
                                    }
                                    Modifier::Inc | Modifier::Dec => !field.ftype.is_numeric(),
                                    Modifier::Set => false,
                                };
                                if bad {
                                    cfg.diagnostics.error(
                                        CHANNEL,
                                        Some(pos),
                                        format!(
                                            "modifier '{}' does not fit field '{}'",
                                            modifier.tag(),
                                            name
                                        ),
                                    );
                                    None
                                } else {
                                    Some(fid)
                                }
                            }
                        }
                        None => {
                            cfg.diagnostics.error(
                                CHANNEL,
                                Some(pos),
                                format!("unknown field '{}'", name),
                            );
                            None
                        }
                    };
                    let up = if kind == 0 {
                        &mut cfg.structs[s].updates[u]
                    } else {
                        &mut cfg.structs[s].deletes[u]
                    };
                    up.mods[m].field = resolved;
                }

                for (c, (name, op, pos)) in conds.into_iter().enumerate() {
                    let resolved = match cfg.structs[s].find_field(&name) {
                        Some(fi) => {
                            let fid = FieldId {
                                strct: StructId(s),
                                index: fi,
                            };
                            match check_operator(cfg, fid, op) {
                                Some(msg) => {
                                    cfg.diagnostics.error(CHANNEL, Some(pos), msg);
                                    None
                                }
                                None => Some(fid),
                            }
                        }
                        None => {
                            cfg.diagnostics.error(
                                CHANNEL,
                                Some(pos),
                                format!("unknown field '{}'", name),
                            );
                            None
                        }
                    };
                    let up = if kind == 0 {
                        &mut cfg.structs[s].updates[u]
                    } else {
                        &mut cfg.structs[s].deletes[u]
                    };
                    up.conds[c].field = resolved;
                }
            }
        }
    }
}

/// Attach the struct-scoped `roles` statements to their targets.
fn resolve_rolemaps(cfg: &mut Config) {
    for s in 0..cfg.structs.len() {
        let decls = std::mem::take(&mut cfg.structs[s].rolemap_decls);
        for decl in decls {
            let mut members = Vec::new();
            for rr in &decl.roles {
                match cfg.find_role(&rr.name) {
                    Some(id) => members.push(RoleRef {
                        name: rr.name.clone(),
                        pos: rr.pos.clone(),
                        role: Some(id),
                    }),
                    None => cfg.diagnostics.error(
                        CHANNEL,
                        Some(rr.pos.clone()),
                        format!("unknown role '{}'", rr.name),
                    ),
                }
            }
            if members.is_empty() {
                continue;
            }

            for (target, tpos) in &decl.targets {
                match target {
                    RolemapTarget::All => {
                        let strct = &mut cfg.structs[s];
                        if let Some(ins) = strct.insert.as_mut() {
                            merge_rolemap(&mut ins.rolemap, &members);
                        }
                        for q in &mut strct.searches {
                            merge_rolemap(&mut q.rolemap, &members);
                        }
                        for u in &mut strct.updates {
                            merge_rolemap(&mut u.rolemap, &members);
                        }
                        for d in &mut strct.deletes {
                            merge_rolemap(&mut d.rolemap, &members);
                        }
                    }
                    RolemapTarget::Insert => match cfg.structs[s].insert.as_mut() {
                        Some(ins) => merge_rolemap(&mut ins.rolemap, &members),
                        None => cfg.diagnostics.error(
                            CHANNEL,
                            Some(tpos.clone()),
                            "structure has no insert",
                        ),
                    },
                    RolemapTarget::Search(kind, name) => {
                        let idx = cfg.structs[s]
                            .searches
                            .iter()
                            .position(|q| q.kind == *kind && q.name.as_deref() == Some(name));
                        match idx {
                            Some(i) => merge_rolemap(
                                &mut cfg.structs[s].searches[i].rolemap,
                                &members,
                            ),
                            None => cfg.diagnostics.error(
                                CHANNEL,
                                Some(tpos.clone()),
                                format!("unknown query '{}'", name),
                            ),
                        }
                    }
                    RolemapTarget::Update(name) => {
                        let idx = cfg.structs[s]
                            .updates
                            .iter()
                            .position(|u| u.name.as_deref() == Some(name));
                        match idx {
                            Some(i) => merge_rolemap(
                                &mut cfg.structs[s].updates[i].rolemap,
                                &members,
                            ),
                            None => cfg.diagnostics.error(
                                CHANNEL,
                                Some(tpos.clone()),
                                format!("unknown update '{}'", name),
                            ),
                        }
                    }
                    RolemapTarget::Delete(name) => {
                        let idx = cfg.structs[s]
                            .deletes
                            .iter()
                            .position(|u| u.name.as_deref() == Some(name));
                        match idx {
                            Some(i) => merge_rolemap(
                                &mut cfg.structs[s].deletes[i].rolemap,
                                &members,
                            ),
                            None => cfg.diagnostics.error(
                                CHANNEL,
                                Some(tpos.clone()),
                                format!("unknown delete '{}'", name),
                            ),
                        }
                    }
                    RolemapTarget::Noexport(field) => match field {
                        Some(name) => match cfg.structs[s].find_field(name) {
                            Some(fi) => merge_rolemap(
                                &mut cfg.structs[s].fields[fi].rolemap,
                                &members,
                            ),
                            None => cfg.diagnostics.error(
                                CHANNEL,
                                Some(tpos.clone()),
                                format!("unknown field '{}'", name),
                            ),
                        },
                        None => {
                            for f in &mut cfg.structs[s].fields {
                                merge_rolemap(&mut f.rolemap, &members);
                            }
                        }
                    },
                }
            }
        }
    }
}

fn merge_rolemap(slot: &mut Option<Rolemap>, members: &[RoleRef]) {
    let rm = slot.get_or_insert_with(Rolemap::default);
    for member in members {
        if !rm.roles.iter().any(|r| r.role == member.role) {
            rm.roles.push(member.clone());
        }
    }
}
