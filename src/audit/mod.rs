//! Role-scoped auditing: which operations a role may invoke and which
//! structures it can observe through them.

mod json;
mod report;

pub use json::{write_script, write_json};
pub use report::{AccessPath, AuditReport, FieldAccess, FunctionAccess, ReachAccess, StructAccess};

use std::collections::HashMap;

use crate::config::{Config, FieldType, RoleId, Rolemap, SearchId, StructId, UpdateId, UpdateKind};

/// One entry of the ordered audit queue.
#[derive(Debug, Clone)]
pub enum AuditEntry {
    /// The role may insert into this structure.
    Insert(StructId),
    /// The role may run this update or delete.
    Update(UpdateId),
    /// The role may run this query.
    Query(SearchId),
    /// The structure is reachable, directly or through struct-typed
    /// dereferences, from the role's visible queries.
    Reachable(Reach),
}

#[derive(Debug, Clone)]
pub struct Reach {
    pub strct: StructId,
    /// True iff the structure is reached directly by a visible operation,
    /// or at least one reaching path exports.
    pub exported: bool,
    /// Reaching queries in discovery order. Empty when the structure is
    /// reachable only through its own insert/update/delete.
    pub sources: Vec<ReachSource>,
}

#[derive(Debug, Clone)]
pub struct ReachSource {
    pub search: SearchId,
    /// Dotted field path from the query's structure; empty at the origin.
    pub path: String,
    /// False once the path crosses a field the role cannot export.
    pub exported: bool,
}

/// Compute the audit queue for `role`.
///
/// Operation entries come first, in declaration order of structures and then
/// of their operations; reachability entries follow, one per reachable
/// structure in declaration order. A structure is reachable when any of its
/// operations is visible, or when a visible query dereferences struct-typed
/// fields that lead to it; reaching paths are kept in discovery order
/// (visible queries first, then depth-first over field declarations).
pub fn audit(cfg: &Config, role: RoleId) -> Vec<AuditEntry> {
    let covered = |rm: &Option<Rolemap>| -> bool {
        match rm {
            Some(rm) => cfg.rolemap_covers(rm, role),
            None => false,
        }
    };

    let mut queue = Vec::new();
    let mut visible = Vec::new();

    for (si, strct) in cfg.structs.iter().enumerate() {
        let sid = StructId(si);
        if let Some(ins) = &strct.insert {
            if covered(&ins.rolemap) {
                queue.push(AuditEntry::Insert(sid));
            }
        }
        for (qi, search) in strct.searches.iter().enumerate() {
            if covered(&search.rolemap) {
                let id = SearchId {
                    strct: sid,
                    index: qi,
                };
                queue.push(AuditEntry::Query(id));
                visible.push(id);
            }
        }
        for (ui, update) in strct.updates.iter().enumerate() {
            if covered(&update.rolemap) {
                queue.push(AuditEntry::Update(UpdateId {
                    strct: sid,
                    kind: UpdateKind::Modify,
                    index: ui,
                }));
            }
        }
        for (di, delete) in strct.deletes.iter().enumerate() {
            if covered(&delete.rolemap) {
                queue.push(AuditEntry::Update(UpdateId {
                    strct: sid,
                    kind: UpdateKind::Delete,
                    index: di,
                }));
            }
        }
    }

    // Reachability: any visible operation reaches its own structure
    // directly; visible queries additionally reach every structure their
    // struct-typed dereferences lead to.
    let mut reaches: Vec<Reach> = Vec::new();
    let mut slot: HashMap<usize, usize> = HashMap::new();

    for entry in &queue {
        let sid = match entry {
            AuditEntry::Insert(sid) => *sid,
            AuditEntry::Update(uid) => uid.strct,
            AuditEntry::Query(_) | AuditEntry::Reachable(_) => continue,
        };
        let i = *slot.entry(sid.0).or_insert_with(|| {
            reaches.push(Reach {
                strct: sid,
                exported: false,
                sources: Vec::new(),
            });
            reaches.len() - 1
        });
        // Direct access traverses no fields, so it always exports.
        reaches[i].exported = true;
    }

    let record = |reaches: &mut Vec<Reach>,
                      slot: &mut HashMap<usize, usize>,
                      strct: StructId,
                      search: SearchId,
                      path: String,
                      exported: bool| {
        let i = *slot.entry(strct.0).or_insert_with(|| {
            reaches.push(Reach {
                strct,
                exported: false,
                sources: Vec::new(),
            });
            reaches.len() - 1
        });
        reaches[i].exported |= exported;
        reaches[i].sources.push(ReachSource {
            search,
            path,
            exported,
        });
    };

    for &qid in &visible {
        let origin = qid.strct;
        record(&mut reaches, &mut slot, origin, qid, String::new(), true);
        let mut on_path = vec![origin.0];
        descend(
            cfg,
            role,
            origin,
            qid,
            "",
            true,
            &mut on_path,
            &mut |strct, search, path, exported| {
                record(&mut reaches, &mut slot, strct, search, path, exported)
            },
        );
    }

    // Emit reach entries in structure declaration order.
    for si in 0..cfg.structs.len() {
        if let Some(&i) = slot.get(&si) {
            queue.push(AuditEntry::Reachable(reaches[i].clone()));
        }
    }

    log::debug!(
        "audit for '{}': {} queue entries",
        cfg.role(role).name,
        queue.len()
    );
    queue
}

/// Depth-first walk over struct-typed fields, in declaration order. A
/// structure already on the current path terminates the branch.
#[allow(clippy::too_many_arguments)]
fn descend(
    cfg: &Config,
    role: RoleId,
    sid: StructId,
    origin: SearchId,
    prefix: &str,
    exporting: bool,
    on_path: &mut Vec<usize>,
    record: &mut dyn FnMut(StructId, SearchId, String, bool),
) {
    for field in &cfg.strct(sid).fields {
        if field.ftype != FieldType::Struct {
            continue;
        }
        let Some(target) = field.reference.as_ref().and_then(|r| r.target) else {
            continue;
        };
        let tsid = target.strct;
        if on_path.contains(&tsid.0) {
            continue;
        }
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix, field.name)
        };
        let exported = exporting && cfg.field_exported(field, role);
        record(tsid, origin, path.clone(), exported);
        on_path.push(tsid.0);
        descend(cfg, role, tsid, origin, &path, exported, on_path, record);
        on_path.pop();
    }
}
