//! Structured form of an audit run, shared by both output modes.

use std::collections::HashSet;

use serde::Serialize;

use crate::audit::AuditEntry;
use crate::config::{Config, RoleId, SearchKind, UpdateKind};

/// Everything a role may see and invoke, in declaration order.
#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub role: String,
    pub doc: Option<String>,
    pub access: Vec<StructAccess>,
    pub functions: Vec<FunctionAccess>,
    pub fields: Vec<FieldAccess>,
}

#[derive(Debug, Serialize)]
pub struct StructAccess {
    pub name: String,
    /// Absent when the structure is not reachable for the role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reach: Option<ReachAccess>,
    pub insert: Option<String>,
    pub updates: Vec<String>,
    pub deletes: Vec<String>,
    pub iterates: Vec<String>,
    pub lists: Vec<String>,
    pub searches: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ReachAccess {
    pub exportable: bool,
    /// Every field name of the structure.
    pub data: Vec<String>,
    pub accessfrom: Vec<AccessPath>,
}

#[derive(Debug, Serialize)]
pub struct AccessPath {
    pub function: String,
    pub exporting: bool,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct FunctionAccess {
    pub symbol: String,
    pub doc: Option<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct FieldAccess {
    /// Dotted `structure.field` name.
    pub name: String,
    pub export: bool,
    pub doc: Option<String>,
}

impl AuditReport {
    /// Assemble the report for `role` from an audit queue.
    pub fn new(cfg: &Config, role: RoleId, queue: &[AuditEntry]) -> Self {
        let mut ins_visible: HashSet<usize> = HashSet::new();
        let mut search_visible: HashSet<(usize, usize)> = HashSet::new();
        let mut update_visible: HashSet<(usize, UpdateKind, usize)> = HashSet::new();
        for entry in queue {
            match entry {
                AuditEntry::Insert(sid) => {
                    ins_visible.insert(sid.0);
                }
                AuditEntry::Query(qid) => {
                    search_visible.insert((qid.strct.0, qid.index));
                }
                AuditEntry::Update(uid) => {
                    update_visible.insert((uid.strct.0, uid.kind, uid.index));
                }
                AuditEntry::Reachable(_) => {}
            }
        }

        let mut access = Vec::new();
        for (si, strct) in cfg.structs.iter().enumerate() {
            let reach = queue.iter().find_map(|entry| match entry {
                AuditEntry::Reachable(r) if r.strct.0 == si => Some(ReachAccess {
                    exportable: r.exported,
                    data: strct.fields.iter().map(|f| f.name.clone()).collect(),
                    accessfrom: r
                        .sources
                        .iter()
                        .map(|src| AccessPath {
                            function: cfg.search(src.search).symbol(cfg),
                            exporting: src.exported,
                            path: src.path.clone(),
                        })
                        .collect(),
                }),
                _ => None,
            });

            let symbols_of_kind = |kind: SearchKind| -> Vec<String> {
                strct
                    .searches
                    .iter()
                    .enumerate()
                    .filter(|(qi, q)| q.kind == kind && search_visible.contains(&(si, *qi)))
                    .map(|(_, q)| q.symbol(cfg))
                    .collect()
            };

            access.push(StructAccess {
                name: strct.name.clone(),
                reach,
                insert: if ins_visible.contains(&si) {
                    Some(format!("db_{}_insert", strct.name))
                } else {
                    None
                },
                updates: strct
                    .updates
                    .iter()
                    .enumerate()
                    .filter(|(ui, _)| update_visible.contains(&(si, UpdateKind::Modify, *ui)))
                    .map(|(_, u)| u.symbol(cfg))
                    .collect(),
                deletes: strct
                    .deletes
                    .iter()
                    .enumerate()
                    .filter(|(di, _)| update_visible.contains(&(si, UpdateKind::Delete, *di)))
                    .map(|(_, u)| u.symbol(cfg))
                    .collect(),
                iterates: symbols_of_kind(SearchKind::Iterate),
                lists: symbols_of_kind(SearchKind::List),
                searches: symbols_of_kind(SearchKind::Get),
            });
        }

        // Callable symbols: queries, then updates, deletes, and the insert,
        // per structure in declaration order.
        let mut functions = Vec::new();
        for (si, strct) in cfg.structs.iter().enumerate() {
            for (qi, q) in strct.searches.iter().enumerate() {
                if search_visible.contains(&(si, qi)) {
                    functions.push(FunctionAccess {
                        symbol: q.symbol(cfg),
                        doc: q.doc.clone(),
                        kind: q.kind.tag(),
                    });
                }
            }
            for (ui, u) in strct.updates.iter().enumerate() {
                if update_visible.contains(&(si, UpdateKind::Modify, ui)) {
                    functions.push(FunctionAccess {
                        symbol: u.symbol(cfg),
                        doc: u.doc.clone(),
                        kind: u.kind.tag(),
                    });
                }
            }
            for (di, u) in strct.deletes.iter().enumerate() {
                if update_visible.contains(&(si, UpdateKind::Delete, di)) {
                    functions.push(FunctionAccess {
                        symbol: u.symbol(cfg),
                        doc: u.doc.clone(),
                        kind: u.kind.tag(),
                    });
                }
            }
            if ins_visible.contains(&si) {
                functions.push(FunctionAccess {
                    symbol: format!("db_{}_insert", strct.name),
                    doc: None,
                    kind: "insert",
                });
            }
        }

        // Export visibility of every field, reachable or not.
        let mut fields = Vec::new();
        for strct in &cfg.structs {
            for field in &strct.fields {
                fields.push(FieldAccess {
                    name: format!("{}.{}", strct.name, field.name),
                    export: cfg.field_exported(field, role),
                    doc: field.doc.clone(),
                });
            }
        }

        AuditReport {
            role: cfg.role(role).name.clone(),
            doc: cfg.role(role).doc.clone(),
            access,
            functions,
            fields,
        }
    }
}
