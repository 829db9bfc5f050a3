//! The in-memory schema representation.
//!
//! A [`Config`] owns every structure, enumeration, bitfield, and role parsed
//! from a set of configuration files. Cross-entity edges (foreign references,
//! enum/bitfield references, rolemap members, unique and sentence field
//! references) are index handles into the owning arena, so they stay valid
//! for exactly as long as the `Config` does. Declaration order is preserved
//! everywhere; every emitter iterates in that order.

use crate::diag::{Diagnostics, Pos};

/// Handle to a structure in [`Config::structs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub usize);

/// Handle to a field within a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    pub strct: StructId,
    pub index: usize,
}

/// Handle to a query within a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchId {
    pub strct: StructId,
    pub index: usize,
}

/// Handle to an update or delete within a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateId {
    pub strct: StructId,
    pub kind: UpdateKind,
    pub index: usize,
}

/// Handle to an enumeration in [`Config::enums`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub usize);

/// Handle to a bitfield in [`Config::bitfields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitfId(pub usize);

/// Handle to a role in [`Config::roles`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleId(pub usize);

/// Scalar type of a field.
///
/// `Enum` and `Bits` carry the referenced definition's name; the resolved
/// handle lives on the field itself so two configs can be compared by name.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Bit,
    Date,
    Epoch,
    Int,
    Real,
    Blob,
    Text,
    Password,
    Email,
    Struct,
    Enum(String),
    Bits(String),
}

impl FieldType {
    /// True for types stored in an INTEGER column.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Bit
                | FieldType::Date
                | FieldType::Epoch
                | FieldType::Int
                | FieldType::Enum(_)
                | FieldType::Bits(_)
        )
    }

    /// True for types compared with numeric operators.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, FieldType::Real)
    }

    /// True for types compared with string operators.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            FieldType::Text | FieldType::Password | FieldType::Email
        )
    }

    /// Same scalar kind, ignoring which enum/bitfield is referenced.
    pub fn same_kind(&self, other: &FieldType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Boolean qualifiers on a field.
///
/// A default value is tracked on [`Field::default`] rather than as a flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldFlags {
    pub rowid: bool,
    pub unique: bool,
    pub null: bool,
    pub noexport: bool,
}

/// Referential action on update/delete of the referenced row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateAction {
    #[default]
    None,
    Restrict,
    Nullify,
    Cascade,
    Default,
}

impl UpdateAction {
    /// SQL clause text, or `None` when no action was requested.
    pub fn sql(self) -> Option<&'static str> {
        match self {
            UpdateAction::None => None,
            UpdateAction::Restrict => Some("RESTRICT"),
            UpdateAction::Nullify => Some("SET NULL"),
            UpdateAction::Cascade => Some("CASCADE"),
            UpdateAction::Default => Some("SET DEFAULT"),
        }
    }
}

/// Literal default for a column.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Real(f64),
    String(String),
    /// Named item of the field's enumeration; resolved to its value at link.
    EnumItem(String),
}

/// Foreign reference from a source field to the rowid of another structure.
///
/// Parsed by name; the linker fills in the handles.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignRef {
    /// Local field holding the value (the field itself for remote
    /// references, the named sibling for struct-typed fields).
    pub source_name: String,
    pub target_struct: String,
    pub target_field: String,
    pub source: Option<FieldId>,
    pub target: Option<FieldId>,
}

/// Validation limit on a field, consumed by the validator emitter.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLimit {
    pub op: Operator,
    pub value: String,
}

/// A column (or struct-typed view) of a structure.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub doc: Option<String>,
    pub pos: Pos,
    pub ftype: FieldType,
    pub flags: FieldFlags,
    pub reference: Option<ForeignRef>,
    /// Resolved enumeration for `FieldType::Enum` fields.
    pub enum_ref: Option<EnumId>,
    /// Resolved bitfield for `FieldType::Bits` fields.
    pub bitf_ref: Option<BitfId>,
    pub default: Option<DefaultValue>,
    pub actdel: UpdateAction,
    pub actup: UpdateAction,
    pub limits: Vec<FieldLimit>,
    /// Deny-list: roles covered here do NOT see this field exported.
    pub rolemap: Option<Rolemap>,
}

/// Set of roles attached to an operation (grant) or a field (deny).
#[derive(Debug, Clone, Default)]
pub struct Rolemap {
    pub roles: Vec<RoleRef>,
}

#[derive(Debug, Clone)]
pub struct RoleRef {
    pub name: String,
    pub pos: Pos,
    pub role: Option<RoleId>,
}

/// Kind of query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchKind {
    Count,
    Get,
    List,
    Iterate,
}

impl SearchKind {
    /// User-visible kind tag, also the symbol fragment.
    pub fn tag(self) -> &'static str {
        match self {
            SearchKind::Count => "count",
            SearchKind::Get => "get",
            SearchKind::List => "list",
            SearchKind::Iterate => "iterate",
        }
    }
}

/// Comparison operator in a query sentence or update constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
    Neq,
    Like,
    And,
    Or,
    Streq,
    Strneq,
    Isnull,
    Notnull,
}

impl Operator {
    pub fn tag(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ge => "ge",
            Operator::Gt => "gt",
            Operator::Le => "le",
            Operator::Lt => "lt",
            Operator::Neq => "neq",
            Operator::Like => "like",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Streq => "streq",
            Operator::Strneq => "strneq",
            Operator::Isnull => "isnull",
            Operator::Notnull => "notnull",
        }
    }

    /// Unary operators take no bound value.
    pub fn is_unary(self) -> bool {
        matches!(self, Operator::Isnull | Operator::Notnull)
    }

    /// SQL spelling for a WHERE clause.
    pub fn sql(self) -> &'static str {
        match self {
            Operator::Eq | Operator::Streq => "=",
            Operator::Ge => ">=",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Lt => "<",
            Operator::Neq | Operator::Strneq => "!=",
            Operator::Like => "LIKE",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Isnull => "ISNULL",
            Operator::Notnull => "NOTNULL",
        }
    }
}

/// One `path op` term of a query sentence.
#[derive(Debug, Clone)]
pub struct SearchEntry {
    /// Dotted column path as written.
    pub path: String,
    /// Path with dots folded to underscores, used in symbol names.
    pub uname: String,
    pub op: Operator,
    pub pos: Pos,
    /// Resolved field chain; every hop but the last is struct-typed.
    pub chain: Vec<FieldId>,
}

/// Ordering term of a query.
#[derive(Debug, Clone)]
pub struct OrderRef {
    pub path: String,
    pub descending: bool,
    pub pos: Pos,
    pub chain: Vec<FieldId>,
}

/// Row-collapse aggregate on a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Minrow,
    Maxrow,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub kind: AggregateKind,
    pub path: String,
    pub pos: Pos,
}

/// A named or anonymous query on a structure.
#[derive(Debug, Clone)]
pub struct Search {
    pub parent: StructId,
    pub kind: SearchKind,
    pub name: Option<String>,
    pub doc: Option<String>,
    pub pos: Pos,
    pub entries: Vec<SearchEntry>,
    pub order: Vec<OrderRef>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: Option<String>,
    pub group: Option<String>,
    pub aggregate: Option<Aggregate>,
    pub rolemap: Option<Rolemap>,
}

impl Search {
    /// Deterministic symbol: `db_<struct>_<kind>` then `_<name>`, or
    /// `_by_<col>_<op>` per sentence term when anonymous.
    pub fn symbol(&self, cfg: &Config) -> String {
        let mut sym = format!("db_{}_{}", cfg.strct(self.parent).name, self.kind.tag());
        if let Some(name) = &self.name {
            sym.push('_');
            sym.push_str(name);
        } else if !self.entries.is_empty() {
            sym.push_str("_by");
            for ent in &self.entries {
                sym.push('_');
                sym.push_str(&ent.uname);
                sym.push('_');
                sym.push_str(ent.op.tag());
            }
        }
        sym
    }
}

/// Update kind: column modification or row deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Modify,
    Delete,
}

impl UpdateKind {
    pub fn tag(self) -> &'static str {
        match self {
            UpdateKind::Modify => "update",
            UpdateKind::Delete => "delete",
        }
    }
}

/// How a modified column combines with the bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Concat,
    Dec,
    Inc,
    Set,
    Strset,
}

impl Modifier {
    pub fn tag(self) -> &'static str {
        match self {
            Modifier::Concat => "cat",
            Modifier::Dec => "dec",
            Modifier::Inc => "inc",
            Modifier::Set => "set",
            Modifier::Strset => "strset",
        }
    }
}

/// Modified column of an update.
#[derive(Debug, Clone)]
pub struct ModRef {
    pub field_name: String,
    pub modifier: Modifier,
    pub pos: Pos,
    pub field: Option<FieldId>,
}

/// Constraint column of an update or delete.
#[derive(Debug, Clone)]
pub struct CondRef {
    pub field_name: String,
    pub op: Operator,
    pub pos: Pos,
    pub field: Option<FieldId>,
}

/// An update or delete operation on a structure.
#[derive(Debug, Clone)]
pub struct Update {
    pub parent: StructId,
    pub kind: UpdateKind,
    pub name: Option<String>,
    pub doc: Option<String>,
    pub pos: Pos,
    pub mods: Vec<ModRef>,
    pub conds: Vec<CondRef>,
    /// Modify every settable column; `mods` stays empty.
    pub update_all: bool,
    pub rolemap: Option<Rolemap>,
}

impl Update {
    /// Deterministic symbol per the audit naming rules.
    pub fn symbol(&self, cfg: &Config) -> String {
        let mut sym = format!("db_{}_{}", cfg.strct(self.parent).name, self.kind.tag());
        if let Some(name) = &self.name {
            sym.push('_');
            sym.push_str(name);
            return sym;
        }
        if self.kind == UpdateKind::Modify && !self.update_all {
            for m in &self.mods {
                sym.push('_');
                sym.push_str(&m.field_name);
                sym.push('_');
                sym.push_str(m.modifier.tag());
            }
        }
        if !self.conds.is_empty() {
            sym.push_str("_by");
            for c in &self.conds {
                sym.push('_');
                sym.push_str(&c.field_name);
                sym.push('_');
                sym.push_str(c.op.tag());
            }
        }
        sym
    }
}

/// Insert operation. At most one per structure.
#[derive(Debug, Clone)]
pub struct Insert {
    pub pos: Pos,
    pub rolemap: Option<Rolemap>,
}

/// Multi-column uniqueness constraint.
#[derive(Debug, Clone)]
pub struct Unique {
    pub pos: Pos,
    pub field_names: Vec<String>,
    pub fields: Vec<FieldId>,
}

impl Unique {
    /// Canonical key: the sorted tuple of covered field names.
    pub fn canonical_name(&self) -> String {
        let mut names: Vec<&str> = self.field_names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.join(",")
    }
}

/// Target named by a struct-scoped `roles` statement; resolved at link.
#[derive(Debug, Clone)]
pub enum RolemapTarget {
    All,
    Insert,
    Search(SearchKind, String),
    Update(String),
    Delete(String),
    /// Deny export of the named field, or of every field when `None`.
    Noexport(Option<String>),
}

/// Unresolved struct-scoped `roles ... { ... }` statement.
#[derive(Debug, Clone)]
pub struct RolemapDecl {
    pub pos: Pos,
    pub roles: Vec<RoleRef>,
    pub targets: Vec<(RolemapTarget, Pos)>,
}

/// A structure: one relational table plus its operations.
#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub doc: Option<String>,
    pub pos: Pos,
    pub fields: Vec<Field>,
    pub searches: Vec<Search>,
    pub updates: Vec<Update>,
    pub deletes: Vec<Update>,
    pub uniques: Vec<Unique>,
    pub insert: Option<Insert>,
    pub rolemap_decls: Vec<RolemapDecl>,
}

impl StructDef {
    pub fn new(name: impl Into<String>, pos: Pos) -> Self {
        Self {
            name: name.into(),
            doc: None,
            pos,
            fields: Vec::new(),
            searches: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            uniques: Vec::new(),
            insert: None,
            rolemap_decls: Vec::new(),
        }
    }

    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// One value of an enumeration.
#[derive(Debug, Clone)]
pub struct EnumItem {
    pub name: String,
    pub value: i64,
    pub doc: Option<String>,
    pub label: Option<String>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub doc: Option<String>,
    pub pos: Pos,
    pub items: Vec<EnumItem>,
}

impl EnumDef {
    pub fn find_item(&self, name: &str) -> Option<&EnumItem> {
        self.items.iter().find(|i| i.name == name)
    }
}

/// One bit position of a bitfield.
#[derive(Debug, Clone)]
pub struct BitIndex {
    pub name: String,
    pub value: i64,
    pub doc: Option<String>,
    pub label: Option<String>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct Bitfield {
    pub name: String,
    pub doc: Option<String>,
    pub pos: Pos,
    pub items: Vec<BitIndex>,
}

/// A role in the hierarchical access model.
///
/// The tree is rooted at the synthetic `all` role; `default` and `none`
/// always exist as its children once roles are enabled.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub doc: Option<String>,
    pub pos: Pos,
    pub parent: Option<RoleId>,
    pub children: Vec<RoleId>,
}

/// The whole parsed configuration: the arena every handle points into.
#[derive(Debug, Default)]
pub struct Config {
    pub structs: Vec<StructDef>,
    pub enums: Vec<EnumDef>,
    pub bitfields: Vec<Bitfield>,
    pub roles: Vec<Role>,
    /// Translation languages; index 0 is the unnamed default.
    pub langs: Vec<String>,
    pub diagnostics: Diagnostics,
}

impl Config {
    pub fn new() -> Self {
        Self {
            langs: vec![String::new()],
            ..Self::default()
        }
    }

    pub fn strct(&self, id: StructId) -> &StructDef {
        &self.structs[id.0]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.structs[id.strct.0].fields[id.index]
    }

    pub fn search(&self, id: SearchId) -> &Search {
        &self.structs[id.strct.0].searches[id.index]
    }

    pub fn update(&self, id: UpdateId) -> &Update {
        let s = &self.structs[id.strct.0];
        match id.kind {
            UpdateKind::Modify => &s.updates[id.index],
            UpdateKind::Delete => &s.deletes[id.index],
        }
    }

    pub fn enm(&self, id: EnumId) -> &EnumDef {
        &self.enums[id.0]
    }

    pub fn bitf(&self, id: BitfId) -> &Bitfield {
        &self.bitfields[id.0]
    }

    pub fn role(&self, id: RoleId) -> &Role {
        &self.roles[id.0]
    }

    pub fn find_struct(&self, name: &str) -> Option<StructId> {
        self.structs
            .iter()
            .position(|s| s.name == name)
            .map(StructId)
    }

    pub fn find_enum(&self, name: &str) -> Option<EnumId> {
        self.enums.iter().position(|e| e.name == name).map(EnumId)
    }

    pub fn find_bitfield(&self, name: &str) -> Option<BitfId> {
        self.bitfields
            .iter()
            .position(|b| b.name == name)
            .map(BitfId)
    }

    /// Case-insensitive lookup over all declared roles.
    pub fn find_role(&self, name: &str) -> Option<RoleId> {
        self.roles
            .iter()
            .position(|r| r.name.eq_ignore_ascii_case(name))
            .map(RoleId)
    }

    /// Roles are enabled once a top-level `roles` block has been parsed.
    pub fn roles_enabled(&self) -> bool {
        !self.roles.is_empty()
    }

    /// True iff `ancestor` is `role` or an ancestor of it in the role tree.
    pub fn inherits(&self, role: RoleId, ancestor: RoleId) -> bool {
        let mut cur = Some(role);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.roles[id.0].parent;
        }
        false
    }

    /// A rolemap covers `role` iff any member is the role or one of its
    /// ancestors.
    pub fn rolemap_covers(&self, rm: &Rolemap, role: RoleId) -> bool {
        rm.roles
            .iter()
            .filter_map(|rr| rr.role)
            .any(|member| self.inherits(role, member))
    }

    /// Whether `field` is exported to `role`: passwords, `noexport` fields,
    /// and fields whose rolemap covers the role are withheld.
    pub fn field_exported(&self, field: &Field, role: RoleId) -> bool {
        if field.ftype == FieldType::Password || field.flags.noexport {
            return false;
        }
        match &field.rolemap {
            Some(rm) => !self.rolemap_covers(rm, role),
            None => true,
        }
    }

    /// Register a translation language, returning its index.
    pub fn intern_lang(&mut self, lang: &str) -> usize {
        if let Some(i) = self.langs.iter().position(|l| l == lang) {
            return i;
        }
        self.langs.push(lang.to_string());
        self.langs.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role_config() -> Config {
        // all -> { default, none, admin -> auditor }
        let mut cfg = Config::new();
        for (i, (name, parent)) in [
            ("all", None),
            ("default", Some(0)),
            ("none", Some(0)),
            ("admin", Some(0)),
            ("auditor", Some(3)),
        ]
        .into_iter()
        .enumerate()
        {
            cfg.roles.push(Role {
                name: name.into(),
                doc: None,
                pos: Pos::default(),
                parent: parent.map(RoleId),
                children: Vec::new(),
            });
            if let Some(p) = parent {
                let child = RoleId(i);
                cfg.roles[p].children.push(child);
            }
        }
        cfg
    }

    #[test]
    fn test_inherits_walks_ancestors() {
        let cfg = role_config();
        let all = cfg.find_role("all").unwrap();
        let admin = cfg.find_role("admin").unwrap();
        let auditor = cfg.find_role("auditor").unwrap();

        assert!(cfg.inherits(auditor, auditor));
        assert!(cfg.inherits(auditor, admin));
        assert!(cfg.inherits(auditor, all));
        assert!(!cfg.inherits(admin, auditor));
    }

    #[test]
    fn test_find_role_is_case_insensitive() {
        let cfg = role_config();
        assert_eq!(cfg.find_role("ADMIN"), cfg.find_role("admin"));
        assert!(cfg.find_role("nobody").is_none());
    }

    #[test]
    fn test_rolemap_covers_by_ancestor() {
        let cfg = role_config();
        let admin = cfg.find_role("admin").unwrap();
        let auditor = cfg.find_role("auditor").unwrap();
        let default = cfg.find_role("default").unwrap();

        let rm = Rolemap {
            roles: vec![RoleRef {
                name: "admin".into(),
                pos: Pos::default(),
                role: Some(admin),
            }],
        };
        assert!(cfg.rolemap_covers(&rm, admin));
        assert!(cfg.rolemap_covers(&rm, auditor));
        assert!(!cfg.rolemap_covers(&rm, default));
    }

    #[test]
    fn test_unique_canonical_name_sorts() {
        let u = Unique {
            pos: Pos::default(),
            field_names: vec!["b".into(), "a".into()],
            fields: Vec::new(),
        };
        assert_eq!(u.canonical_name(), "a,b");
    }

    #[test]
    fn test_field_type_kind_comparison() {
        assert!(FieldType::Enum("a".into()).same_kind(&FieldType::Enum("b".into())));
        assert!(!FieldType::Enum("a".into()).same_kind(&FieldType::Int));
        assert!(FieldType::Epoch.is_integer());
        assert!(FieldType::Real.is_numeric());
        assert!(!FieldType::Real.is_integer());
        assert!(FieldType::Email.is_text());
    }
}
