//! Front end: turning configuration text into the schema representation.
//!
//! [`parse_config`] may be called once per input file, accumulating into one
//! [`Config`]; [`parse_link`] then resolves every cross-entity reference and
//! enforces the structural invariants. Emitters must only ever see a linked
//! configuration.

mod lexer;
mod link;

pub use link::parse_link;

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::config::{
    Aggregate, AggregateKind, BitIndex, Bitfield, CondRef, Config, DefaultValue, EnumDef,
    EnumItem, Field, FieldFlags, FieldLimit, FieldType, ForeignRef, Insert, ModRef, Modifier,
    Operator, OrderRef, Role, RoleId, RoleRef, RolemapDecl, RolemapTarget, Search, SearchEntry,
    SearchKind, StructDef, StructId, Unique, Update, UpdateAction, UpdateKind,
};
use crate::diag::Pos;
use crate::Error;

use lexer::{tokenize, Lexeme, Token};

static OPERATORS: Lazy<HashMap<&'static str, Operator>> = Lazy::new(|| {
    HashMap::from([
        ("eq", Operator::Eq),
        ("ge", Operator::Ge),
        ("gt", Operator::Gt),
        ("le", Operator::Le),
        ("lt", Operator::Lt),
        ("neq", Operator::Neq),
        ("like", Operator::Like),
        ("and", Operator::And),
        ("or", Operator::Or),
        ("streq", Operator::Streq),
        ("strneq", Operator::Strneq),
        ("isnull", Operator::Isnull),
        ("notnull", Operator::Notnull),
    ])
});

static MODIFIERS: Lazy<HashMap<&'static str, Modifier>> = Lazy::new(|| {
    HashMap::from([
        ("concat", Modifier::Concat),
        ("dec", Modifier::Dec),
        ("inc", Modifier::Inc),
        ("set", Modifier::Set),
        ("strset", Modifier::Strset),
    ])
});

/// Names reserved for the synthetic role tree.
const RESERVED_ROLES: [&str; 3] = ["all", "default", "none"];

/// Parse one configuration source into `cfg`.
///
/// Stops at the first syntax error, which is queued on the config's
/// diagnostics. Multiple files may be parsed into the same config before
/// linking.
pub fn parse_config(cfg: &mut Config, input: &str, fname: &str) -> Result<(), Error> {
    log::debug!("parsing {}", fname);
    let toks = match tokenize(input, fname) {
        Ok(toks) => toks,
        Err((pos, msg)) => {
            cfg.diagnostics.error("parse", Some(pos), msg);
            return Err(Error::Parse(1));
        }
    };
    let mut parser = Parser {
        cfg,
        toks,
        i: 0,
        fname: fname.to_string(),
    };
    parser.top_level().map_err(|_| Error::Parse(1))
}

/// Marker: a syntax error was queued and parsing stopped.
struct Abort;

type PResult<T> = Result<T, Abort>;

struct Parser<'a> {
    cfg: &'a mut Config,
    toks: Vec<Lexeme>,
    i: usize,
    fname: String,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.i).map(|l| &l.tok)
    }

    fn pos(&self) -> Pos {
        match self.toks.get(self.i) {
            Some(l) => l.pos.clone(),
            None => Pos::new(&self.fname, 0, 0),
        }
    }

    fn advance(&mut self) -> Option<Lexeme> {
        let lex = self.toks.get(self.i).cloned();
        if lex.is_some() {
            self.i += 1;
        }
        lex
    }

    fn fail<T>(&mut self, pos: Pos, msg: impl Into<String>) -> PResult<T> {
        self.cfg.diagnostics.error("parse", Some(pos), msg);
        Err(Abort)
    }

    fn fail_here<T>(&mut self, msg: impl Into<String>) -> PResult<T> {
        let pos = self.pos();
        self.fail(pos, msg)
    }

    fn accept(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token, what: &str) -> PResult<Pos> {
        match self.advance() {
            Some(lex) if lex.tok == tok => Ok(lex.pos),
            Some(lex) => {
                let msg = format!("expected {}, found {}", what, lex.tok.describe());
                self.fail(lex.pos, msg)
            }
            None => self.fail_here(format!("expected {}, found end of input", what)),
        }
    }

    fn ident(&mut self, what: &str) -> PResult<(String, Pos)> {
        match self.advance() {
            Some(Lexeme {
                tok: Token::Ident(s),
                pos,
            }) => Ok((s, pos)),
            Some(lex) => {
                let msg = format!("expected {}, found {}", what, lex.tok.describe());
                self.fail(lex.pos, msg)
            }
            None => self.fail_here(format!("expected {}, found end of input", what)),
        }
    }

    fn string(&mut self, what: &str) -> PResult<(String, Pos)> {
        match self.advance() {
            Some(Lexeme {
                tok: Token::Str(s),
                pos,
            }) => Ok((s, pos)),
            Some(lex) => {
                let msg = format!("expected {}, found {}", what, lex.tok.describe());
                self.fail(lex.pos, msg)
            }
            None => self.fail_here(format!("expected {}, found end of input", what)),
        }
    }

    /// `ident ('.' ident)*` joined back into a dotted path.
    fn path(&mut self) -> PResult<(String, Pos)> {
        let (mut path, pos) = self.ident("field path")?;
        while self.accept(&Token::Dot) {
            let (part, _) = self.ident("path component")?;
            path.push('.');
            path.push_str(&part);
        }
        Ok((path, pos))
    }

    /// Consume an operator keyword if one is next; `eq` otherwise.
    fn optional_operator(&mut self) -> Operator {
        if let Some(Token::Ident(s)) = self.peek() {
            if let Some(&op) = OPERATORS.get(s.as_str()) {
                self.i += 1;
                return op;
            }
        }
        Operator::Eq
    }

    fn top_level(&mut self) -> PResult<()> {
        while self.peek().is_some() {
            let (kw, pos) = self.ident("top-level keyword")?;
            match kw.as_str() {
                "struct" => self.parse_struct()?,
                "enum" => self.parse_enum()?,
                "bits" => self.parse_bits()?,
                "roles" => self.parse_roles_block(pos)?,
                _ => {
                    return self.fail(
                        pos,
                        format!("unknown top-level keyword '{}'", kw),
                    )
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structures
    // ------------------------------------------------------------------

    fn parse_struct(&mut self) -> PResult<()> {
        let (name, pos) = self.ident("structure name")?;
        let id = StructId(self.cfg.structs.len());
        let mut strct = StructDef::new(name, pos);

        self.expect(Token::LBrace, "'{'")?;
        loop {
            if self.accept(&Token::RBrace) {
                break;
            }
            let (kw, kwpos) = self.ident("structure statement")?;
            match kw.as_str() {
                "field" => {
                    let field = self.parse_field()?;
                    strct.fields.push(field);
                }
                "comment" => {
                    let (doc, _) = self.string("comment text")?;
                    self.expect(Token::Semi, "';'")?;
                    strct.doc = Some(doc);
                }
                "search" => self.parse_search(id, &mut strct, SearchKind::Get, kwpos)?,
                "list" => self.parse_search(id, &mut strct, SearchKind::List, kwpos)?,
                "iterate" => self.parse_search(id, &mut strct, SearchKind::Iterate, kwpos)?,
                "count" => self.parse_search(id, &mut strct, SearchKind::Count, kwpos)?,
                "insert" => {
                    self.expect(Token::Semi, "';'")?;
                    if strct.insert.is_some() {
                        return self.fail(kwpos, "duplicate insert");
                    }
                    strct.insert = Some(Insert {
                        pos: kwpos,
                        rolemap: None,
                    });
                }
                "update" => self.parse_update(id, &mut strct, UpdateKind::Modify, kwpos)?,
                "delete" => self.parse_update(id, &mut strct, UpdateKind::Delete, kwpos)?,
                "unique" => self.parse_unique(&mut strct, kwpos)?,
                "roles" => self.parse_struct_roles(&mut strct, kwpos)?,
                _ => {
                    return self.fail(
                        kwpos,
                        format!("unknown structure statement '{}'", kw),
                    )
                }
            }
        }
        self.expect(Token::Semi, "';'")?;
        self.cfg.structs.push(strct);
        Ok(())
    }

    fn parse_field(&mut self) -> PResult<Field> {
        let (name, pos) = self.ident("field name")?;

        let mut field = Field {
            name: name.clone(),
            doc: None,
            pos,
            ftype: FieldType::Int,
            flags: FieldFlags::default(),
            reference: None,
            enum_ref: None,
            bitf_ref: None,
            default: None,
            actdel: UpdateAction::None,
            actup: UpdateAction::None,
            limits: Vec::new(),
            rolemap: None,
        };

        // Remote reference: field name:strct.field ...
        if self.accept(&Token::Colon) {
            let (tstrct, _) = self.ident("referenced structure")?;
            self.expect(Token::Dot, "'.'")?;
            let (tfield, _) = self.ident("referenced field")?;
            field.reference = Some(ForeignRef {
                source_name: name,
                target_struct: tstrct,
                target_field: tfield,
                source: None,
                target: None,
            });
        }

        // Optional type; int when omitted.
        if let Some(Token::Ident(t)) = self.peek() {
            let t = t.clone();
            match t.as_str() {
                "bit" | "date" | "epoch" | "int" | "real" | "blob" | "text" | "password"
                | "email" => {
                    self.i += 1;
                    field.ftype = match t.as_str() {
                        "bit" => FieldType::Bit,
                        "date" => FieldType::Date,
                        "epoch" => FieldType::Epoch,
                        "int" => FieldType::Int,
                        "real" => FieldType::Real,
                        "blob" => FieldType::Blob,
                        "text" => FieldType::Text,
                        "password" => FieldType::Password,
                        _ => FieldType::Email,
                    };
                }
                "enum" => {
                    self.i += 1;
                    let (ename, _) = self.ident("enumeration name")?;
                    field.ftype = FieldType::Enum(ename);
                }
                "bits" => {
                    self.i += 1;
                    let (bname, _) = self.ident("bitfield name")?;
                    field.ftype = FieldType::Bits(bname);
                }
                "struct" => {
                    self.i += 1;
                    let (source, spos) = self.ident("source field")?;
                    if field.reference.is_some() {
                        return self.fail(
                            spos,
                            "struct fields take their reference from the source field",
                        );
                    }
                    field.ftype = FieldType::Struct;
                    // Target names are derived from the source field at link.
                    field.reference = Some(ForeignRef {
                        source_name: source,
                        target_struct: String::new(),
                        target_field: String::new(),
                        source: None,
                        target: None,
                    });
                }
                _ => {}
            }
        }

        // Qualifiers until ';'.
        loop {
            if self.accept(&Token::Semi) {
                break;
            }
            let (kw, kwpos) = self.ident("field qualifier")?;
            match kw.as_str() {
                "rowid" => field.flags.rowid = true,
                "unique" => field.flags.unique = true,
                "null" => field.flags.null = true,
                "noexport" => field.flags.noexport = true,
                "comment" => {
                    let (doc, _) = self.string("comment text")?;
                    field.doc = Some(doc);
                }
                "actdel" => field.actdel = self.parse_action()?,
                "actup" => field.actup = self.parse_action()?,
                "default" => field.default = Some(self.parse_default(&field.ftype, &kwpos)?),
                "limit" => {
                    let (opname, oppos) = self.ident("limit operator")?;
                    let op = match OPERATORS.get(opname.as_str()) {
                        Some(&op) if !op.is_unary() => op,
                        _ => {
                            return self.fail(
                                oppos,
                                format!("bad limit operator '{}'", opname),
                            )
                        }
                    };
                    let value = match self.advance() {
                        Some(Lexeme {
                            tok: Token::Int(v), ..
                        }) => v.to_string(),
                        Some(Lexeme {
                            tok: Token::Real(v),
                            ..
                        }) => v.to_string(),
                        Some(lex) => {
                            let msg =
                                format!("expected limit value, found {}", lex.tok.describe());
                            return self.fail(lex.pos, msg);
                        }
                        None => return self.fail_here("expected limit value"),
                    };
                    field.limits.push(FieldLimit { op, value });
                }
                _ => {
                    return self.fail(kwpos, format!("unknown field qualifier '{}'", kw));
                }
            }
        }

        Ok(field)
    }

    fn parse_action(&mut self) -> PResult<UpdateAction> {
        let (name, pos) = self.ident("reference action")?;
        match name.as_str() {
            "none" => Ok(UpdateAction::None),
            "restrict" => Ok(UpdateAction::Restrict),
            "nullify" => Ok(UpdateAction::Nullify),
            "cascade" => Ok(UpdateAction::Cascade),
            "default" => Ok(UpdateAction::Default),
            _ => self.fail(pos, format!("unknown reference action '{}'", name)),
        }
    }

    fn parse_default(&mut self, ftype: &FieldType, kwpos: &Pos) -> PResult<DefaultValue> {
        match ftype {
            FieldType::Bit | FieldType::Date | FieldType::Epoch | FieldType::Int
            | FieldType::Bits(_) => match self.advance() {
                Some(Lexeme {
                    tok: Token::Int(v), ..
                }) => Ok(DefaultValue::Integer(v)),
                Some(lex) => {
                    let msg = format!("expected integer default, found {}", lex.tok.describe());
                    self.fail(lex.pos, msg)
                }
                None => self.fail_here("expected integer default"),
            },
            FieldType::Real => match self.advance() {
                Some(Lexeme {
                    tok: Token::Real(v),
                    ..
                }) => Ok(DefaultValue::Real(v)),
                Some(Lexeme {
                    tok: Token::Int(v), ..
                }) => Ok(DefaultValue::Real(v as f64)),
                Some(lex) => {
                    let msg = format!("expected real default, found {}", lex.tok.describe());
                    self.fail(lex.pos, msg)
                }
                None => self.fail_here("expected real default"),
            },
            FieldType::Text | FieldType::Email => {
                let (s, _) = self.string("default string")?;
                Ok(DefaultValue::String(s))
            }
            FieldType::Enum(_) => {
                let (item, _) = self.ident("enumeration item")?;
                Ok(DefaultValue::EnumItem(item))
            }
            _ => self.fail(kwpos.clone(), "type does not accept a default"),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn parse_search(
        &mut self,
        parent: StructId,
        strct: &mut StructDef,
        kind: SearchKind,
        pos: Pos,
    ) -> PResult<()> {
        let mut search = Search {
            parent,
            kind,
            name: None,
            doc: None,
            pos,
            entries: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            distinct: None,
            group: None,
            aggregate: None,
            rolemap: None,
        };

        // Sentence terms up to ':' or ';'.
        while matches!(self.peek(), Some(Token::Ident(_))) {
            let (path, ppos) = self.path()?;
            let op = self.optional_operator();
            search.entries.push(SearchEntry {
                uname: path.replace('.', "_"),
                path,
                op,
                pos: ppos,
                chain: Vec::new(),
            });
            if !self.accept(&Token::Comma) {
                break;
            }
        }

        if self.accept(&Token::Colon) {
            while !matches!(self.peek(), Some(Token::Semi) | None) {
                let (kw, kwpos) = self.ident("query modifier")?;
                match kw.as_str() {
                    "name" => {
                        let (name, _) = self.ident("query name")?;
                        search.name = Some(name);
                    }
                    "comment" => {
                        let (doc, _) = self.string("comment text")?;
                        search.doc = Some(doc);
                    }
                    "order" => loop {
                        let (path, ppos) = self.path()?;
                        let mut descending = false;
                        if let Some(Token::Ident(dir)) = self.peek() {
                            match dir.as_str() {
                                "asc" => {
                                    self.i += 1;
                                }
                                "desc" => {
                                    self.i += 1;
                                    descending = true;
                                }
                                _ => {}
                            }
                        }
                        search.order.push(OrderRef {
                            path,
                            descending,
                            pos: ppos,
                            chain: Vec::new(),
                        });
                        if !self.accept(&Token::Comma) {
                            break;
                        }
                    },
                    "limit" => {
                        search.limit = Some(self.parse_count("limit")?);
                        if self.accept(&Token::Comma) {
                            search.offset = Some(self.parse_count("offset")?);
                        }
                    }
                    "distinct" => {
                        let (path, _) = self.path()?;
                        search.distinct = Some(path);
                    }
                    "grouprow" => {
                        let (path, _) = self.path()?;
                        search.group = Some(path);
                    }
                    "minrow" | "maxrow" => {
                        let (path, ppos) = self.path()?;
                        search.aggregate = Some(Aggregate {
                            kind: if kw == "minrow" {
                                AggregateKind::Minrow
                            } else {
                                AggregateKind::Maxrow
                            },
                            path,
                            pos: ppos,
                        });
                    }
                    _ => {
                        return self.fail(kwpos, format!("unknown query modifier '{}'", kw));
                    }
                }
            }
        }

        self.expect(Token::Semi, "';'")?;
        strct.searches.push(search);
        Ok(())
    }

    fn parse_count(&mut self, what: &str) -> PResult<u64> {
        match self.advance() {
            Some(Lexeme {
                tok: Token::Int(v), ..
            }) if v >= 0 => Ok(v as u64),
            Some(lex) => {
                let msg = format!("expected {} value, found {}", what, lex.tok.describe());
                self.fail(lex.pos, msg)
            }
            None => self.fail_here(format!("expected {} value", what)),
        }
    }

    // ------------------------------------------------------------------
    // Updates and deletes
    // ------------------------------------------------------------------

    fn parse_update(
        &mut self,
        parent: StructId,
        strct: &mut StructDef,
        kind: UpdateKind,
        pos: Pos,
    ) -> PResult<()> {
        let mut up = Update {
            parent,
            kind,
            name: None,
            doc: None,
            pos,
            mods: Vec::new(),
            conds: Vec::new(),
            update_all: false,
            rolemap: None,
        };

        if kind == UpdateKind::Modify {
            while matches!(self.peek(), Some(Token::Ident(_))) {
                let (fname, fpos) = self.ident("field name")?;
                let mut modifier = Modifier::Set;
                if let Some(Token::Ident(m)) = self.peek() {
                    if let Some(&m) = MODIFIERS.get(m.as_str()) {
                        self.i += 1;
                        modifier = m;
                    }
                }
                up.mods.push(ModRef {
                    field_name: fname,
                    modifier,
                    pos: fpos,
                    field: None,
                });
                if !self.accept(&Token::Comma) {
                    break;
                }
            }
            up.update_all = up.mods.is_empty();
            if self.accept(&Token::Colon) {
                self.parse_conds(&mut up)?;
            }
        } else {
            self.parse_conds(&mut up)?;
        }

        // Trailing modifiers after another ':'.
        if self.accept(&Token::Colon) {
            while !matches!(self.peek(), Some(Token::Semi) | None) {
                let (kw, kwpos) = self.ident("update modifier")?;
                match kw.as_str() {
                    "name" => {
                        let (name, _) = self.ident("operation name")?;
                        up.name = Some(name);
                    }
                    "comment" => {
                        let (doc, _) = self.string("comment text")?;
                        up.doc = Some(doc);
                    }
                    _ => {
                        return self.fail(kwpos, format!("unknown update modifier '{}'", kw));
                    }
                }
            }
        }

        self.expect(Token::Semi, "';'")?;
        match kind {
            UpdateKind::Modify => strct.updates.push(up),
            UpdateKind::Delete => strct.deletes.push(up),
        }
        Ok(())
    }

    fn parse_conds(&mut self, up: &mut Update) -> PResult<()> {
        while matches!(self.peek(), Some(Token::Ident(_))) {
            let (fname, fpos) = self.ident("field name")?;
            let op = self.optional_operator();
            up.conds.push(CondRef {
                field_name: fname,
                op,
                pos: fpos,
                field: None,
            });
            if !self.accept(&Token::Comma) {
                break;
            }
        }
        Ok(())
    }

    fn parse_unique(&mut self, strct: &mut StructDef, pos: Pos) -> PResult<()> {
        let mut unique = Unique {
            pos,
            field_names: Vec::new(),
            fields: Vec::new(),
        };
        loop {
            let (fname, _) = self.ident("field name")?;
            unique.field_names.push(fname);
            let _ = self.accept(&Token::Comma);
            if self.accept(&Token::Semi) {
                break;
            }
        }
        strct.uniques.push(unique);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rolemaps
    // ------------------------------------------------------------------

    fn parse_struct_roles(&mut self, strct: &mut StructDef, pos: Pos) -> PResult<()> {
        let mut decl = RolemapDecl {
            pos,
            roles: Vec::new(),
            targets: Vec::new(),
        };
        loop {
            let (rname, rpos) = self.ident("role name")?;
            decl.roles.push(RoleRef {
                name: rname,
                pos: rpos,
                role: None,
            });
            let _ = self.accept(&Token::Comma);
            if self.accept(&Token::LBrace) {
                break;
            }
        }

        loop {
            if self.accept(&Token::RBrace) {
                break;
            }
            let (kw, kwpos) = self.ident("rolemap operation")?;
            let target = match kw.as_str() {
                "all" => RolemapTarget::All,
                "insert" => RolemapTarget::Insert,
                "noexport" => {
                    if matches!(self.peek(), Some(Token::Ident(_))) {
                        let (fname, _) = self.ident("field name")?;
                        RolemapTarget::Noexport(Some(fname))
                    } else {
                        RolemapTarget::Noexport(None)
                    }
                }
                "search" | "list" | "iterate" | "count" => {
                    let kind = match kw.as_str() {
                        "search" => SearchKind::Get,
                        "list" => SearchKind::List,
                        "iterate" => SearchKind::Iterate,
                        _ => SearchKind::Count,
                    };
                    let (name, _) = self.ident("query name")?;
                    RolemapTarget::Search(kind, name)
                }
                "update" => {
                    let (name, _) = self.ident("operation name")?;
                    RolemapTarget::Update(name)
                }
                "delete" => {
                    let (name, _) = self.ident("operation name")?;
                    RolemapTarget::Delete(name)
                }
                _ => {
                    return self.fail(kwpos, format!("unknown rolemap operation '{}'", kw));
                }
            };
            decl.targets.push((target, kwpos));
            self.expect(Token::Semi, "';'")?;
        }
        self.expect(Token::Semi, "';'")?;
        strct.rolemap_decls.push(decl);
        Ok(())
    }

    fn parse_roles_block(&mut self, pos: Pos) -> PResult<()> {
        self.expect(Token::LBrace, "'{'")?;

        // Synthesize the role tree root on the first roles block.
        let root = if self.cfg.roles.is_empty() {
            let root = RoleId(0);
            self.cfg.roles.push(Role {
                name: "all".into(),
                doc: None,
                pos: pos.clone(),
                parent: None,
                children: Vec::new(),
            });
            for builtin in ["default", "none"] {
                let id = RoleId(self.cfg.roles.len());
                self.cfg.roles.push(Role {
                    name: builtin.into(),
                    doc: None,
                    pos: pos.clone(),
                    parent: Some(root),
                    children: Vec::new(),
                });
                self.cfg.roles[root.0].children.push(id);
            }
            root
        } else {
            RoleId(0)
        };

        loop {
            if self.accept(&Token::RBrace) {
                break;
            }
            self.parse_role_decl(root)?;
        }
        self.expect(Token::Semi, "';'")?;
        Ok(())
    }

    fn parse_role_decl(&mut self, parent: RoleId) -> PResult<()> {
        let (kw, kwpos) = self.ident("role declaration")?;
        if kw != "role" {
            return self.fail(kwpos, format!("expected 'role', found '{}'", kw));
        }
        let (name, npos) = self.ident("role name")?;
        if RESERVED_ROLES.contains(&name.to_ascii_lowercase().as_str()) {
            return self.fail(npos, format!("role name '{}' is reserved", name));
        }
        if self.cfg.find_role(&name).is_some() {
            return self.fail(npos, format!("duplicate role '{}'", name));
        }

        let id = RoleId(self.cfg.roles.len());
        let mut doc = None;
        if let Some(Token::Ident(kw)) = self.peek() {
            if kw == "comment" {
                self.i += 1;
                let (text, _) = self.string("comment text")?;
                doc = Some(text);
            }
        }
        self.cfg.roles.push(Role {
            name,
            doc,
            pos: npos,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.cfg.roles[parent.0].children.push(id);

        if self.accept(&Token::LBrace) {
            loop {
                if self.accept(&Token::RBrace) {
                    break;
                }
                self.parse_role_decl(id)?;
            }
        }
        self.expect(Token::Semi, "';'")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Enumerations and bitfields
    // ------------------------------------------------------------------

    fn parse_enum(&mut self) -> PResult<()> {
        let (name, pos) = self.ident("enumeration name")?;
        let mut enm = EnumDef {
            name,
            doc: None,
            pos,
            items: Vec::new(),
        };
        // Explicit values first; the rest are assigned below.
        let mut pending: Vec<Option<i64>> = Vec::new();

        self.expect(Token::LBrace, "'{'")?;
        loop {
            if self.accept(&Token::RBrace) {
                break;
            }
            let (kw, kwpos) = self.ident("enumeration statement")?;
            match kw.as_str() {
                "comment" => {
                    let (doc, _) = self.string("comment text")?;
                    self.expect(Token::Semi, "';'")?;
                    enm.doc = Some(doc);
                }
                "item" => {
                    let (iname, ipos) = self.ident("item name")?;
                    let mut value = None;
                    if let Some(Token::Int(v)) = self.peek() {
                        value = Some(*v);
                        self.i += 1;
                    }
                    let (doc, label) = self.parse_item_tail()?;
                    enm.items.push(EnumItem {
                        name: iname,
                        value: 0,
                        doc,
                        label,
                        pos: ipos,
                    });
                    pending.push(value);
                }
                _ => {
                    return self.fail(
                        kwpos,
                        format!("unknown enumeration statement '{}'", kw),
                    )
                }
            }
        }
        self.expect(Token::Semi, "';'")?;

        // Auto-assign: the smallest unused non-negative value, in order.
        let mut used: Vec<i64> = pending.iter().filter_map(|v| *v).collect();
        let mut next = 0i64;
        for (item, value) in enm.items.iter_mut().zip(pending) {
            item.value = match value {
                Some(v) => v,
                None => {
                    while used.contains(&next) {
                        next += 1;
                    }
                    used.push(next);
                    next
                }
            };
        }

        self.cfg.enums.push(enm);
        Ok(())
    }

    fn parse_bits(&mut self) -> PResult<()> {
        let (name, pos) = self.ident("bitfield name")?;
        let mut bitf = Bitfield {
            name,
            doc: None,
            pos,
            items: Vec::new(),
        };

        self.expect(Token::LBrace, "'{'")?;
        loop {
            if self.accept(&Token::RBrace) {
                break;
            }
            let (kw, kwpos) = self.ident("bitfield statement")?;
            match kw.as_str() {
                "comment" => {
                    let (doc, _) = self.string("comment text")?;
                    self.expect(Token::Semi, "';'")?;
                    bitf.doc = Some(doc);
                }
                "item" => {
                    let (iname, ipos) = self.ident("item name")?;
                    let value = match self.advance() {
                        Some(Lexeme {
                            tok: Token::Int(v), ..
                        }) => v,
                        Some(lex) => {
                            let msg =
                                format!("expected bit index, found {}", lex.tok.describe());
                            return self.fail(lex.pos, msg);
                        }
                        None => return self.fail_here("expected bit index"),
                    };
                    let (doc, label) = self.parse_item_tail()?;
                    bitf.items.push(BitIndex {
                        name: iname,
                        value,
                        doc,
                        label,
                        pos: ipos,
                    });
                }
                _ => {
                    return self.fail(kwpos, format!("unknown bitfield statement '{}'", kw));
                }
            }
        }
        self.expect(Token::Semi, "';'")?;
        self.cfg.bitfields.push(bitf);
        Ok(())
    }

    /// `[comment "..."] [jslabel ["lang"] "..."] ';'` after an item.
    fn parse_item_tail(&mut self) -> PResult<(Option<String>, Option<String>)> {
        let mut doc = None;
        let mut label = None;
        loop {
            if self.accept(&Token::Semi) {
                break;
            }
            let (kw, kwpos) = self.ident("item qualifier")?;
            match kw.as_str() {
                "comment" => {
                    let (text, _) = self.string("comment text")?;
                    doc = Some(text);
                }
                "jslabel" => {
                    if self.accept(&Token::Dot) {
                        let (lang, _) = self.ident("label language")?;
                        self.cfg.intern_lang(&lang);
                    }
                    let (text, _) = self.string("label text")?;
                    label = Some(text);
                }
                _ => {
                    return self.fail(kwpos, format!("unknown item qualifier '{}'", kw));
                }
            }
        }
        Ok((doc, label))
    }
}
