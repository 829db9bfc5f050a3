//! Structural comparison of two configurations.
//!
//! Entities are matched by name: structures by name, fields by
//! (structure, field), enumeration and bitfield items by (owner, item),
//! uniques by the sorted tuple of covered field names. Records are emitted
//! in a fixed traversal order so the stream is deterministic: enumerations,
//! then bitfields, then structures; within each, the *into* declaration
//! order first, then leftover *from* entries.

use std::collections::HashSet;

use crate::config::{BitfId, Config, EnumId, FieldId, FieldType, StructId};

/// One difference between the *from* and *into* configurations.
///
/// Handles on the `from` side index the *from* config, `into` handles the
/// *into* config.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffRecord {
    AddStruct(StructId),
    DelStruct(StructId),
    ModStruct { from: StructId, into: StructId },
    AddField(FieldId),
    DelField(FieldId),
    ModFieldType { from: FieldId, into: FieldId },
    ModFieldEnm { from: FieldId, into: FieldId },
    ModFieldBitf { from: FieldId, into: FieldId },
    ModFieldFlags { from: FieldId, into: FieldId },
    ModFieldActions { from: FieldId, into: FieldId },
    ModFieldReference { from: FieldId, into: FieldId },
    ModFieldDefault { from: FieldId, into: FieldId },
    ModFieldDoc { from: FieldId, into: FieldId },
    AddEnum(EnumId),
    DelEnum(EnumId),
    AddEitem { into: (EnumId, usize) },
    DelEitem { from: (EnumId, usize) },
    ModEitemValue { from: (EnumId, usize), into: (EnumId, usize) },
    AddBitf(BitfId),
    DelBitf(BitfId),
    AddBitidx { into: (BitfId, usize) },
    DelBitidx { from: (BitfId, usize) },
    ModBitidxValue { from: (BitfId, usize), into: (BitfId, usize) },
    AddUnique { into: (StructId, usize) },
    DelUnique { from: (StructId, usize) },
}

/// Compare two linked configurations.
pub fn diff(from: &Config, into: &Config) -> Vec<DiffRecord> {
    let mut records = Vec::new();
    diff_enums(from, into, &mut records);
    diff_bitfields(from, into, &mut records);
    diff_structs(from, into, &mut records);
    log::debug!("diff produced {} record(s)", records.len());
    records
}

fn diff_enums(from: &Config, into: &Config, records: &mut Vec<DiffRecord>) {
    for (ei, enm) in into.enums.iter().enumerate() {
        let into_id = EnumId(ei);
        let Some(from_id) = from.find_enum(&enm.name) else {
            records.push(DiffRecord::AddEnum(into_id));
            continue;
        };
        let old = from.enm(from_id);
        for (ii, item) in enm.items.iter().enumerate() {
            match old.items.iter().position(|i| i.name == item.name) {
                Some(oi) => {
                    if old.items[oi].value != item.value {
                        records.push(DiffRecord::ModEitemValue {
                            from: (from_id, oi),
                            into: (into_id, ii),
                        });
                    }
                }
                None => records.push(DiffRecord::AddEitem {
                    into: (into_id, ii),
                }),
            }
        }
        for (oi, item) in old.items.iter().enumerate() {
            if enm.find_item(&item.name).is_none() {
                records.push(DiffRecord::DelEitem {
                    from: (from_id, oi),
                });
            }
        }
    }
    for (ei, enm) in from.enums.iter().enumerate() {
        if into.find_enum(&enm.name).is_none() {
            records.push(DiffRecord::DelEnum(EnumId(ei)));
        }
    }
}

fn diff_bitfields(from: &Config, into: &Config, records: &mut Vec<DiffRecord>) {
    for (bi, bitf) in into.bitfields.iter().enumerate() {
        let into_id = BitfId(bi);
        let Some(from_id) = from.find_bitfield(&bitf.name) else {
            records.push(DiffRecord::AddBitf(into_id));
            continue;
        };
        let old = from.bitf(from_id);
        for (ii, item) in bitf.items.iter().enumerate() {
            match old.items.iter().position(|i| i.name == item.name) {
                Some(oi) => {
                    if old.items[oi].value != item.value {
                        records.push(DiffRecord::ModBitidxValue {
                            from: (from_id, oi),
                            into: (into_id, ii),
                        });
                    }
                }
                None => records.push(DiffRecord::AddBitidx {
                    into: (into_id, ii),
                }),
            }
        }
        for (oi, item) in old.items.iter().enumerate() {
            if !bitf.items.iter().any(|i| i.name == item.name) {
                records.push(DiffRecord::DelBitidx {
                    from: (from_id, oi),
                });
            }
        }
    }
    for (bi, bitf) in from.bitfields.iter().enumerate() {
        if into.find_bitfield(&bitf.name).is_none() {
            records.push(DiffRecord::DelBitf(BitfId(bi)));
        }
    }
}

fn diff_structs(from: &Config, into: &Config, records: &mut Vec<DiffRecord>) {
    for (si, strct) in into.structs.iter().enumerate() {
        let into_id = StructId(si);
        let Some(from_id) = from.find_struct(&strct.name) else {
            records.push(DiffRecord::AddStruct(into_id));
            continue;
        };
        let old = from.strct(from_id);

        if old.doc != strct.doc {
            records.push(DiffRecord::ModStruct {
                from: from_id,
                into: into_id,
            });
        }

        for (fi, field) in strct.fields.iter().enumerate() {
            let into_fid = FieldId {
                strct: into_id,
                index: fi,
            };
            match old.find_field(&field.name) {
                Some(oi) => {
                    let from_fid = FieldId {
                        strct: from_id,
                        index: oi,
                    };
                    diff_field(from, into, from_fid, into_fid, records);
                }
                None => records.push(DiffRecord::AddField(into_fid)),
            }
        }
        for (oi, field) in old.fields.iter().enumerate() {
            if strct.find_field(&field.name).is_none() {
                records.push(DiffRecord::DelField(FieldId {
                    strct: from_id,
                    index: oi,
                }));
            }
        }

        let old_keys: HashSet<String> =
            old.uniques.iter().map(|u| u.canonical_name()).collect();
        let new_keys: HashSet<String> =
            strct.uniques.iter().map(|u| u.canonical_name()).collect();
        for (ui, unique) in strct.uniques.iter().enumerate() {
            if !old_keys.contains(&unique.canonical_name()) {
                records.push(DiffRecord::AddUnique {
                    into: (into_id, ui),
                });
            }
        }
        for (ui, unique) in old.uniques.iter().enumerate() {
            if !new_keys.contains(&unique.canonical_name()) {
                records.push(DiffRecord::DelUnique {
                    from: (from_id, ui),
                });
            }
        }
    }
    for (si, strct) in from.structs.iter().enumerate() {
        if into.find_struct(&strct.name).is_none() {
            records.push(DiffRecord::DelStruct(StructId(si)));
        }
    }
}

fn diff_field(
    from: &Config,
    into: &Config,
    from_fid: FieldId,
    into_fid: FieldId,
    records: &mut Vec<DiffRecord>,
) {
    let old = from.field(from_fid);
    let new = into.field(into_fid);
    let (f, i) = (from_fid, into_fid);

    if !old.ftype.same_kind(&new.ftype) {
        records.push(DiffRecord::ModFieldType { from: f, into: i });
    } else if matches!(new.ftype, FieldType::Enum(_)) && old.ftype != new.ftype {
        records.push(DiffRecord::ModFieldEnm { from: f, into: i });
    } else if matches!(new.ftype, FieldType::Bits(_)) && old.ftype != new.ftype {
        records.push(DiffRecord::ModFieldBitf { from: f, into: i });
    }

    if old.flags != new.flags {
        records.push(DiffRecord::ModFieldFlags { from: f, into: i });
    }
    if old.actdel != new.actdel || old.actup != new.actup {
        records.push(DiffRecord::ModFieldActions { from: f, into: i });
    }

    let ref_key = |field: &crate::config::Field| {
        field
            .reference
            .as_ref()
            .map(|r| (r.target_struct.clone(), r.target_field.clone()))
    };
    if ref_key(old) != ref_key(new) {
        records.push(DiffRecord::ModFieldReference { from: f, into: i });
    }

    if old.default != new.default {
        records.push(DiffRecord::ModFieldDefault { from: f, into: i });
    }
    if old.doc != new.doc {
        records.push(DiffRecord::ModFieldDoc { from: f, into: i });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_config, parse_link};

    fn linked(input: &str) -> Config {
        let mut cfg = Config::new();
        parse_config(&mut cfg, input, "test.ort").expect("parse");
        parse_link(&mut cfg).expect("link");
        cfg
    }

    #[test]
    fn test_identical_configs_are_empty() {
        let text = "enum st { item a 0; };\n\
                    struct user { field id int rowid; field s enum st; unique id s; };";
        let a = linked(text);
        let b = linked(text);
        assert!(diff(&a, &b).is_empty());
    }

    #[test]
    fn test_added_field() {
        let from = linked("struct user { field id int rowid; field name text; };");
        let into =
            linked("struct user { field id int rowid; field name text; field age int; };");
        let records = diff(&from, &into);
        assert_eq!(records.len(), 1);
        match &records[0] {
            DiffRecord::AddField(fid) => assert_eq!(into.field(*fid).name, "age"),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_deleted_struct() {
        let from = linked(
            "struct old_table { field id int rowid; };\n\
             struct keep_table { field id int rowid; };",
        );
        let into = linked("struct keep_table { field id int rowid; };");
        let records = diff(&from, &into);
        assert_eq!(records.len(), 1);
        match &records[0] {
            DiffRecord::DelStruct(sid) => assert_eq!(from.strct(*sid).name, "old_table"),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_field_type_change() {
        let from = linked("struct user { field id int rowid; field name text; };");
        let into = linked("struct user { field id int rowid; field name int; };");
        let records = diff(&from, &into);
        assert!(matches!(records[0], DiffRecord::ModFieldType { .. }));
    }

    #[test]
    fn test_enum_reference_change_is_not_type_change() {
        let from = linked(
            "enum a { item x 0; }; enum b { item x 0; };\n\
             struct t { field id int rowid; field s enum a; };",
        );
        let into = linked(
            "enum a { item x 0; }; enum b { item x 0; };\n\
             struct t { field id int rowid; field s enum b; };",
        );
        let records = diff(&from, &into);
        assert!(matches!(records[0], DiffRecord::ModFieldEnm { .. }));
    }

    #[test]
    fn test_flag_and_action_changes() {
        let from = linked(
            "struct c { field id int rowid; };\n\
             struct t { field id int rowid; field cid:c.id int; };",
        );
        let into = linked(
            "struct c { field id int rowid; };\n\
             struct t { field id int rowid; field cid:c.id int unique actdel cascade; };",
        );
        let records = diff(&from, &into);
        assert!(records
            .iter()
            .any(|r| matches!(r, DiffRecord::ModFieldFlags { .. })));
        assert!(records
            .iter()
            .any(|r| matches!(r, DiffRecord::ModFieldActions { .. })));
    }

    #[test]
    fn test_enum_item_records() {
        let from = linked("enum st { item a 0; item gone 1; };");
        let into = linked("enum st { item a 2; item fresh 1; };");
        let records = diff(&from, &into);
        assert!(matches!(records[0], DiffRecord::ModEitemValue { .. }));
        assert!(matches!(records[1], DiffRecord::AddEitem { .. }));
        assert!(matches!(records[2], DiffRecord::DelEitem { .. }));
    }

    #[test]
    fn test_unique_matching_ignores_declaration_order() {
        let from = linked(
            "struct t { field id int rowid; field a text; field b text; unique a b; };",
        );
        let into = linked(
            "struct t { field id int rowid; field a text; field b text; unique b a; };",
        );
        assert!(diff(&from, &into).is_empty());
    }

    #[test]
    fn test_unique_added_and_deleted() {
        let from = linked(
            "struct t { field id int rowid; field a text; field b text; unique a b; };",
        );
        let into = linked(
            "struct t { field id int rowid; field a text; field b text; unique id a; };",
        );
        let records = diff(&from, &into);
        assert!(matches!(records[0], DiffRecord::AddUnique { .. }));
        assert!(matches!(records[1], DiffRecord::DelUnique { .. }));
    }

    #[test]
    fn test_traversal_order_enums_before_bitfields_before_structs() {
        let from = linked("struct keep { field id int rowid; };");
        let into = linked(
            "struct keep { field id int rowid; };\n\
             struct fresh { field id int rowid; };\n\
             enum st { item a 0; };\n\
             bits b { item x 0; };",
        );
        let records = diff(&from, &into);
        assert!(matches!(records[0], DiffRecord::AddEnum(_)));
        assert!(matches!(records[1], DiffRecord::AddBitf(_)));
        assert!(matches!(records[2], DiffRecord::AddStruct(_)));
    }

    #[test]
    fn test_doc_changes() {
        let from = linked("struct t { comment \"old\"; field id int rowid; };");
        let into = linked(
            "struct t { comment \"new\"; field id int rowid comment \"key\"; };",
        );
        let records = diff(&from, &into);
        assert!(records
            .iter()
            .any(|r| matches!(r, DiffRecord::ModStruct { .. })));
        assert!(records
            .iter()
            .any(|r| matches!(r, DiffRecord::ModFieldDoc { .. })));
    }
}
