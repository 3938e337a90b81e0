//! Per-record metatypes: operator overrides registered from the host.

use crate::ctype::RecordId;
use crate::errors::{FfiError, Result};
use crate::value::Value;
use bitflags::bitflags;
use std::collections::HashMap;
use std::rc::Rc;

bitflags! {
    /// Which metamethods a metatype defines
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MetaFlags: u32 {
        const ADD = 1 << 0;
        const SUB = 1 << 1;
        const MUL = 1 << 2;
        const DIV = 1 << 3;
        const MOD = 1 << 4;
        const POW = 1 << 5;
        const UNM = 1 << 6;
        const CONCAT = 1 << 7;
        const LEN = 1 << 8;
        const EQ = 1 << 9;
        const LT = 1 << 10;
        const LE = 1 << 11;
        const INDEX = 1 << 12;
        const NEWINDEX = 1 << 13;
        const CALL = 1 << 14;
        const GC = 1 << 15;
        const TOSTRING = 1 << 16;
        const PAIRS = 1 << 17;
        const IDIV = 1 << 18;
        const BAND = 1 << 19;
        const BOR = 1 << 20;
        const BXOR = 1 << 21;
        const BNOT = 1 << 22;
        const SHL = 1 << 23;
        const SHR = 1 << 24;
    }
}

const SLOT_COUNT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Concat,
    Len,
    Eq,
    Lt,
    Le,
    Index,
    NewIndex,
    Call,
    Gc,
    ToString,
    Pairs,
    IDiv,
    BAnd,
    BOr,
    BXor,
    BNot,
    Shl,
    Shr,
}

impl MetaOp {
    pub const ALL: [MetaOp; SLOT_COUNT] = [
        MetaOp::Add,
        MetaOp::Sub,
        MetaOp::Mul,
        MetaOp::Div,
        MetaOp::Mod,
        MetaOp::Pow,
        MetaOp::Unm,
        MetaOp::Concat,
        MetaOp::Len,
        MetaOp::Eq,
        MetaOp::Lt,
        MetaOp::Le,
        MetaOp::Index,
        MetaOp::NewIndex,
        MetaOp::Call,
        MetaOp::Gc,
        MetaOp::ToString,
        MetaOp::Pairs,
        MetaOp::IDiv,
        MetaOp::BAnd,
        MetaOp::BOr,
        MetaOp::BXor,
        MetaOp::BNot,
        MetaOp::Shl,
        MetaOp::Shr,
    ];

    /// The table key the host uses for this metamethod
    pub fn name(self) -> &'static str {
        match self {
            MetaOp::Add => "__add",
            MetaOp::Sub => "__sub",
            MetaOp::Mul => "__mul",
            MetaOp::Div => "__div",
            MetaOp::Mod => "__mod",
            MetaOp::Pow => "__pow",
            MetaOp::Unm => "__unm",
            MetaOp::Concat => "__concat",
            MetaOp::Len => "__len",
            MetaOp::Eq => "__eq",
            MetaOp::Lt => "__lt",
            MetaOp::Le => "__le",
            MetaOp::Index => "__index",
            MetaOp::NewIndex => "__newindex",
            MetaOp::Call => "__call",
            MetaOp::Gc => "__gc",
            MetaOp::ToString => "__tostring",
            MetaOp::Pairs => "__pairs",
            MetaOp::IDiv => "__idiv",
            MetaOp::BAnd => "__band",
            MetaOp::BOr => "__bor",
            MetaOp::BXor => "__bxor",
            MetaOp::BNot => "__bnot",
            MetaOp::Shl => "__shl",
            MetaOp::Shr => "__shr",
        }
    }

    pub fn flag(self) -> MetaFlags {
        MetaFlags::from_bits_retain(1 << self as u32)
    }
}

/// A registered metatype. Slots are read from the host table once, when
/// the metatype is registered.
#[derive(Debug)]
pub struct Metatype {
    flags: MetaFlags,
    slots: [Option<Value>; SLOT_COUNT],
    table: Value,
}

impl Metatype {
    /// Snapshot the metamethods of a host table
    pub fn from_table(table: &Value) -> Result<Self> {
        let Value::Table(map) = table else {
            return Err(FfiError::type_error(format!(
                "metatype must be a table, got '{}'",
                table.type_name()
            )));
        };
        let map = map.borrow();
        let mut flags = MetaFlags::empty();
        let slots = std::array::from_fn(|i| {
            let op = MetaOp::ALL[i];
            match map.get(op.name()) {
                Some(Value::Null) | None => None,
                Some(v) => {
                    flags |= op.flag();
                    Some(v.clone())
                }
            }
        });
        Ok(Metatype {
            flags,
            slots,
            table: table.clone(),
        })
    }

    pub fn flags(&self) -> MetaFlags {
        self.flags
    }

    pub fn has(&self, op: MetaOp) -> bool {
        self.flags.contains(op.flag())
    }

    pub fn get(&self, op: MetaOp) -> Option<&Value> {
        self.slots[op as usize].as_ref()
    }

    /// The host table the metatype was registered with
    pub fn table(&self) -> &Value {
        &self.table
    }
}

/// Append-only registry of metatypes keyed by record identity
#[derive(Debug, Default)]
pub struct MetatypeRegistry {
    entries: HashMap<RecordId, Rc<Metatype>>,
}

impl MetatypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: RecordId, metatype: Metatype) -> Result<Rc<Metatype>> {
        if self.entries.contains_key(&id) {
            return Err(FfiError::type_error("cannot change a protected metatable"));
        }
        let metatype = Rc::new(metatype);
        self.entries.insert(id, metatype.clone());
        Ok(metatype)
    }

    pub fn get(&self, id: RecordId) -> Option<Rc<Metatype>> {
        self.entries.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Value {
        Value::function("noop", |_| Ok(vec![]))
    }

    #[test]
    fn test_flags_follow_slots() {
        let table = Value::table([("__add", noop()), ("__index", Value::table::<&str>([]))]);
        let mt = Metatype::from_table(&table).unwrap();
        assert!(mt.has(MetaOp::Add));
        assert!(mt.has(MetaOp::Index));
        assert!(!mt.has(MetaOp::Sub));
        assert_eq!(mt.flags(), MetaFlags::ADD | MetaFlags::INDEX);
        assert!(mt.get(MetaOp::Gc).is_none());
    }

    #[test]
    fn test_flag_positions_match_ops() {
        assert_eq!(MetaOp::Shr.flag(), MetaFlags::SHR);
        assert_eq!(MetaOp::Gc.flag(), MetaFlags::GC);
        assert_eq!(MetaOp::ALL[MetaOp::Pairs as usize], MetaOp::Pairs);
    }

    #[test]
    fn test_second_registration_fails() {
        let mut reg = MetatypeRegistry::new();
        let table = Value::table([("__len", noop())]);
        reg.register(RecordId(1), Metatype::from_table(&table).unwrap())
            .unwrap();
        let err = reg
            .register(RecordId(1), Metatype::from_table(&table).unwrap())
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot change a protected metatable");
        assert!(reg.get(RecordId(1)).is_some());
        assert!(reg.get(RecordId(2)).is_none());
    }

    #[test]
    fn test_non_table_is_rejected() {
        assert!(Metatype::from_table(&Value::Integer(1)).is_err());
    }
}
