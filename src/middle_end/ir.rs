//! The CAT intermediate representation.
//!
//! A small SSA IR: functions made of basic blocks, blocks made of
//! instructions plus one terminal.  CAT boxes are opaque `box`-typed values
//! reached only through the named runtime calls; pointer chains over boxes
//! use `&T` cells produced by `$alloca`.

pub use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::sync::Arc;

pub mod display_impl;
pub mod fromstr_impl;
pub mod validate;

// SECTION: types

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type(pub Arc<IrType>);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IrType {
    Int,
    Box,
    Pointer(Type),
}

pub fn int_ty() -> Type {
    Type(Arc::new(IrType::Int))
}

pub fn box_ty() -> Type {
    Type(Arc::new(IrType::Box))
}

pub fn ptr_ty(inner: Type) -> Type {
    Type(Arc::new(IrType::Pointer(inner)))
}

impl Type {
    pub fn is_int(&self) -> bool {
        matches!(&*self.0, IrType::Int)
    }

    pub fn is_box(&self) -> bool {
        matches!(&*self.0, IrType::Box)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(&*self.0, IrType::Pointer(_))
    }

    // the type of the cell a pointer refers to.
    pub fn pointee(&self) -> Option<&Type> {
        match &*self.0 {
            IrType::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    // bytes a value of this type occupies in a cell.
    pub fn store_size(&self) -> u64 {
        8
    }
}

// SECTION: identifiers

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub String);

pub fn func_id(name: &str) -> FuncId {
    FuncId(name.to_owned())
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbId(pub String);

pub fn bb_id(name: &str) -> BbId {
    BbId(name.to_owned())
}

/// Name of a called function.  Calls are by name only: the CAT runtime and
/// anything else the program links against.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtId(pub String);

pub fn ext_id(name: &str) -> ExtId {
    ExtId(name.to_owned())
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub Arc<VarInner>);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInner {
    pub name: String,
    pub typ: Type,
    // None for globals.
    pub scope: Option<FuncId>,
}

pub fn var_id(name: &str, typ: Type, scope: Option<FuncId>) -> VarId {
    VarId(Arc::new(VarInner {
        name: name.to_owned(),
        typ,
        scope,
    }))
}

impl VarId {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn typ(&self) -> Type {
        self.0.typ.clone()
    }

    pub fn is_global(&self) -> bool {
        self.0.scope.is_none()
    }
}

// SECTION: instructions

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operand {
    Var(VarId),
    CInt(i64),
}

impl Operand {
    pub fn typ(&self) -> Type {
        match self {
            Operand::Var(v) => v.typ(),
            Operand::CInt(_) => int_ty(),
        }
    }

    pub fn as_var(&self) -> Option<&VarId> {
        match self {
            Operand::Var(v) => Some(v),
            Operand::CInt(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Instruction {
    Alloca {
        lhs: VarId,
    },
    Load {
        lhs: VarId,
        src: VarId,
    },
    Store {
        dst: VarId,
        op: Operand,
    },
    Phi {
        lhs: VarId,
        // (incoming value, predecessor block), per edge.
        ops: Vec<(Operand, BbId)>,
    },
    Select {
        lhs: VarId,
        cond: Operand,
        tt: Operand,
        ff: Operand,
    },
    Call {
        lhs: Option<VarId>,
        callee: ExtId,
        args: Vec<Operand>,
    },
}

impl Instruction {
    // the variable this instruction assigns, if any.
    pub fn lhs(&self) -> Option<&VarId> {
        use Instruction::*;
        match self {
            Alloca { lhs } => Some(lhs),
            Load { lhs, .. } => Some(lhs),
            Store { .. } => None,
            Phi { lhs, .. } => Some(lhs),
            Select { lhs, .. } => Some(lhs),
            Call { lhs, .. } => lhs.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Terminal {
    Jump(BbId),
    Branch { cond: Operand, tt: BbId, ff: BbId },
    Ret(Option<Operand>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BbId,
    pub insts: Vec<Instruction>,
    pub term: Terminal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub id: FuncId,
    pub params: Vec<VarId>,
    pub ret_ty: Option<Type>,
    pub locals: Set<VarId>,
    pub body: Map<BbId, BasicBlock>,
}

impl Function {
    // look an instruction up by its (block, index) position.
    pub fn inst(&self, id: &(BbId, usize)) -> Option<&Instruction> {
        self.body.get(&id.0).and_then(|bb| bb.insts.get(id.1))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub globals: Set<VarId>,
    pub functions: Map<FuncId, Function>,
}

// SECTION: the CAT runtime interface

/// The CAT runtime, called by name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CatFn {
    New,
    Get,
    Set,
    Add,
    Sub,
    Destroy,
}

impl CatFn {
    pub fn of(callee: &ExtId) -> Option<CatFn> {
        match callee.0.as_str() {
            "CAT_new" => Some(CatFn::New),
            "CAT_get" => Some(CatFn::Get),
            "CAT_set" => Some(CatFn::Set),
            "CAT_add" => Some(CatFn::Add),
            "CAT_sub" => Some(CatFn::Sub),
            "CAT_destroy" => Some(CatFn::Destroy),
            _ => None,
        }
    }
}

/// Non-CAT calls known not to touch CAT state, so the opaque-call transfer
/// skips them.  Only consulted for callees `CatFn::of` does not recognize.
pub fn is_exempt(callee: &ExtId) -> bool {
    callee.0 == "printf" || callee.0.starts_with("llvm.lifetime")
}
