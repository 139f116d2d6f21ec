//! CAT type classification.
//!
//! Tags every value that can take part in CAT state: boxes (`Data`) and the
//! pointer chains that can reach them (`Ptr`).  Classification follows uses,
//! not declared types, and grows monotonically to a fixed point.

use derive_more::Display;

use super::*;

#[derive(Copy, Clone, Debug, Display, Eq, PartialEq)]
pub enum CatType {
    #[display(fmt = "OTHER")]
    Other,
    #[display(fmt = "CAT_DATA")]
    Data,
    #[display(fmt = "CAT_PTR")]
    Ptr,
}

#[derive(Clone, Debug, Default)]
pub struct TypeInfo {
    pub data: Set<VarId>,
    pub ptrs: Set<VarId>,
}

impl TypeInfo {
    pub fn check(&self, v: &VarId) -> CatType {
        if self.data.contains(v) {
            CatType::Data
        } else if self.ptrs.contains(v) {
            CatType::Ptr
        } else {
            CatType::Other
        }
    }

    pub fn check_op(&self, op: &Operand) -> CatType {
        match op {
            Operand::Var(v) => self.check(v),
            Operand::CInt(_) => CatType::Other,
        }
    }

    fn add(&mut self, op: &Operand, tag: CatType) {
        if let Operand::Var(v) = op {
            match tag {
                CatType::Data => {
                    self.data.insert(v.clone());
                }
                CatType::Ptr => {
                    self.ptrs.insert(v.clone());
                }
                CatType::Other => (),
            }
        }
    }
}

/// Classify all values of a function.  Each pass either grows at least one
/// set or leaves both unchanged; stop on unchanged.
pub fn collect_type_info(f: &Function) -> TypeInfo {
    let mut info = TypeInfo::default();
    loop {
        let mut grew = false;
        for bb in f.body.values() {
            grew |= collect_type_info_in_bb(bb, &mut info);
        }
        if !grew {
            break;
        }
    }
    info
}

fn collect_type_info_in_bb(bb: &BasicBlock, info: &mut TypeInfo) -> bool {
    let (old_data, old_ptrs) = (info.data.len(), info.ptrs.len());

    for inst in &bb.insts {
        match inst {
            Instruction::Alloca { lhs } => {
                info.ptrs.insert(lhs.clone());
            }
            Instruction::Phi { lhs, ops } => {
                match info.check(lhs) {
                    // the result is tagged: every incoming value takes its tag.
                    tag @ (CatType::Data | CatType::Ptr) => {
                        for (op, _) in ops {
                            info.add(op, tag);
                        }
                    }
                    // untagged: the result takes the tag of any tagged incoming.
                    CatType::Other => {
                        for (op, _) in ops {
                            info.add(&Operand::Var(lhs.clone()), info.check_op(op));
                        }
                    }
                }
            }
            Instruction::Select { lhs, tt, ff, .. } => match info.check(lhs) {
                tag @ (CatType::Data | CatType::Ptr) => {
                    info.add(tt, tag);
                    info.add(ff, tag);
                }
                CatType::Other => {
                    for op in [tt, ff] {
                        info.add(&Operand::Var(lhs.clone()), info.check_op(op));
                    }
                }
            },
            Instruction::Store { dst, op } => {
                if info.check_op(op) != CatType::Other {
                    info.ptrs.insert(dst.clone());
                }
            }
            Instruction::Load { lhs, src } => {
                if info.check(lhs) != CatType::Other {
                    info.ptrs.insert(src.clone());
                }
            }
            Instruction::Call { lhs, callee, args } => match CatFn::of(callee) {
                Some(CatFn::New) => {
                    if let Some(lhs) = lhs {
                        info.data.insert(lhs.clone());
                    }
                }
                Some(CatFn::Get | CatFn::Set | CatFn::Destroy) => {
                    if let Some(arg) = args.first() {
                        info.add(arg, CatType::Data);
                    }
                }
                Some(CatFn::Add | CatFn::Sub) => {
                    for arg in args.iter().take(3) {
                        info.add(arg, CatType::Data);
                    }
                }
                // opaque calls returning a pointer type are classified
                // dynamically during the transfer, not here.
                None => (),
            },
        }
    }

    info.data.len() != old_data || info.ptrs.len() != old_ptrs
}
