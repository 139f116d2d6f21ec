//! Well-formedness checks.  Passing them produces the `Valid<Program>`
//! witness every analysis and optimization entry point requires.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use thiserror::Error;

use crate::commons::Valid;

use super::*;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("function `{0}` has no entry block")]
    NoEntry(FuncId),
    #[error("function `{0}` references unknown block `{1}`")]
    UnknownBlock(FuncId, BbId),
    #[error("block `entry` of `{0}` must not be a branch target")]
    EntryTarget(FuncId),
    #[error("variable `{0}` is assigned more than once in `{1}`")]
    Reassigned(VarId, FuncId),
    #[error("assignment to non-local `{0}` in `{1}`")]
    AssignedNonLocal(VarId, FuncId),
    #[error("variable `{0}` is not declared in `{1}`")]
    Undeclared(VarId, FuncId),
    #[error("duplicate declaration of `{0}` in `{1}`")]
    DuplicateDecl(String, FuncId),
    #[error("type error in `{0}`: {1}")]
    Type(FuncId, String),
    #[error("ill-formed `{0}` call in `{1}`: {2}")]
    BadCatCall(ExtId, FuncId, String),
    #[error("phi in block `{0}` of `{1}` names `{2}`, which is not a predecessor")]
    PhiPred(BbId, FuncId, BbId),
    #[error("phi below a non-phi instruction in block `{0}` of `{1}`")]
    PhiPosition(BbId, FuncId),
}

impl Program {
    pub fn validate(self) -> Result<Valid<Program>, ValidationError> {
        for f in self.functions.values() {
            validate_function(f, &self.globals)?;
        }
        Ok(Valid(self))
    }
}

fn validate_function(f: &Function, globals: &Set<VarId>) -> Result<(), ValidationError> {
    let fid = &f.id;

    if !f.body.contains_key(&bb_id("entry")) {
        return Err(ValidationError::NoEntry(fid.clone()));
    }

    // declarations, keyed by name so shadowing is rejected too.
    let mut declared: Map<&str, &VarId> = Map::new();
    for v in globals.iter().chain(&f.params).chain(&f.locals) {
        if declared.insert(v.name(), v).is_some() {
            return Err(ValidationError::DuplicateDecl(
                v.name().to_owned(),
                fid.clone(),
            ));
        }
    }

    let check_declared = |v: &VarId| {
        if declared.get(v.name()) == Some(&v) {
            Ok(())
        } else {
            Err(ValidationError::Undeclared(v.clone(), fid.clone()))
        }
    };
    let check_op = |op: &Operand| match op {
        Operand::Var(v) => check_declared(v),
        Operand::CInt(_) => Ok(()),
    };
    let type_err = |msg: String| Err(ValidationError::Type(fid.clone(), msg));

    // predecessor edges, used for phi checks below.
    let mut preds: Map<&BbId, Set<&BbId>> = Map::new();
    for bb in f.body.values() {
        let check_target = |target: &BbId| {
            if !f.body.contains_key(target) {
                return Err(ValidationError::UnknownBlock(fid.clone(), target.clone()));
            }
            if *target == bb_id("entry") {
                return Err(ValidationError::EntryTarget(fid.clone()));
            }
            Ok(())
        };
        match &bb.term {
            Terminal::Jump(target) => {
                check_target(target)?;
                preds.entry(target).or_default().insert(&bb.id);
            }
            Terminal::Branch { cond, tt, ff } => {
                check_op(cond)?;
                if !cond.typ().is_int() {
                    return type_err(format!("branch on non-int `{cond}`"));
                }
                for target in [tt, ff] {
                    check_target(target)?;
                    preds.entry(target).or_default().insert(&bb.id);
                }
            }
            Terminal::Ret(op) => {
                if let Some(op) = op {
                    check_op(op)?;
                }
                match (&f.ret_ty, op) {
                    (Some(t), Some(op)) if op.typ() == *t => (),
                    (None, None) => (),
                    _ => return type_err("return does not match the function type".to_owned()),
                }
            }
        }
    }

    let mut assigned: Set<&VarId> = Set::new();
    for bb in f.body.values() {
        let mut seen_non_phi = false;
        for inst in &bb.insts {
            if let Some(lhs) = inst.lhs() {
                if !f.locals.contains(lhs) {
                    return Err(ValidationError::AssignedNonLocal(lhs.clone(), fid.clone()));
                }
                if !assigned.insert(lhs) {
                    return Err(ValidationError::Reassigned(lhs.clone(), fid.clone()));
                }
            }

            match inst {
                Instruction::Alloca { lhs } => {
                    if !lhs.typ().is_ptr() {
                        return type_err(format!("alloca result `{lhs}` is not a pointer"));
                    }
                }
                Instruction::Load { lhs, src } => {
                    check_declared(src)?;
                    if src.typ().pointee() != Some(&lhs.typ()) {
                        return type_err(format!("load of `{src}` into `{lhs}`"));
                    }
                }
                Instruction::Store { dst, op } => {
                    check_declared(dst)?;
                    check_op(op)?;
                    if dst.typ().pointee() != Some(&op.typ()) {
                        return type_err(format!("store of `{op}` through `{dst}`"));
                    }
                }
                Instruction::Phi { lhs, ops } => {
                    if seen_non_phi {
                        return Err(ValidationError::PhiPosition(bb.id.clone(), fid.clone()));
                    }
                    for (op, pred) in ops {
                        check_op(op)?;
                        if op.typ() != lhs.typ() {
                            return type_err(format!("phi arm `{op}` does not match `{lhs}`"));
                        }
                        if !preds.get(&bb.id).is_some_and(|ps| ps.contains(pred)) {
                            return Err(ValidationError::PhiPred(
                                bb.id.clone(),
                                fid.clone(),
                                pred.clone(),
                            ));
                        }
                    }
                }
                Instruction::Select { lhs, cond, tt, ff } => {
                    check_op(cond)?;
                    check_op(tt)?;
                    check_op(ff)?;
                    if !cond.typ().is_int() {
                        return type_err(format!("select on non-int `{cond}`"));
                    }
                    if tt.typ() != lhs.typ() || ff.typ() != lhs.typ() {
                        return type_err(format!("select arms do not match `{lhs}`"));
                    }
                }
                Instruction::Call { lhs, callee, args } => {
                    for arg in args {
                        check_op(arg)?;
                    }
                    validate_cat_call(fid, lhs, callee, args)?;
                }
            }

            if !matches!(inst, Instruction::Phi { .. }) {
                seen_non_phi = true;
            }
        }
    }

    Ok(())
}

fn validate_cat_call(
    fid: &FuncId,
    lhs: &Option<VarId>,
    callee: &ExtId,
    args: &[Operand],
) -> Result<(), ValidationError> {
    let Some(cat) = CatFn::of(callee) else {
        return Ok(());
    };
    let bad = |msg: &str| {
        Err(ValidationError::BadCatCall(
            callee.clone(),
            fid.clone(),
            msg.to_owned(),
        ))
    };

    let arg_is = |i: usize, pred: fn(&Type) -> bool| args.get(i).is_some_and(|a| pred(&a.typ()));

    match cat {
        CatFn::New => {
            if args.len() != 1 || !arg_is(0, Type::is_int) {
                return bad("expected one int argument");
            }
            if lhs.as_ref().is_some_and(|l| !l.typ().is_box()) {
                return bad("result is not a box");
            }
        }
        CatFn::Get => {
            if args.len() != 1 || !arg_is(0, Type::is_box) {
                return bad("expected one box argument");
            }
            if lhs.as_ref().is_some_and(|l| !l.typ().is_int()) {
                return bad("result is not an int");
            }
        }
        CatFn::Set => {
            if args.len() != 2 || !arg_is(0, Type::is_box) || !arg_is(1, Type::is_int) {
                return bad("expected a box and an int");
            }
            if lhs.is_some() {
                return bad("has no result");
            }
        }
        CatFn::Add | CatFn::Sub => {
            if args.len() != 3 || !(0..3).all(|i| arg_is(i, Type::is_box)) {
                return bad("expected three box arguments");
            }
            if lhs.is_some() {
                return bad("has no result");
            }
        }
        CatFn::Destroy => {
            if args.len() != 1 || !arg_is(0, Type::is_box) {
                return bad("expected one box argument");
            }
            if lhs.is_some() {
                return bad("has no result");
            }
        }
    }

    Ok(())
}
