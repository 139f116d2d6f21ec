//! Constant folding, algebraic simplification, and constant propagation of
//! CAT calls.
//!
//! Two rewriting passes per round.  Pass 1 folds `CAT_add`/`CAT_sub` whose
//! operand boxes hold unique constants and simplifies `x - x` and `x ± 0`.
//! Pass 2 replaces `CAT_get` of a constant box with the constant itself.
//! Both passes collect their edits against the unmodified function and
//! apply them in one sweep afterwards.

use crate::commons::*;
use crate::middle_end::analysis::{cat_defs::*, *};
use crate::middle_end::ir::*;

/// The actual optimization pass, with the conservative mod-ref oracle.
pub fn cat_fold(program: Valid<Program>) -> Valid<Program> {
    cat_fold_with(program, &ConservativeOracle)
}

/// The optimization pass with a caller-supplied mod-ref oracle.  Re-runs
/// analysis and rewriting until a round deletes nothing.
pub fn cat_fold_with(program: Valid<Program>, oracle: &dyn ModRefOracle) -> Valid<Program> {
    let mut program = program;
    loop {
        let (next, changed) = run_once(program, oracle);
        program = next;
        if !changed {
            return program;
        }
    }
}

/// One analyze-and-rewrite round.  The flag is true iff at least one call
/// was deleted; the results that fed this round are stale then, so the
/// caller is expected to go again.
pub fn run_once(
    valid_program: Valid<Program>,
    oracle: &dyn ModRefOracle,
) -> (Valid<Program>, bool) {
    let mut program = valid_program.0.clone();
    let mut changed = false;

    program.functions = program
        .functions
        .keys()
        .map(|id| {
            let analysis = analyze(&valid_program, id, oracle);
            let (opt_func, func_changed) = fold_func(&analysis);
            changed |= func_changed;
            (id.clone(), opt_func)
        })
        .collect();

    (program.validate().unwrap(), changed)
}

fn fold_func(analysis: &CatAnalysis) -> (Function, bool) {
    let func = analysis.func;

    let mut replacements: Map<InstId, Vec<Instruction>> = Map::new();
    let mut deleted: Set<InstId> = Set::new();
    let mut subst: Map<VarId, i64> = Map::new();
    let mut fresh = FreshLocals::new(func, analysis.globals);

    // pass 1: fold and simplify CAT_add / CAT_sub.
    for (bbid, bb) in &func.body {
        for (i, inst) in bb.insts.iter().enumerate() {
            let Instruction::Call { callee, args, .. } = inst else {
                continue;
            };
            let Some(cat @ (CatFn::Add | CatFn::Sub)) = CatFn::of(callee) else {
                continue;
            };
            let id = (bbid.clone(), i);
            let Some(env) = analysis.ins.get(&id) else {
                continue;
            };
            let (dst, a, b) = (&args[0], &args[1], &args[2]);

            // x - x is 0 whether or not x is constant.
            if cat == CatFn::Sub && a == b {
                replacements.insert(id, vec![cat_set(dst.clone(), Operand::CInt(0))]);
                continue;
            }

            let k1 = constant_of(a, &env.rda, func);
            let k2 = constant_of(b, &env.rda, func);
            let new_insts = match (k1, k2) {
                (Some(k1), Some(k2)) => {
                    let k = match cat {
                        CatFn::Add => k1.wrapping_add(k2),
                        _ => k1.wrapping_sub(k2),
                    };
                    vec![cat_set(dst.clone(), Operand::CInt(k))]
                }
                // x ± 0 forwards x's value.  The subtraction variant only
                // fires with the zero on the right: 0 - x would need a
                // negation of a non-constant.
                (None, Some(0)) => {
                    let t = fresh.int_local();
                    vec![
                        cat_get(t.clone(), a.clone()),
                        cat_set(dst.clone(), Operand::Var(t)),
                    ]
                }
                (Some(0), None) if cat == CatFn::Add => {
                    let t = fresh.int_local();
                    vec![
                        cat_get(t.clone(), b.clone()),
                        cat_set(dst.clone(), Operand::Var(t)),
                    ]
                }
                _ => continue,
            };
            replacements.insert(id, new_insts);
        }
    }

    // pass 2: propagate constant CAT_get results into their uses.
    for (bbid, bb) in &func.body {
        for (i, inst) in bb.insts.iter().enumerate() {
            let Instruction::Call { lhs, callee, args } = inst else {
                continue;
            };
            if CatFn::of(callee) != Some(CatFn::Get) {
                continue;
            }
            let id = (bbid.clone(), i);
            let Some(env) = analysis.ins.get(&id) else {
                continue;
            };
            let Some(k) = constant_of(&args[0], &env.rda, func) else {
                continue;
            };
            if let Some(lhs) = lhs {
                subst.insert(lhs.clone(), k);
            }
            deleted.insert(id);
        }
    }

    let changed = !replacements.is_empty() || !deleted.is_empty();

    // apply the collected edits in one sweep.
    let mut opt_func = func.clone();
    for (bbid, bb) in &mut opt_func.body {
        let mut insts = Vec::new();
        for (i, inst) in bb.insts.drain(..).enumerate() {
            let id = (bbid.clone(), i);
            if deleted.contains(&id) {
                continue;
            }
            match replacements.get(&id) {
                Some(repl) => insts.extend(repl.iter().cloned()),
                None => insts.push(inst),
            }
        }
        for inst in &mut insts {
            substitute_inst(inst, &subst);
        }
        substitute_term(&mut bb.term, &subst);
        bb.insts = insts;
    }
    opt_func.locals.extend(fresh.created);

    (opt_func, changed)
}

/// The unique constant every reaching definition of `op` writes, if any.
fn constant_of(op: &Operand, rda: &Map<VarId, Set<Def>>, func: &Function) -> Option<i64> {
    let v = op.as_var()?;
    let defs = rda.get(v)?;

    let mut constant = None;
    for def in defs {
        // UNKNOWN means the box may be written outside the function.
        let Def::Inst(id) = def else {
            return None;
        };

        let candidate = match func.inst(id) {
            Some(Instruction::Call { callee, args, .. }) => match CatFn::of(callee) {
                Some(CatFn::New) => args.first(),
                Some(CatFn::Set) => args.get(1),
                // CAT_add, CAT_sub, or values merged in by opaque calls.
                _ => None,
            },
            _ => None,
        };

        let Some(Operand::CInt(k)) = candidate else {
            return None;
        };
        match constant {
            None => constant = Some(*k),
            Some(c) if c != *k => return None,
            Some(_) => (),
        }
    }

    constant
}

fn cat_set(dst: Operand, val: Operand) -> Instruction {
    Instruction::Call {
        lhs: None,
        callee: ext_id("CAT_set"),
        args: vec![dst, val],
    }
}

fn cat_get(lhs: VarId, arg: Operand) -> Instruction {
    Instruction::Call {
        lhs: Some(lhs),
        callee: ext_id("CAT_get"),
        args: vec![arg],
    }
}

// fresh int-typed locals for the CAT_get results pass 1 introduces.
struct FreshLocals {
    used: Set<String>,
    scope: FuncId,
    next: usize,
    created: Set<VarId>,
}

impl FreshLocals {
    fn new(func: &Function, globals: &Set<VarId>) -> Self {
        let used = func
            .params
            .iter()
            .chain(&func.locals)
            .chain(globals)
            .map(|v| v.name().to_owned())
            .collect();
        FreshLocals {
            used,
            scope: func.id.clone(),
            next: 0,
            created: Set::new(),
        }
    }

    fn int_local(&mut self) -> VarId {
        loop {
            let name = format!("_cf{}", self.next);
            self.next += 1;
            if !self.used.contains(&name) {
                let v = var_id(&name, int_ty(), Some(self.scope.clone()));
                self.created.insert(v.clone());
                return v;
            }
        }
    }
}

fn substitute_op(op: &mut Operand, subst: &Map<VarId, i64>) {
    if let Operand::Var(v) = op {
        if let Some(k) = subst.get(v) {
            *op = Operand::CInt(*k);
        }
    }
}

fn substitute_inst(inst: &mut Instruction, subst: &Map<VarId, i64>) {
    use Instruction::*;
    match inst {
        Alloca { .. } | Load { .. } => (),
        Store { op, .. } => substitute_op(op, subst),
        Phi { ops, .. } => {
            for (op, _) in ops {
                substitute_op(op, subst);
            }
        }
        Select { cond, tt, ff, .. } => {
            substitute_op(cond, subst);
            substitute_op(tt, subst);
            substitute_op(ff, subst);
        }
        Call { args, .. } => {
            for op in args {
                substitute_op(op, subst);
            }
        }
    }
}

fn substitute_term(term: &mut Terminal, subst: &Map<VarId, i64>) {
    match term {
        Terminal::Jump(_) | Terminal::Ret(None) => (),
        Terminal::Branch { cond, .. } => substitute_op(cond, subst),
        Terminal::Ret(Some(op)) => substitute_op(op, subst),
    }
}
