//! Combined reaching-definitions, must-alias, and points-to analysis over
//! CAT values.
//!
//! The three lattices are computed simultaneously because they feed each
//! other: points-to sets decide which definition sets a load merges or a
//! store kills, alias classes decide how far a strong update reaches, and
//! opaque calls can extend the classification universe mid-flight.

use std::collections::VecDeque;
use std::fmt;

use tracing::warn;

use crate::commons::Valid;

use super::cat_types::*;
use super::*;

// SECTION: analysis interface

/// The abstract state at one program point: per-value definition sets,
/// must-alias classes, and points-to sets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Env {
    pub rda: Map<VarId, Set<Def>>,
    pub alias: Map<VarId, Set<VarId>>,
    pub points_to: Map<VarId, Set<Pointee>>,
}

impl Env {
    // self = self ⊔ rhs, pointwise set union per key.
    pub fn join_with(&mut self, rhs: &Env) {
        for (x, defs) in &rhs.rda {
            self.rda
                .entry(x.clone())
                .or_default()
                .extend(defs.iter().cloned());
        }
        for (x, aliases) in &rhs.alias {
            self.alias
                .entry(x.clone())
                .or_default()
                .extend(aliases.iter().cloned());
        }
        for (x, pointees) in &rhs.points_to {
            self.points_to
                .entry(x.clone())
                .or_default()
                .extend(pointees.iter().cloned());
        }
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_section(f, "rda", &self.rda)?;
        write_section(f, "alias", &self.alias)?;
        write_section(f, "points-to", &self.points_to)
    }
}

fn write_section<T: fmt::Display>(
    f: &mut fmt::Formatter,
    header: &str,
    map: &Map<VarId, Set<T>>,
) -> fmt::Result {
    let mut first = true;
    for (x, set) in map {
        if set.is_empty() {
            continue;
        }
        if first {
            writeln!(f, "{header}:")?;
            first = false;
        }
        let items = set
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "{x} -> {{{items}}}")?;
    }
    Ok(())
}

/// Per-function analysis context: the classifier result plus IN/OUT states
/// for every instruction and block.  Built fresh for each function, so no
/// state can leak between runs.
pub struct CatAnalysis<'a> {
    pub func: &'a Function,
    pub globals: &'a Set<VarId>,
    pub cfg: Cfg,
    pub types: TypeInfo,
    pub ins: Map<InstId, Env>,
    pub outs: Map<InstId, Env>,
    pub block_in: Map<BbId, Env>,
    pub block_out: Map<BbId, Env>,
    oracle: &'a dyn ModRefOracle,
}

/// Analyze one function of a validated program to a fixed point.
pub fn analyze<'a>(
    program: &'a Valid<Program>,
    func: &FuncId,
    oracle: &'a dyn ModRefOracle,
) -> CatAnalysis<'a> {
    let program = &program.0;
    let f = &program.functions[func];

    let mut analysis = CatAnalysis {
        func: f,
        globals: &program.globals,
        cfg: Cfg::new(f),
        types: collect_type_info(f),
        ins: Map::new(),
        outs: Map::new(),
        block_in: Map::new(),
        block_out: Map::new(),
        oracle,
    };
    analysis.run();
    analysis
}

// SECTION: the worklist fixed point

impl CatAnalysis<'_> {
    fn run(&mut self) {
        let mut worklist: VecDeque<BbId> = self.cfg.roots().cloned().collect();

        while let Some(bb) = worklist.pop_front() {
            if self.transfer_block(&bb) {
                for succ in self.cfg.succ(&bb) {
                    worklist.push_back(succ.clone());
                }
            }
        }
    }

    // run the transfer over one block; true if the block was never analyzed
    // before or its terminator OUT's definition sets changed.
    fn transfer_block(&mut self, bb: &BbId) -> bool {
        let func = self.func;
        let block = &func.body[bb];

        let first_time = !self.block_out.contains_key(bb);
        let old_rda = self.block_out.get(bb).map(|env| env.rda.clone());

        let mut env = if self.cfg.pred(bb).next().is_none() {
            self.seed_entry()
        } else {
            let mut env = Env::default();
            for pred in self.cfg.pred(bb) {
                // unanalyzed predecessors contribute nothing yet.
                if let Some(out) = self.block_out.get(pred) {
                    env.join_with(out);
                }
            }
            env
        };

        self.block_in.insert(bb.clone(), env.clone());

        for (i, inst) in block.insts.iter().enumerate() {
            let id = (bb.clone(), i);
            self.ins.insert(id.clone(), env.clone());
            self.transfer_inst(&id, inst, &mut env);
            self.outs.insert(id, env.clone());
        }

        self.block_out.insert(bb.clone(), env);

        first_time || old_rda.as_ref() != self.block_out.get(bb).map(|env| &env.rda)
    }

    // the state on entry: arguments and globals are defined outside the
    // analyzable region, and every tagged value aliases itself.
    fn seed_entry(&self) -> Env {
        let mut env = Env::default();

        for v in self.func.params.iter().chain(self.globals.iter()) {
            match self.types.check(v) {
                CatType::Data => {
                    env.rda.insert(v.clone(), Set::from([Def::Unknown]));
                }
                CatType::Ptr => {
                    env.points_to.insert(v.clone(), Set::from([Pointee::Unknown]));
                }
                CatType::Other => (),
            }
        }

        for v in self.types.data.iter().chain(self.types.ptrs.iter()) {
            env.alias.insert(v.clone(), Set::from([v.clone()]));
        }

        env
    }
}

// SECTION: transfer functions

fn is_cell(v: &VarId) -> bool {
    v.typ().is_box() || v.typ().is_ptr()
}

fn insert_alias(env: &mut Env, a: &VarId, b: &VarId) {
    env.alias.entry(a.clone()).or_default().insert(b.clone());
    env.alias.entry(b.clone()).or_default().insert(a.clone());
}

// drop `v` out of every class it was in and make it alias only itself.
fn reset_alias_info(v: &VarId, env: &mut Env) {
    for alias in env.alias.get(v).cloned().unwrap_or_default() {
        if let Some(set) = env.alias.get_mut(&alias) {
            set.remove(v);
        }
    }
    env.alias.insert(v.clone(), Set::from([v.clone()]));
}

// symmetrically union `source`'s class into `target`'s.
fn merge_alias_info(source: &VarId, target: &VarId, env: &mut Env) {
    for alias in env.alias.get(source).cloned().unwrap_or_default() {
        insert_alias(env, target, &alias);
    }
}

impl CatAnalysis<'_> {
    fn transfer_inst(&mut self, id: &InstId, inst: &Instruction, env: &mut Env) {
        let in_env = env.clone();
        match inst {
            Instruction::Phi { lhs, ops } if is_cell(lhs) => self.transfer_phi(lhs, ops, env),
            Instruction::Select { lhs, tt, ff, .. } if is_cell(lhs) => {
                self.transfer_select(lhs, tt, ff, &in_env, env)
            }
            Instruction::Alloca { lhs } => self.transfer_alloca(lhs, env),
            Instruction::Store { dst, op } => self.transfer_store(dst, op, env),
            Instruction::Load { lhs, src } => self.transfer_load(lhs, src, &in_env, env),
            Instruction::Call { lhs, callee, args } => {
                self.transfer_call(id, lhs, callee, args, &in_env, env)
            }
            _ => (),
        }
    }

    fn transfer_phi(&self, lhs: &VarId, ops: &[(Operand, BbId)], env: &mut Env) {
        reset_alias_info(lhs, env);
        for (op, pred) in ops {
            let Some(v) = op.as_var() else { continue };
            let Some(pred_out) = self.block_out.get(pred) else {
                continue;
            };
            for alias in pred_out.alias.get(v).cloned().unwrap_or_default() {
                insert_alias(env, lhs, &alias);
            }
        }

        match self.types.check(lhs) {
            CatType::Data => {
                let mut defs = Set::new();
                for (op, pred) in ops {
                    let Some(v) = op.as_var() else { continue };
                    let Some(pred_out) = self.block_out.get(pred) else {
                        continue;
                    };
                    defs.extend(pred_out.rda.get(v).cloned().unwrap_or_default());
                }
                env.rda.insert(lhs.clone(), defs);
            }
            CatType::Ptr => {
                let mut pointees = Set::new();
                for (op, pred) in ops {
                    let Some(v) = op.as_var() else { continue };
                    let Some(pred_out) = self.block_out.get(pred) else {
                        continue;
                    };
                    pointees.extend(pred_out.points_to.get(v).cloned().unwrap_or_default());
                }
                env.points_to.insert(lhs.clone(), pointees);
            }
            CatType::Other => (),
        }
    }

    fn transfer_select(&self, lhs: &VarId, tt: &Operand, ff: &Operand, in_env: &Env, env: &mut Env) {
        reset_alias_info(lhs, env);
        for op in [tt, ff] {
            let Some(v) = op.as_var() else { continue };
            for alias in in_env.alias.get(v).cloned().unwrap_or_default() {
                insert_alias(env, lhs, &alias);
            }
        }

        match self.types.check(lhs) {
            CatType::Data => {
                let mut defs = Set::new();
                for op in [tt, ff] {
                    if let Some(v) = op.as_var() {
                        defs.extend(in_env.rda.get(v).cloned().unwrap_or_default());
                    }
                }
                env.rda.insert(lhs.clone(), defs);
            }
            CatType::Ptr => {
                let mut pointees = Set::new();
                for op in [tt, ff] {
                    if let Some(v) = op.as_var() {
                        pointees.extend(in_env.points_to.get(v).cloned().unwrap_or_default());
                    }
                }
                env.points_to.insert(lhs.clone(), pointees);
            }
            CatType::Other => (),
        }
    }

    fn transfer_alloca(&self, lhs: &VarId, env: &mut Env) {
        reset_alias_info(lhs, env);
        env.points_to.insert(lhs.clone(), Set::new());
    }

    fn transfer_store(&self, dst: &VarId, op: &Operand, env: &mut Env) {
        if self.types.check(dst) != CatType::Ptr {
            warn!("store through `{dst}`: the pointer is not recognized");
            return;
        }
        if let Some(v) = op.as_var() {
            self.set_points_to(dst, Pointee::Var(v.clone()), env);
        }
    }

    fn transfer_load(&self, lhs: &VarId, src: &VarId, in_env: &Env, env: &mut Env) {
        if self.types.check(src) != CatType::Ptr {
            warn!("load from `{src}`: the pointer is not recognized");
            return;
        }

        reset_alias_info(lhs, env);
        let pointed = in_env.points_to.get(src).cloned().unwrap_or_default();
        for q in &pointed {
            if let Pointee::Var(q) = q {
                for alias in in_env.alias.get(q).cloned().unwrap_or_default() {
                    insert_alias(env, lhs, &alias);
                }
            }
        }

        match self.types.check(lhs) {
            CatType::Data => {
                let mut defs = Set::new();
                for q in &pointed {
                    match q {
                        Pointee::Unknown => {
                            defs.insert(Def::Unknown);
                        }
                        Pointee::Var(q) if self.types.check(q) != CatType::Data => {
                            warn!("load into `{lhs}`: `{q}` is not CAT data");
                        }
                        Pointee::Var(q) => {
                            defs.extend(in_env.rda.get(q).cloned().unwrap_or_default());
                        }
                    }
                }
                env.rda.insert(lhs.clone(), defs);
            }
            CatType::Ptr => {
                let mut pointees = Set::new();
                for q in &pointed {
                    match q {
                        Pointee::Unknown => {
                            pointees.insert(Pointee::Unknown);
                        }
                        Pointee::Var(q) if self.types.check(q) != CatType::Ptr => {
                            warn!("load into `{lhs}`: `{q}` is not a CAT pointer");
                        }
                        Pointee::Var(q) => {
                            pointees.extend(in_env.points_to.get(q).cloned().unwrap_or_default());
                        }
                    }
                }
                env.points_to.insert(lhs.clone(), pointees);
            }
            CatType::Other => (),
        }

        // the cell's unknown pointee, if any, is this loaded value from now
        // on: a later store through an alias of `src` must kill `lhs` too.
        if let Some(set) = env.points_to.get_mut(src) {
            set.remove(&Pointee::Unknown);
        }
        self.add_points_to(src, Pointee::Var(lhs.clone()), env);
    }

    fn transfer_call(
        &mut self,
        id: &InstId,
        lhs: &Option<VarId>,
        callee: &ExtId,
        args: &[Operand],
        in_env: &Env,
        env: &mut Env,
    ) {
        match CatFn::of(callee) {
            Some(CatFn::New) => {
                if let Some(lhs) = lhs {
                    reset_alias_info(lhs, env);
                    self.set_def(lhs, Def::Inst(id.clone()), env);
                }
            }
            Some(CatFn::Set | CatFn::Add | CatFn::Sub) => {
                if let Some(x) = args.first().and_then(Operand::as_var) {
                    self.set_def(x, Def::Inst(id.clone()), env);
                }
            }
            Some(CatFn::Get | CatFn::Destroy) => (),
            None if is_exempt(callee) => (),
            None => self.transfer_opaque_call(id, lhs, callee, args, in_env, env),
        }
    }

    fn transfer_opaque_call(
        &mut self,
        id: &InstId,
        lhs: &Option<VarId>,
        callee: &ExtId,
        args: &[Operand],
        in_env: &Env,
        env: &mut Env,
    ) {
        let mut data_passed: Set<Pointee> = Set::new();
        let mut ptrs_passed: Set<VarId> = Set::new();
        for arg in args {
            let Some(v) = arg.as_var() else { continue };
            match self.types.check(v) {
                CatType::Data => {
                    data_passed.insert(Pointee::Var(v.clone()));
                }
                CatType::Ptr => {
                    ptrs_passed.insert(v.clone());
                    data_passed.extend(self.find_possible_cat_data(v, in_env));
                }
                CatType::Other => (),
            }
        }

        // a modified pointer may now refer to any CAT data the callee could
        // reach through the arguments.
        for ptr in &ptrs_passed {
            if self.may_modify(id, callee, ptr) {
                for data in &data_passed {
                    self.add_points_to(ptr, data.clone(), env);
                }
            }
        }

        for data in &data_passed {
            if let Pointee::Var(v) = data {
                if self.may_modify(id, callee, v) {
                    self.set_def(v, Def::Unknown, env);
                }
            }
        }

        // dynamic type collection from the return type.
        if let Some(lhs) = lhs {
            match &*lhs.typ().0 {
                IrType::Box => {
                    self.types.data.insert(lhs.clone());
                }
                IrType::Pointer(_) => {
                    self.types.ptrs.insert(lhs.clone());
                }
                IrType::Int => (),
            }

            match self.types.check(lhs) {
                CatType::Data => {
                    reset_alias_info(lhs, env);
                    let mut defs = Set::new();
                    for data in &data_passed {
                        match data {
                            Pointee::Unknown => {
                                defs.insert(Def::Unknown);
                            }
                            Pointee::Var(d) => {
                                defs.extend(env.rda.get(d).cloned().unwrap_or_default());
                                merge_alias_info(d, lhs, env);
                            }
                        }
                    }
                    env.rda.insert(lhs.clone(), defs);
                }
                CatType::Ptr => {
                    reset_alias_info(lhs, env);
                    let mut pointees = Set::new();
                    for ptr in &ptrs_passed {
                        pointees.extend(env.points_to.get(ptr).cloned().unwrap_or_default());
                        merge_alias_info(ptr, lhs, env);
                    }
                    env.points_to.insert(lhs.clone(), pointees);
                }
                CatType::Other => (),
            }
        }
    }

    fn may_modify(&self, id: &InstId, callee: &ExtId, v: &VarId) -> bool {
        self.oracle.mod_ref(id, callee, v, cell_size(v)).may_modify()
    }

    // all CAT data transitively reachable from `ptr` through pointer chains,
    // preserving UNKNOWN.
    fn find_possible_cat_data(&self, ptr: &VarId, env: &Env) -> Set<Pointee> {
        let mut found = Set::new();
        let mut stack = vec![ptr.clone()];
        let mut visited: Set<VarId> = Set::new();

        while let Some(p) = stack.pop() {
            if !visited.insert(p.clone()) {
                continue;
            }
            for pointed in env.points_to.get(&p).cloned().unwrap_or_default() {
                match pointed {
                    Pointee::Unknown => {
                        found.insert(Pointee::Unknown);
                    }
                    Pointee::Var(v) => match self.types.check(&v) {
                        CatType::Data => {
                            found.insert(Pointee::Var(v));
                        }
                        CatType::Ptr => stack.push(v),
                        CatType::Other => (),
                    },
                }
            }
        }

        found
    }

    // the must-alias class of `v`, recovering a missing entry as {v}.
    fn alias_class(&self, v: &VarId, env: &mut Env) -> Set<VarId> {
        match env.alias.get(v) {
            Some(set) => set.clone(),
            None => {
                warn!("alias entry for `{v}` was not initialized");
                let set = Set::from([v.clone()]);
                env.alias.insert(v.clone(), set.clone());
                set
            }
        }
    }

    // strong update: the whole must-alias class of `v` is now defined by `def`.
    fn set_def(&self, v: &VarId, def: Def, env: &mut Env) {
        for a in self.alias_class(v, env) {
            env.rda.insert(a, Set::from([def.clone()]));
        }
    }

    // strong update: the whole must-alias class of `ptr` now points only to `val`.
    fn set_points_to(&self, ptr: &VarId, val: Pointee, env: &mut Env) {
        for a in self.alias_class(ptr, env) {
            env.points_to.insert(a, Set::from([val.clone()]));
        }
    }

    fn add_points_to(&self, ptr: &VarId, val: Pointee, env: &mut Env) {
        for a in self.alias_class(ptr, env) {
            env.points_to.entry(a).or_default().insert(val.clone());
        }
    }
}

// SECTION: diagnostics

impl CatAnalysis<'_> {
    pub fn dump_type_info(&self) -> String {
        let mut s = format!("Function \"{}\"\n", self.func.id);
        s += "CAT data:\n";
        for v in &self.types.data {
            s += &format!("  {v}\n");
        }
        s += "CAT pointers:\n";
        for v in &self.types.ptrs {
            s += &format!("  {v}\n");
        }
        s
    }

    pub fn dump_rda_info(&self) -> String {
        self.dump_sections(|env| section_lines(&env.rda))
    }

    pub fn dump_points_to_info(&self) -> String {
        self.dump_sections(|env| section_lines(&env.points_to))
    }

    /// Graphviz rendering of the function's CFG, one node per block,
    /// annotated with the definition sets that leave the block.
    pub fn dump_cfg(&self) -> String {
        let fid = &self.func.id;
        let mut graph = format!("digraph {fid} {{\nlabel=\"{fid}\";\nnode [shape=box];\n");

        for (bbid, bb) in &self.func.body {
            let mut lines = vec![format!("{bbid}:")];
            for inst in &bb.insts {
                lines.push(format!("  {inst}"));
            }
            lines.push(format!("  {}", bb.term));
            if let Some(out) = self.block_out.get(bbid) {
                for (v, defs) in &out.rda {
                    if defs.is_empty() {
                        continue;
                    }
                    let defs = defs
                        .iter()
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    lines.push(format!("  {v} <- {{{defs}}}"));
                }
            }
            graph += &format!("  {fid}_{bbid} [label=\"{}\\l\"];\n", lines.join("\\l"));

            for succ in self.cfg.succ(bbid) {
                graph += &format!("  {fid}_{bbid} -> {fid}_{succ};\n");
            }
        }

        graph += "}\n";
        graph
    }

    fn dump_sections(&self, section: impl Fn(&Env) -> String) -> String {
        let mut s = format!("Function \"{}\"\n", self.func.id);
        for (id, env) in &self.ins {
            let Some(inst) = self.func.inst(id) else {
                continue;
            };
            s += &format!("{}.{}: {inst}\n", id.0, id.1);
            s += "in:\n";
            s += &section(env);
            s += "out:\n";
            s += &section(&self.outs[id]);
        }
        s
    }
}

fn section_lines<T: fmt::Display>(map: &Map<VarId, Set<T>>) -> String {
    let mut s = String::new();
    for (x, set) in map {
        if set.is_empty() {
            continue;
        }
        let items = set
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        s += &format!("  {x} -> {{{items}}}\n");
    }
    s
}
