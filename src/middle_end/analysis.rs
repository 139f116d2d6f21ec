//! Static analysis of CAT IR programs.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt;

use super::ir::*;

pub mod cat_defs;
pub mod cat_types;

#[cfg(test)]
mod tests;

/// Instruction IDs: this is just a combination of the basic block ID and the
/// index of the instruction in the block.
pub type InstId = (BbId, usize);

/// A reaching-definition token: the call that wrote a box, or `Unknown` for
/// writes outside the analyzable region.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Def {
    Unknown,
    Inst(InstId),
}

impl fmt::Display for Def {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Def::Unknown => write!(f, "UNKNOWN"),
            Def::Inst((bb, n)) => write!(f, "{bb}.{n}"),
        }
    }
}

/// A points-to token: a value a pointer may refer to, or `Unknown` for
/// pointees outside the analyzable region.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Pointee {
    Unknown,
    Var(VarId),
}

impl fmt::Display for Pointee {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Pointee::Unknown => write!(f, "UNKNOWN"),
            Pointee::Var(v) => write!(f, "{v}"),
        }
    }
}

/// The control-flow graph *for a function*, abstracted so that we can easily
/// get successors and predecessors of a block.
#[derive(Clone, Debug)]
pub struct Cfg {
    pub entry: BbId,
    succ_edges: Map<BbId, Set<BbId>>,
    pred_edges: Map<BbId, Set<BbId>>,
}

impl Cfg {
    // construct a Cfg from the given function's basic blocks.
    pub fn new(function: &Function) -> Self {
        let mut succ_edges: Map<BbId, Set<BbId>> = Map::new();
        let mut pred_edges: Map<BbId, Set<BbId>> = Map::new();

        for bbid in function.body.keys() {
            succ_edges.insert(bbid.clone(), Set::new());
            pred_edges.insert(bbid.clone(), Set::new());
        }

        let mut insert_edge = |from: &BbId, to: &BbId| {
            succ_edges.get_mut(from).unwrap().insert(to.clone());
            pred_edges.get_mut(to).unwrap().insert(from.clone());
        };

        for (bbid, bb) in &function.body {
            match &bb.term {
                Terminal::Branch { cond: _, tt, ff } => {
                    insert_edge(bbid, tt);
                    insert_edge(bbid, ff);
                }
                Terminal::Jump(next_bb) => insert_edge(bbid, next_bb),
                Terminal::Ret(_) => (),
            }
        }

        Cfg {
            entry: bb_id("entry"),
            succ_edges,
            pred_edges,
        }
    }

    // an iterator over the successor edges of bb.
    pub fn succ(&self, bb: &BbId) -> impl Iterator<Item = &BbId> {
        self.succ_edges[bb].iter()
    }

    // an iterator over the predecessor edges of bb.
    pub fn pred(&self, bb: &BbId) -> impl Iterator<Item = &BbId> {
        self.pred_edges[bb].iter()
    }

    // the blocks with no predecessors; the worklist starts from these.
    pub fn roots(&self) -> impl Iterator<Item = &BbId> {
        self.pred_edges
            .iter()
            .filter(|(_, preds)| preds.is_empty())
            .map(|(bb, _)| bb)
    }
}

// SECTION: the mod-ref oracle for opaque calls

use derive_more::Display;

/// What an opaque call may do to the memory behind a value.
#[derive(Copy, Clone, Debug, Display, Eq, PartialEq)]
pub enum ModRef {
    NoModRef,
    Ref,
    Mod,
    ModRef,
    MustMod,
}

impl ModRef {
    pub fn may_modify(self) -> bool {
        matches!(self, ModRef::Mod | ModRef::ModRef | ModRef::MustMod)
    }
}

/// Answers "may this call modify the memory this value refers to?".  The
/// host compiler supplies the real implementation; `ConservativeOracle` is
/// the sound default.
pub trait ModRefOracle {
    fn mod_ref(&self, call: &InstId, callee: &ExtId, ptr: &VarId, size: u64) -> ModRef;
}

/// Assumes every opaque call may modify everything passed to it.
pub struct ConservativeOracle;

impl ModRefOracle for ConservativeOracle {
    fn mod_ref(&self, _call: &InstId, _callee: &ExtId, _ptr: &VarId, _size: u64) -> ModRef {
        ModRef::ModRef
    }
}

// bytes of the memory a value lets a callee reach directly: the pointee for
// a pointer, the boxed payload for a box.
pub fn cell_size(v: &VarId) -> u64 {
    match v.typ().pointee() {
        Some(inner) => inner.store_size(),
        None => v.typ().store_size(),
    }
}
