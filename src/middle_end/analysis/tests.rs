// General analysis tests

use pretty_assertions::assert_eq;

use crate::commons::Valid;

use super::cat_defs::*;
use super::cat_types::*;
use super::*;

fn parse(input: &str) -> Valid<Program> {
    input.parse::<Program>().unwrap().validate().unwrap()
}

fn main_var(name: &str, typ: Type) -> VarId {
    var_id(name, typ, Some(func_id("main")))
}

fn def(bb: &str, i: usize) -> Def {
    Def::Inst((bb_id(bb), i))
}

fn analyze_main<'a>(program: &'a Valid<Program>, oracle: &'a dyn ModRefOracle) -> CatAnalysis<'a> {
    analyze(program, &func_id("main"), oracle)
}

// alias classes must stay reflexive and symmetric at every program point.
fn assert_alias_invariants(analysis: &CatAnalysis) {
    for env in analysis.ins.values().chain(analysis.outs.values()) {
        for (x, aliases) in &env.alias {
            if !aliases.is_empty() {
                assert!(aliases.contains(x), "{x} missing from its own alias class");
            }
            for y in aliases {
                assert!(
                    env.alias.get(y).is_some_and(|s| s.contains(x)),
                    "asymmetric alias between {x} and {y}"
                );
            }
        }
    }
}

struct NoEffectOracle;

impl ModRefOracle for NoEffectOracle {
    fn mod_ref(&self, _call: &InstId, _callee: &ExtId, _ptr: &VarId, _size: u64) -> ModRef {
        ModRef::NoModRef
    }
}

#[test]
fn classify_boxes_and_pointers() {
    let p = parse(
        r#"
    fn main() -> int {
    let a:box, p:&box, q:&&box, b:box, t:int
    entry:
      a = $call CAT_new(3)
      p = $alloca
      $store p a
      q = $alloca
      $store q p
      b = $load p
      t = $call CAT_get(b)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);

    assert_eq!(analysis.types.check(&main_var("a", box_ty())), CatType::Data);
    assert_eq!(analysis.types.check(&main_var("b", box_ty())), CatType::Data);
    assert_eq!(
        analysis.types.check(&main_var("p", ptr_ty(box_ty()))),
        CatType::Ptr
    );
    assert_eq!(
        analysis.types.check(&main_var("q", ptr_ty(ptr_ty(box_ty())))),
        CatType::Ptr
    );
    assert_eq!(analysis.types.check(&main_var("t", int_ty())), CatType::Other);

    assert_alias_invariants(&analysis);
}

#[test]
fn new_defines_box() {
    let p = parse(
        r#"
    fn main() -> int {
    let a:box, t:int
    entry:
      a = $call CAT_new(3)
      t = $call CAT_get(a)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let a = main_var("a", box_ty());

    assert_eq!(
        analysis.ins[&(bb_id("entry"), 1)].rda[&a],
        Set::from([def("entry", 0)])
    );
    assert_alias_invariants(&analysis);
}

#[test]
fn arguments_are_defined_outside() {
    let p = parse(
        r#"
    fn main(a:box) -> int {
    let t:int
    entry:
      t = $call CAT_get(a)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let a = main_var("a", box_ty());

    assert_eq!(
        analysis.ins[&(bb_id("entry"), 0)].rda[&a],
        Set::from([Def::Unknown])
    );
}

#[test]
fn phi_merges_definitions_per_edge() {
    let p = parse(
        r#"
    fn main(c:int) -> int {
    let x:box, y:box, z:box, t:int
    entry:
      x = $call CAT_new(1)
      y = $call CAT_new(2)
      $branch c left right
    left:
      $jump merge
    right:
      $jump merge
    merge:
      z = $phi [x, left] [y, right]
      t = $call CAT_get(z)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let z = main_var("z", box_ty());

    assert_eq!(
        analysis.ins[&(bb_id("merge"), 1)].rda[&z],
        Set::from([def("entry", 0), def("entry", 1)])
    );
    assert_alias_invariants(&analysis);
}

#[test]
fn select_merges_both_arms() {
    let p = parse(
        r#"
    fn main(c:int) -> int {
    let x:box, y:box, z:box, t:int
    entry:
      x = $call CAT_new(1)
      y = $call CAT_new(2)
      z = $select c x y
      t = $call CAT_get(z)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let (x, y, z) = (
        main_var("x", box_ty()),
        main_var("y", box_ty()),
        main_var("z", box_ty()),
    );

    let env = &analysis.ins[&(bb_id("entry"), 3)];
    assert_eq!(env.rda[&z], Set::from([def("entry", 0), def("entry", 1)]));
    assert!(env.alias[&z].contains(&x) && env.alias[&z].contains(&y));
    assert_alias_invariants(&analysis);
}

#[test]
fn store_is_a_strong_update_over_the_class() {
    let p = parse(
        r#"
    fn main() -> int {
    let a:box, b:box, p:&box, v:int
    entry:
      a = $call CAT_new(1)
      b = $call CAT_new(2)
      p = $alloca
      $store p a
      $store p b
      v = $call CAT_get(a)
      $ret v
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let (b, p) = (main_var("b", box_ty()), main_var("p", ptr_ty(box_ty())));

    // the second store replaces the cell's contents outright.
    assert_eq!(
        analysis.outs[&(bb_id("entry"), 4)].points_to[&p],
        Set::from([Pointee::Var(b)])
    );
}

#[test]
fn load_delegates_unknown_pointee() {
    let p = parse(
        r#"
    fn main(p:&box) -> int {
    let x:box, t:int
    entry:
      x = $load p
      t = $call CAT_get(x)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let x = main_var("x", box_ty());
    let p_var = main_var("p", ptr_ty(box_ty()));

    let out = &analysis.outs[&(bb_id("entry"), 0)];
    // the unknown pointee is replaced by the loaded value itself.
    assert_eq!(out.points_to[&p_var], Set::from([Pointee::Var(x.clone())]));
    assert_eq!(out.rda[&x], Set::from([Def::Unknown]));
}

#[test]
fn opaque_call_clobbers_reachable_boxes() {
    let p = parse(
        r#"
    fn main() -> int {
    let a:box, p:&box, t:int
    entry:
      a = $call CAT_new(5)
      p = $alloca
      $store p a
      $call escape(p)
      t = $call CAT_get(a)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let a = main_var("a", box_ty());

    assert_eq!(
        analysis.ins[&(bb_id("entry"), 4)].rda[&a],
        Set::from([Def::Unknown])
    );
}

#[test]
fn precise_oracle_preserves_definitions() {
    let p = parse(
        r#"
    fn main() -> int {
    let a:box, p:&box, t:int
    entry:
      a = $call CAT_new(5)
      p = $alloca
      $store p a
      $call escape(p)
      t = $call CAT_get(a)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &NoEffectOracle);
    let a = main_var("a", box_ty());

    assert_eq!(
        analysis.ins[&(bb_id("entry"), 4)].rda[&a],
        Set::from([def("entry", 0)])
    );
}

#[test]
fn exempt_calls_have_no_opaque_effect() {
    let p = parse(
        r#"
    fn main() -> int {
    let a:box, t:int
    entry:
      a = $call CAT_new(5)
      $call printf(a)
      t = $call CAT_get(a)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let a = main_var("a", box_ty());

    assert_eq!(
        analysis.ins[&(bb_id("entry"), 2)].rda[&a],
        Set::from([def("entry", 0)])
    );
}

#[test]
fn opaque_return_classified_dynamically() {
    let p = parse(
        r#"
    fn main(a:box) -> int {
    let b:box, t:int
    entry:
      t = $call CAT_get(a)
      b = $call mystery(a)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let (a, b) = (main_var("a", box_ty()), main_var("b", box_ty()));

    // `b` is never touched by a CAT call, yet its box-typed result joins
    // the data universe during the transfer.
    assert_eq!(analysis.types.check(&b), CatType::Data);

    let out = &analysis.outs[&(bb_id("entry"), 1)];
    assert_eq!(out.rda[&b], Set::from([Def::Unknown]));
    assert!(out.alias[&b].contains(&a));
    assert_alias_invariants(&analysis);
}

#[test]
fn loop_reaches_fixed_point() {
    let p = parse(
        r#"
    fn main(c:int) -> int {
    let x:box, t:int
    entry:
      x = $call CAT_new(0)
      $jump head
    head:
      $branch c body exit
    body:
      $call CAT_set(x, 1)
      $jump head
    exit:
      t = $call CAT_get(x)
      $ret t
    }
    "#,
    );
    let analysis = analyze_main(&p, &ConservativeOracle);
    let x = main_var("x", box_ty());

    // both the initial definition and the loop body's reach the exit.
    assert_eq!(
        analysis.block_in[&bb_id("exit")].rda[&x],
        Set::from([def("entry", 0), def("body", 0)])
    );
    assert_eq!(
        analysis.block_in[&bb_id("head")].rda[&x],
        Set::from([def("entry", 0), def("body", 0)])
    );
}
