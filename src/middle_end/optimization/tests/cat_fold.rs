use super::*;
use crate::middle_end::analysis::{ConservativeOracle, InstId, ModRef, ModRefOracle};
use crate::middle_end::ir::*;
use crate::middle_end::optimization::cat_fold::*;

struct NoEffectOracle;

impl ModRefOracle for NoEffectOracle {
    fn mod_ref(&self, _call: &InstId, _callee: &ExtId, _ptr: &VarId, _size: u64) -> ModRef {
        ModRef::NoModRef
    }
}

fn no_effect_fold(program: Valid<Program>) -> Valid<Program> {
    cat_fold_with(program, &NoEffectOracle)
}

#[test]
fn fold_two_constants() {
    optimizes_to(
        cat_fold,
        r#"
    fn main() -> int {
    let a:box, b:box, r:box, v:int
    entry:
      a = $call CAT_new(3)
      b = $call CAT_new(4)
      r = $call CAT_new(0)
      $call CAT_add(r, a, b)
      v = $call CAT_get(r)
      $ret v
    }
    "#,
        r#"
    fn main() -> int {
    let a:box, b:box, r:box, v:int
    entry:
      a = $call CAT_new(3)
      b = $call CAT_new(4)
      r = $call CAT_new(0)
      $call CAT_set(r, 7)
      $ret 7
    }
    "#,
    );
}

#[test]
fn new_then_get_propagates() {
    optimizes_to(
        cat_fold,
        r#"
    fn main() -> int {
    let a:box, v:int
    entry:
      a = $call CAT_new(42)
      v = $call CAT_get(a)
      $ret v
    }
    "#,
        r#"
    fn main() -> int {
    let a:box, v:int
    entry:
      a = $call CAT_new(42)
      $ret 42
    }
    "#,
    );
}

#[test]
fn no_cat_calls_unchanged() {
    unchanged_by(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let p:&int, t:int
    entry:
      p = $alloca
      $store p c
      t = $load p
      $ret t
    }
    "#,
    );
}

#[test]
fn phi_disagreement_blocks_propagation() {
    unchanged_by(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let x:box, t:int
    entry:
      x = $call CAT_new(0)
      $branch c left right
    left:
      $call CAT_set(x, 1)
      $jump merge
    right:
      $call CAT_set(x, 2)
      $jump merge
    merge:
      t = $call CAT_get(x)
      $ret t
    }
    "#,
    );
}

#[test]
fn phi_agreement_propagates() {
    optimizes_to(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let x:box, t:int
    entry:
      x = $call CAT_new(0)
      $branch c left right
    left:
      $call CAT_set(x, 5)
      $jump merge
    right:
      $call CAT_set(x, 5)
      $jump merge
    merge:
      t = $call CAT_get(x)
      $ret t
    }
    "#,
        r#"
    fn main(c:int) -> int {
    let x:box, t:int
    entry:
      x = $call CAT_new(0)
      $branch c left right
    left:
      $call CAT_set(x, 5)
      $jump merge
    right:
      $call CAT_set(x, 5)
      $jump merge
    merge:
      $ret 5
    }
    "#,
    );
}

#[test]
fn phi_of_equal_news_propagates() {
    optimizes_to(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let x:box, y:box, z:box, t:int
    entry:
      x = $call CAT_new(5)
      y = $call CAT_new(5)
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
        r#"
    fn main(c:int) -> int {
    let x:box, y:box, z:box, t:int
    entry:
      x = $call CAT_new(5)
      y = $call CAT_new(5)
      $branch c left right
    left:
      $jump merge
    right:
      $jump merge
    merge:
      z = $phi [x, left] [y, right]
      $ret 5
    }
    "#,
    );
}

#[test]
fn pointer_escape_blocks_propagation() {
    unchanged_by(
        cat_fold,
        r#"
    fn main() -> int {
    let a:box, p:&box, v:int
    entry:
      a = $call CAT_new(8)
      p = $alloca
      $store p a
      $call escape(p)
      v = $call CAT_get(a)
      $ret v
    }
    "#,
    );
}

#[test]
fn precise_oracle_enables_propagation() {
    optimizes_to(
        no_effect_fold,
        r#"
    fn main() -> int {
    let a:box, p:&box, v:int
    entry:
      a = $call CAT_new(8)
      p = $alloca
      $store p a
      $call escape(p)
      v = $call CAT_get(a)
      $ret v
    }
    "#,
        r#"
    fn main() -> int {
    let a:box, p:&box, v:int
    entry:
      a = $call CAT_new(8)
      p = $alloca
      $store p a
      $call escape(p)
      $ret 8
    }
    "#,
    );
}

#[test]
fn self_subtraction_is_zero() {
    optimizes_to(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let x:box, d:box, t:int
    entry:
      x = $call CAT_new(0)
      $call CAT_set(x, c)
      d = $call CAT_new(0)
      $call CAT_sub(d, x, x)
      t = $call CAT_get(d)
      $ret t
    }
    "#,
        r#"
    fn main(c:int) -> int {
    let x:box, d:box, t:int
    entry:
      x = $call CAT_new(0)
      $call CAT_set(x, c)
      d = $call CAT_new(0)
      $call CAT_set(d, 0)
      $ret 0
    }
    "#,
    );
}

#[test]
fn zero_add_right_becomes_get() {
    optimizes_to(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let y:box, k:box, d:box, t:int
    entry:
      y = $call CAT_new(0)
      $call CAT_set(y, c)
      k = $call CAT_new(0)
      d = $call CAT_new(0)
      $call CAT_add(d, y, k)
      t = $call CAT_get(d)
      $ret t
    }
    "#,
        r#"
    fn main(c:int) -> int {
    let _cf0:int, y:box, k:box, d:box, t:int
    entry:
      y = $call CAT_new(0)
      $call CAT_set(y, c)
      k = $call CAT_new(0)
      d = $call CAT_new(0)
      _cf0 = $call CAT_get(y)
      $call CAT_set(d, _cf0)
      t = $call CAT_get(d)
      $ret t
    }
    "#,
    );
}

#[test]
fn zero_add_left_becomes_get() {
    optimizes_to(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let y:box, k:box, d:box, t:int
    entry:
      y = $call CAT_new(0)
      $call CAT_set(y, c)
      k = $call CAT_new(0)
      d = $call CAT_new(0)
      $call CAT_add(d, k, y)
      t = $call CAT_get(d)
      $ret t
    }
    "#,
        r#"
    fn main(c:int) -> int {
    let _cf0:int, y:box, k:box, d:box, t:int
    entry:
      y = $call CAT_new(0)
      $call CAT_set(y, c)
      k = $call CAT_new(0)
      d = $call CAT_new(0)
      _cf0 = $call CAT_get(y)
      $call CAT_set(d, _cf0)
      t = $call CAT_get(d)
      $ret t
    }
    "#,
    );
}

#[test]
fn zero_sub_right_becomes_get() {
    optimizes_to(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let y:box, k:box, d:box, t:int
    entry:
      y = $call CAT_new(0)
      $call CAT_set(y, c)
      k = $call CAT_new(0)
      d = $call CAT_new(0)
      $call CAT_sub(d, y, k)
      t = $call CAT_get(d)
      $ret t
    }
    "#,
        r#"
    fn main(c:int) -> int {
    let _cf0:int, y:box, k:box, d:box, t:int
    entry:
      y = $call CAT_new(0)
      $call CAT_set(y, c)
      k = $call CAT_new(0)
      d = $call CAT_new(0)
      _cf0 = $call CAT_get(y)
      $call CAT_set(d, _cf0)
      t = $call CAT_get(d)
      $ret t
    }
    "#,
    );
}

#[test]
fn zero_sub_left_is_not_simplified() {
    // 0 - y would need a negation of a non-constant, so it stays.
    unchanged_by(
        cat_fold,
        r#"
    fn main(c:int) -> int {
    let y:box, k:box, d:box, t:int
    entry:
      y = $call CAT_new(0)
      $call CAT_set(y, c)
      k = $call CAT_new(0)
      d = $call CAT_new(0)
      $call CAT_sub(d, k, y)
      t = $call CAT_get(d)
      $ret t
    }
    "#,
    );
}

#[test]
fn load_forwards_constant_through_cell() {
    optimizes_to(
        cat_fold,
        r#"
    fn main() -> int {
    let a:box, p:&box, b:box, v:int
    entry:
      a = $call CAT_new(9)
      p = $alloca
      $store p a
      b = $load p
      v = $call CAT_get(b)
      $ret v
    }
    "#,
        r#"
    fn main() -> int {
    let a:box, p:&box, b:box, v:int
    entry:
      a = $call CAT_new(9)
      p = $alloca
      $store p a
      b = $load p
      $ret 9
    }
    "#,
    );
}

#[test]
fn set_through_alias_updates_class() {
    optimizes_to(
        cat_fold,
        r#"
    fn main() -> int {
    let a:box, p:&box, b:box, v:int
    entry:
      a = $call CAT_new(1)
      p = $alloca
      $store p a
      b = $load p
      $call CAT_set(b, 3)
      v = $call CAT_get(a)
      $ret v
    }
    "#,
        r#"
    fn main() -> int {
    let a:box, p:&box, b:box, v:int
    entry:
      a = $call CAT_new(1)
      p = $alloca
      $store p a
      b = $load p
      $call CAT_set(b, 3)
      $ret 3
    }
    "#,
    );
}

#[test]
fn optimizer_is_idempotent() {
    let input = r#"
    fn main() -> int {
    let a:box, b:box, r:box, v:int
    entry:
      a = $call CAT_new(3)
      b = $call CAT_new(4)
      r = $call CAT_new(0)
      $call CAT_add(r, a, b)
      v = $call CAT_get(r)
      $ret v
    }
    "#;
    let once = cat_fold(input.parse::<Program>().unwrap().validate().unwrap());

    let (again, changed) = run_once(once.clone(), &ConservativeOracle);
    assert!(!changed, "a fixed point must admit no further deletions");
    assert_eq!(once.0.to_string(), again.0.to_string());
}
