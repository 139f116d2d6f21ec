use collapse::*;

use crate::commons::Valid;
use crate::middle_end::ir::Program;

mod cat_fold;

// Check if the input program optimizes to the expected output program under
// the given pass.
fn optimizes_to(pass: fn(Valid<Program>) -> Valid<Program>, input: &str, expected: &str) {
    // parse & sanitize both sides so only real differences show up
    let input = input.parse::<Program>().unwrap().validate().unwrap();
    let expected = expected
        .parse::<Program>()
        .unwrap()
        .validate()
        .unwrap()
        .0
        .to_string();

    let actual = pass(input).0.to_string();

    collapsed_eq!(&actual, &expected);
}

// Check that the pass leaves the program alone.
fn unchanged_by(pass: fn(Valid<Program>) -> Valid<Program>, input: &str) {
    optimizes_to(pass, input, input);
}
