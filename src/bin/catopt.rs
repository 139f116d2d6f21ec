// Optimize a CAT IR program file.

use clap::Parser;

use catopt::middle_end::ir::Program;
use catopt::middle_end::optimization::cat_fold::cat_fold;

// Command-line arguments
#[derive(Parser)]
#[command(version, about)]
struct Args {
    input_file: String,
    output_file: String,
}

pub fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let read = |input_file: &str| {
        String::from_utf8(
            std::fs::read(input_file)
                .unwrap_or_else(|_| panic!("Could not read the input file {}", input_file)),
        )
        .expect("The input file does not contain valid utf-8 text")
    };

    let input_program = read(&args.input_file)
        .parse::<Program>()
        .unwrap()
        .validate()
        .unwrap();

    let output = cat_fold(input_program).0.to_string();

    std::fs::write(&args.output_file, output).unwrap_or_else(|_| {
        panic!(
            "Failed to write the optimized program to the output file: {}",
            args.output_file
        )
    });
}
