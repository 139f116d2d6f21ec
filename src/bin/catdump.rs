// Diagnostic dumps over CAT IR programs.

use clap::Parser;
use std::str::FromStr;

use catopt::commons::Valid;
use catopt::middle_end::analysis::{cat_defs, ConservativeOracle};
use catopt::middle_end::ir::Program;

#[derive(Clone, Copy)]
struct Dump(fn(Valid<Program>) -> String);

impl Dump {
    fn run(&self, p: Valid<Program>) -> String {
        self.0(p)
    }
}

impl FromStr for Dump {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn per_function(
            p: Valid<Program>,
            section: fn(&cat_defs::CatAnalysis) -> String,
        ) -> String {
            let mut out = String::new();
            for id in p.0.functions.keys() {
                let analysis = cat_defs::analyze(&p, id, &ConservativeOracle);
                out += &section(&analysis);
                out += "\n";
            }
            out
        }

        fn types_dump(p: Valid<Program>) -> String {
            per_function(p, |a| a.dump_type_info())
        }

        fn rda_dump(p: Valid<Program>) -> String {
            per_function(p, |a| a.dump_rda_info())
        }

        fn points_to_dump(p: Valid<Program>) -> String {
            per_function(p, |a| a.dump_points_to_info())
        }

        fn cfg_dump(p: Valid<Program>) -> String {
            per_function(p, |a| a.dump_cfg())
        }

        let dump = match s {
            "types" => Dump(types_dump),
            "rda" => Dump(rda_dump),
            "points-to" => Dump(points_to_dump),
            "cfg" => Dump(cfg_dump),
            _ => return Err(format!("unknown dump kind: {s}")),
        };

        Ok(dump)
    }
}

// Command-line arguments
#[derive(Parser)]
#[command(version, about)]
struct Args {
    dump: Dump,
    input_file: String,
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

    print!("{}", args.dump.run(input_program));
}
