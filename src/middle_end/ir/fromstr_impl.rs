//! Parser for the textual IR form.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use pest::error::Error;
use pest::iterators::Pair;
use pest::Parser;

use super::*;

#[derive(pest_derive::Parser)]
#[grammar_inline = r#"
WHITESPACE = _{ " " | "\t" | "\r" | "\n" }
COMMENT = _{ "//" ~ (!NEWLINE ~ ANY)* }

program = { SOI ~ global* ~ function+ ~ EOI }

global = { at_ident ~ ":" ~ typ }

function = { "fn" ~ ident ~ "(" ~ params? ~ ")" ~ "->" ~ fn_ret ~ "{" ~ locals? ~ block+ ~ "}" }
params = { decl ~ ("," ~ decl)* }
locals = { "let" ~ decl ~ ("," ~ decl)* }
decl = { ident ~ ":" ~ typ }
fn_ret = { typ | "_" }

typ = { "&" ~ typ | "int" | "box" }

block = { ident ~ ":" ~ inst* ~ term }

inst = { alloca | load | store | phi | select | call }
alloca = { ident ~ "=" ~ "$alloca" }
load = { ident ~ "=" ~ "$load" ~ var_ref }
store = { "$store" ~ var_ref ~ operand }
phi = { ident ~ "=" ~ "$phi" ~ phi_arg+ }
phi_arg = { "[" ~ operand ~ "," ~ ident ~ "]" }
select = { ident ~ "=" ~ "$select" ~ operand ~ operand ~ operand }
call = { (ident ~ "=")? ~ "$call" ~ ident ~ "(" ~ args? ~ ")" }
args = { operand ~ ("," ~ operand)* }

term = { branch | jump | ret }
branch = { "$branch" ~ operand ~ ident ~ ident }
jump = { "$jump" ~ ident }
ret = { "$ret" ~ ret_op? }
ret_op = { !(ident ~ ":") ~ operand }

operand = { num | at_ident | ident }
var_ref = { at_ident | ident }
num = @{ "-"? ~ ASCII_DIGIT+ }
at_ident = @{ "@" ~ ident }
ident = @{ (ASCII_ALPHA | "_") ~ (ASCII_ALPHANUMERIC | "_" | ".")* }
"#]
struct IrParser;

use derive_more::Display;
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum Errors {
    Parse(Box<Error<Rule>>),
    ContextSensitive(String),
}

impl std::str::FromStr for Program {
    type Err = Errors;

    fn from_str(prog_str: &str) -> Result<Self, Self::Err> {
        match IrParser::parse(Rule::program, prog_str) {
            Ok(mut parse_tree) => create_program(parse_tree.next().unwrap()),
            Err(err) => Err(Errors::Parse(Box::new(err))),
        }
    }
}

fn err<T>(msg: String) -> Result<T, Errors> {
    Err(Errors::ContextSensitive(msg))
}

// SECTION: program structure

fn create_program(parse_tree: Pair<Rule>) -> Result<Program, Errors> {
    let mut globals: Map<String, VarId> = Map::new();
    let mut functions: Map<FuncId, Function> = Map::new();

    for pair in parse_tree.into_inner() {
        match pair.as_rule() {
            Rule::global => {
                let mut inner = pair.into_inner();
                let name = inner.next().unwrap().as_str().trim_start_matches('@');
                let typ = parse_type(inner.next().unwrap());
                if globals
                    .insert(name.to_owned(), var_id(name, typ, None))
                    .is_some()
                {
                    return err(format!("duplicate global `@{name}`"));
                }
            }
            Rule::function => {
                let f = create_function(pair, &globals)?;
                if functions.contains_key(&f.id) {
                    return err(format!("duplicate function `{}`", f.id));
                }
                functions.insert(f.id.clone(), f);
            }
            Rule::EOI => (),
            _ => unreachable!("not a top-level item: {:#?}", pair),
        }
    }

    Ok(Program {
        globals: globals.into_values().collect(),
        functions,
    })
}

fn create_function(pair: Pair<Rule>, globals: &Map<String, VarId>) -> Result<Function, Errors> {
    let mut inner = pair.into_inner();
    let fid = func_id(inner.next().unwrap().as_str());

    let mut params = Vec::new();
    let mut ret_ty = None;
    let mut locals: Set<VarId> = Set::new();
    let mut scope = FnScope {
        globals,
        vars: Map::new(),
    };
    let mut body: Map<BbId, BasicBlock> = Map::new();

    // declarations first, so that block parsing can resolve every name.
    let pairs: Vec<Pair<Rule>> = inner.collect();
    for p in &pairs {
        match p.as_rule() {
            Rule::params => {
                for decl in p.clone().into_inner() {
                    let v = parse_decl(decl, &fid, &mut scope)?;
                    params.push(v);
                }
            }
            Rule::fn_ret => ret_ty = p.clone().into_inner().next().map(parse_type),
            Rule::locals => {
                for decl in p.clone().into_inner() {
                    let v = parse_decl(decl, &fid, &mut scope)?;
                    locals.insert(v);
                }
            }
            Rule::block => (),
            _ => unreachable!("not a function item: {:#?}", p),
        }
    }

    for p in pairs {
        if p.as_rule() != Rule::block {
            continue;
        }
        let bb = create_block(p, &scope)?;
        if body.contains_key(&bb.id) {
            return err(format!("duplicate block `{}` in `{fid}`", bb.id));
        }
        body.insert(bb.id.clone(), bb);
    }

    Ok(Function {
        id: fid,
        params,
        ret_ty,
        locals,
        body,
    })
}

fn parse_decl(pair: Pair<Rule>, fid: &FuncId, scope: &mut FnScope) -> Result<VarId, Errors> {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str();
    let typ = parse_type(inner.next().unwrap());
    let v = var_id(name, typ, Some(fid.clone()));
    if scope.vars.insert(name.to_owned(), v.clone()).is_some() {
        return err(format!("duplicate declaration of `{name}` in `{fid}`"));
    }
    Ok(v)
}

fn parse_type(pair: Pair<Rule>) -> Type {
    let s = pair.as_str().trim();
    let base = s.trim_start_matches('&');
    let mut typ = match base {
        "int" => int_ty(),
        "box" => box_ty(),
        _ => unreachable!("not a type: {s}"),
    };
    for _ in 0..s.len() - base.len() {
        typ = ptr_ty(typ);
    }
    typ
}

// SECTION: blocks and instructions

struct FnScope<'a> {
    globals: &'a Map<String, VarId>,
    vars: Map<String, VarId>,
}

impl FnScope<'_> {
    // resolve a plain identifier: function scope first, then globals.
    fn resolve(&self, name: &str) -> Result<VarId, Errors> {
        match self.vars.get(name).or_else(|| self.globals.get(name)) {
            Some(v) => Ok(v.clone()),
            None => err(format!("undeclared variable `{name}`")),
        }
    }

    fn resolve_global(&self, name: &str) -> Result<VarId, Errors> {
        let name = name.trim_start_matches('@');
        match self.globals.get(name) {
            Some(v) => Ok(v.clone()),
            None => err(format!("undeclared global `@{name}`")),
        }
    }

    // assignment targets must be declared in the function itself.
    fn resolve_lhs(&self, name: &str) -> Result<VarId, Errors> {
        match self.vars.get(name) {
            Some(v) => Ok(v.clone()),
            None => err(format!("assignment to undeclared variable `{name}`")),
        }
    }
}

fn create_block(pair: Pair<Rule>, scope: &FnScope) -> Result<BasicBlock, Errors> {
    let mut inner = pair.into_inner();
    let id = bb_id(inner.next().unwrap().as_str());

    let mut insts = Vec::new();
    let mut term = None;
    for p in inner {
        match p.as_rule() {
            Rule::inst => insts.push(parse_inst(p, scope)?),
            Rule::term => term = Some(parse_term(p, scope)?),
            _ => unreachable!("not a block item: {:#?}", p),
        }
    }

    Ok(BasicBlock {
        id,
        insts,
        term: term.unwrap(),
    })
}

fn parse_inst(pair: Pair<Rule>, scope: &FnScope) -> Result<Instruction, Errors> {
    let pair = pair.into_inner().next().unwrap();
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();

    let inst = match rule {
        Rule::alloca => Instruction::Alloca {
            lhs: scope.resolve_lhs(inner.next().unwrap().as_str())?,
        },
        Rule::load => Instruction::Load {
            lhs: scope.resolve_lhs(inner.next().unwrap().as_str())?,
            src: parse_var_ref(inner.next().unwrap(), scope)?,
        },
        Rule::store => Instruction::Store {
            dst: parse_var_ref(inner.next().unwrap(), scope)?,
            op: parse_operand(inner.next().unwrap(), scope)?,
        },
        Rule::phi => {
            let lhs = scope.resolve_lhs(inner.next().unwrap().as_str())?;
            let mut ops = Vec::new();
            for arg in inner {
                let mut arg = arg.into_inner();
                let op = parse_operand(arg.next().unwrap(), scope)?;
                let bb = bb_id(arg.next().unwrap().as_str());
                ops.push((op, bb));
            }
            Instruction::Phi { lhs, ops }
        }
        Rule::select => Instruction::Select {
            lhs: scope.resolve_lhs(inner.next().unwrap().as_str())?,
            cond: parse_operand(inner.next().unwrap(), scope)?,
            tt: parse_operand(inner.next().unwrap(), scope)?,
            ff: parse_operand(inner.next().unwrap(), scope)?,
        },
        Rule::call => {
            let pairs: Vec<Pair<Rule>> = inner.collect();
            // `lhs = $call f(..)` yields [ident, ident, args?]; without the
            // assignment the leading ident is the callee.
            let has_lhs = pairs.iter().filter(|p| p.as_rule() == Rule::ident).count() == 2;
            let mut pairs = pairs.into_iter();
            let lhs = if has_lhs {
                Some(scope.resolve_lhs(pairs.next().unwrap().as_str())?)
            } else {
                None
            };
            let callee = ext_id(pairs.next().unwrap().as_str());
            let mut args = Vec::new();
            if let Some(arg_pairs) = pairs.next() {
                for arg in arg_pairs.into_inner() {
                    args.push(parse_operand(arg, scope)?);
                }
            }
            Instruction::Call { lhs, callee, args }
        }
        _ => unreachable!("not an instruction: {rule:?}"),
    };

    Ok(inst)
}

fn parse_term(pair: Pair<Rule>, scope: &FnScope) -> Result<Terminal, Errors> {
    let pair = pair.into_inner().next().unwrap();
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();

    let term = match rule {
        Rule::jump => Terminal::Jump(bb_id(inner.next().unwrap().as_str())),
        Rule::branch => Terminal::Branch {
            cond: parse_operand(inner.next().unwrap(), scope)?,
            tt: bb_id(inner.next().unwrap().as_str()),
            ff: bb_id(inner.next().unwrap().as_str()),
        },
        Rule::ret => match inner.next() {
            Some(op) => Terminal::Ret(Some(parse_operand(
                op.into_inner().next().unwrap(),
                scope,
            )?)),
            None => Terminal::Ret(None),
        },
        _ => unreachable!("not a terminal: {rule:?}"),
    };

    Ok(term)
}

fn parse_operand(pair: Pair<Rule>, scope: &FnScope) -> Result<Operand, Errors> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::num => match inner.as_str().parse::<i64>() {
            Ok(n) => Ok(Operand::CInt(n)),
            Err(_) => err(format!("integer literal out of range: {}", inner.as_str())),
        },
        Rule::at_ident => Ok(Operand::Var(scope.resolve_global(inner.as_str())?)),
        Rule::ident => Ok(Operand::Var(scope.resolve(inner.as_str())?)),
        _ => unreachable!("not an operand: {:#?}", inner),
    }
}

fn parse_var_ref(pair: Pair<Rule>, scope: &FnScope) -> Result<VarId, Errors> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::at_ident => scope.resolve_global(inner.as_str()),
        Rule::ident => scope.resolve(inner.as_str()),
        _ => unreachable!("not a variable reference: {:#?}", inner),
    }
}
