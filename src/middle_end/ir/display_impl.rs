//! Textual form of the IR.  `Display` output parses back with `FromStr`.

use std::fmt;

use super::*;

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &*self.0 {
            IrType::Int => write!(f, "int"),
            IrType::Box => write!(f, "box"),
            IrType::Pointer(inner) => write!(f, "&{inner}"),
        }
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BbId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ExtId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_global() {
            write!(f, "@{}", self.0.name)
        } else {
            write!(f, "{}", self.0.name)
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Var(v) => write!(f, "{v}"),
            Operand::CInt(n) => write!(f, "{n}"),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Instruction::*;
        match self {
            Alloca { lhs } => write!(f, "{lhs} = $alloca"),
            Load { lhs, src } => write!(f, "{lhs} = $load {src}"),
            Store { dst, op } => write!(f, "$store {dst} {op}"),
            Phi { lhs, ops } => {
                write!(f, "{lhs} = $phi")?;
                for (op, bb) in ops {
                    write!(f, " [{op}, {bb}]")?;
                }
                Ok(())
            }
            Select { lhs, cond, tt, ff } => write!(f, "{lhs} = $select {cond} {tt} {ff}"),
            Call { lhs, callee, args } => {
                if let Some(lhs) = lhs {
                    write!(f, "{lhs} = ")?;
                }
                let args = args
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "$call {callee}({args})")
            }
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Terminal::Jump(bb) => write!(f, "$jump {bb}"),
            Terminal::Branch { cond, tt, ff } => write!(f, "$branch {cond} {tt} {ff}"),
            Terminal::Ret(None) => write!(f, "$ret"),
            Terminal::Ret(Some(op)) => write!(f, "$ret {op}"),
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}:", self.id)?;
        for inst in &self.insts {
            writeln!(f, "  {inst}")?;
        }
        writeln!(f, "  {}", self.term)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("{p}:{}", p.typ()))
            .collect::<Vec<_>>()
            .join(", ");
        let ret = match &self.ret_ty {
            Some(t) => t.to_string(),
            None => "_".to_string(),
        };
        writeln!(f, "fn {}({params}) -> {ret} {{", self.id)?;

        if !self.locals.is_empty() {
            let locals = self
                .locals
                .iter()
                .map(|l| format!("{l}:{}", l.typ()))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "let {locals}")?;
        }

        for (i, bb) in self.body.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{bb}")?;
        }

        writeln!(f, "}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for g in &self.globals {
            writeln!(f, "{g}:{}", g.typ())?;
        }
        if !self.globals.is_empty() {
            writeln!(f)?;
        }
        for (i, func) in self.functions.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}
