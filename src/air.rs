use std::fmt;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::operand::Operand;
use crate::symbol::{Flag, Mnemonic, Register};

// Symbol table of label -> instruction address
type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Label names mapped to the address of the instruction they precede.
/// Names are case-sensitive and unique; iteration follows definition order.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct LabelTable {
    table: FxMap<String, u16>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable {
            table: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Define a label. Fails with the existing address if already defined.
    pub fn insert(&mut self, name: &str, addr: u16) -> Result<(), u16> {
        if let Some(&existing) = self.table.get(name) {
            return Err(existing);
        }
        self.table.insert(name.to_string(), addr);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.table.get(name).copied()
    }

    /// First label defined at the given address.
    pub fn name_at(&self, addr: u16) -> Option<&str> {
        self.table
            .iter()
            .find(|(_, label_addr)| **label_addr == addr)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.table.iter().map(|(name, &addr)| (name.as_str(), addr))
    }
}

/// Register-register arithmetic and logic operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Or,
    Eor,
}

/// Register-immediate forms of the ALU operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImmOp {
    Subi,
    Sbci,
    Andi,
    Ori,
    Eori,
}

impl ImmOp {
    pub fn alu(self) -> AluOp {
        match self {
            ImmOp::Subi => AluOp::Sub,
            ImmOp::Sbci => AluOp::Sbc,
            ImmOp::Andi => AluOp::And,
            ImmOp::Ori => AluOp::Or,
            ImmOp::Eori => AluOp::Eor,
        }
    }
}

/// Single register read-modify-write operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Inc,
    Dec,
    Neg,
    Com,
    Clr,
    Ser,
    Tst,
    Swap,
    Lsl,
    Lsr,
    Rol,
    Ror,
}

/// 16-bit operations on a register pair.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WordOp {
    Adiw,
    Sbiw,
}

/// Branch conditions, each a test of a single SREG flag.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cond {
    /// Z = 0
    Ne,
    /// Z = 1
    Eq,
    /// C = 1
    Cs,
    /// C = 0
    Cc,
    /// S = 0
    Ge,
    /// S = 1
    Lt,
    /// N = 1
    Mi,
    /// N = 0
    Pl,
}

impl Cond {
    /// Flag tested and the value it must hold for the branch to be taken.
    pub fn test(self) -> (Flag, bool) {
        match self {
            Cond::Ne => (Flag::Z, false),
            Cond::Eq => (Flag::Z, true),
            Cond::Cs => (Flag::C, true),
            Cond::Cc => (Flag::C, false),
            Cond::Ge => (Flag::S, false),
            Cond::Lt => (Flag::S, true),
            Cond::Mi => (Flag::N, true),
            Cond::Pl => (Flag::N, false),
        }
    }
}

/// Memory operand of a load or store.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemRef {
    /// Address held in a register
    Indirect(Register),
    /// Fixed address written in source
    Direct(u16),
}

impl MemRef {
    fn operand(self) -> Operand {
        match self {
            MemRef::Indirect(reg) => Operand::Reg(reg),
            MemRef::Direct(addr) => Operand::Addr(addr),
        }
    }
}

/// Single assembled instruction. Labels are already resolved to addresses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    Nop,
    /// Set global interrupt flag
    Sei,
    /// Clear global interrupt flag
    Cli,
    Ldi {
        rd: Register,
        k: u8,
    },
    Mov {
        rd: Register,
        rr: Register,
    },
    Ld {
        rd: Register,
        src: MemRef,
    },
    St {
        dst: MemRef,
        rr: Register,
    },
    In {
        rd: Register,
        port: u16,
    },
    Out {
        port: u16,
        rr: Register,
    },
    Push {
        rr: Register,
    },
    Pop {
        rd: Register,
    },
    Alu {
        op: AluOp,
        rd: Register,
        rr: Register,
    },
    AluImm {
        op: ImmOp,
        rd: Register,
        k: u8,
    },
    Unary {
        op: UnaryOp,
        rd: Register,
    },
    /// Product low byte in `rd`, high byte in `rd+1`
    Mul {
        rd: Register,
        rr: Register,
    },
    /// Quotient in `rd`, remainder in `rd+1`
    Div {
        rd: Register,
        rr: Register,
    },
    /// `rd` is the low byte of the pair
    Word {
        op: WordOp,
        rd: Register,
        k: u8,
    },
    Cp {
        rd: Register,
        rr: Register,
    },
    Cpi {
        rd: Register,
        k: u8,
    },
    /// Skip next instruction if `rd == rr`
    Cpse {
        rd: Register,
        rr: Register,
    },
    /// Set or clear one bit of an I/O byte
    IoBit {
        set: bool,
        port: u16,
        bit: u8,
    },
    /// Skip next instruction if a register bit matches `if_set`
    SkipReg {
        rr: Register,
        bit: u8,
        if_set: bool,
    },
    /// Skip next instruction if an I/O bit matches `if_set`
    SkipIo {
        port: u16,
        bit: u8,
        if_set: bool,
    },
    Jmp {
        target: u16,
    },
    /// Jump to `PC + 1 + offset`
    Rjmp {
        offset: i16,
    },
    Call {
        target: u16,
    },
    /// Call `PC + 1 + offset`
    Rcall {
        offset: i16,
    },
    Ret,
    Reti,
    Branch {
        cond: Cond,
        target: u16,
    },
}

impl Instr {
    pub fn mnemonic(&self) -> Mnemonic {
        match *self {
            Instr::Nop => Mnemonic::Nop,
            Instr::Sei => Mnemonic::Sei,
            Instr::Cli => Mnemonic::Cli,
            Instr::Ldi { .. } => Mnemonic::Ldi,
            Instr::Mov { .. } => Mnemonic::Mov,
            Instr::Ld { .. } => Mnemonic::Ld,
            Instr::St { .. } => Mnemonic::St,
            Instr::In { .. } => Mnemonic::In,
            Instr::Out { .. } => Mnemonic::Out,
            Instr::Push { .. } => Mnemonic::Push,
            Instr::Pop { .. } => Mnemonic::Pop,
            Instr::Alu { op, .. } => match op {
                AluOp::Add => Mnemonic::Add,
                AluOp::Adc => Mnemonic::Adc,
                AluOp::Sub => Mnemonic::Sub,
                AluOp::Sbc => Mnemonic::Sbc,
                AluOp::And => Mnemonic::And,
                AluOp::Or => Mnemonic::Or,
                AluOp::Eor => Mnemonic::Eor,
            },
            Instr::AluImm { op, .. } => match op {
                ImmOp::Subi => Mnemonic::Subi,
                ImmOp::Sbci => Mnemonic::Sbci,
                ImmOp::Andi => Mnemonic::Andi,
                ImmOp::Ori => Mnemonic::Ori,
                ImmOp::Eori => Mnemonic::Eori,
            },
            Instr::Unary { op, .. } => match op {
                UnaryOp::Inc => Mnemonic::Inc,
                UnaryOp::Dec => Mnemonic::Dec,
                UnaryOp::Neg => Mnemonic::Neg,
                UnaryOp::Com => Mnemonic::Com,
                UnaryOp::Clr => Mnemonic::Clr,
                UnaryOp::Ser => Mnemonic::Ser,
                UnaryOp::Tst => Mnemonic::Tst,
                UnaryOp::Swap => Mnemonic::Swap,
                UnaryOp::Lsl => Mnemonic::Lsl,
                UnaryOp::Lsr => Mnemonic::Lsr,
                UnaryOp::Rol => Mnemonic::Rol,
                UnaryOp::Ror => Mnemonic::Ror,
            },
            Instr::Mul { .. } => Mnemonic::Mul,
            Instr::Div { .. } => Mnemonic::Div,
            Instr::Word { op, .. } => match op {
                WordOp::Adiw => Mnemonic::Adiw,
                WordOp::Sbiw => Mnemonic::Sbiw,
            },
            Instr::Cp { .. } => Mnemonic::Cp,
            Instr::Cpi { .. } => Mnemonic::Cpi,
            Instr::Cpse { .. } => Mnemonic::Cpse,
            Instr::IoBit { set: true, .. } => Mnemonic::Sbi,
            Instr::IoBit { set: false, .. } => Mnemonic::Cbi,
            Instr::SkipReg { if_set: true, .. } => Mnemonic::Sbrs,
            Instr::SkipReg { if_set: false, .. } => Mnemonic::Sbrc,
            Instr::SkipIo { if_set: true, .. } => Mnemonic::Sbis,
            Instr::SkipIo { if_set: false, .. } => Mnemonic::Sbic,
            Instr::Jmp { .. } => Mnemonic::Jmp,
            Instr::Rjmp { .. } => Mnemonic::Rjmp,
            Instr::Call { .. } => Mnemonic::Call,
            Instr::Rcall { .. } => Mnemonic::Rcall,
            Instr::Ret => Mnemonic::Ret,
            Instr::Reti => Mnemonic::Reti,
            Instr::Branch { cond, .. } => match cond {
                Cond::Ne => Mnemonic::Brne,
                Cond::Eq => Mnemonic::Breq,
                Cond::Cs => Mnemonic::Brcs,
                Cond::Cc => Mnemonic::Brcc,
                Cond::Ge => Mnemonic::Brge,
                Cond::Lt => Mnemonic::Brlt,
                Cond::Mi => Mnemonic::Brmi,
                Cond::Pl => Mnemonic::Brpl,
            },
        }
    }

    /// Operands in source order.
    pub fn operands(&self) -> Vec<Operand> {
        use Operand::{Addr, Imm, Reg};
        match *self {
            Instr::Nop | Instr::Sei | Instr::Cli | Instr::Ret | Instr::Reti => vec![],
            Instr::Push { rr: r } | Instr::Pop { rd: r } | Instr::Unary { rd: r, .. } => {
                vec![Reg(r)]
            }
            Instr::Mov { rd, rr }
            | Instr::Alu { rd, rr, .. }
            | Instr::Mul { rd, rr }
            | Instr::Div { rd, rr }
            | Instr::Cp { rd, rr }
            | Instr::Cpse { rd, rr } => vec![Reg(rd), Reg(rr)],
            Instr::Ld { rd, src } => vec![Reg(rd), src.operand()],
            Instr::St { dst, rr } => vec![dst.operand(), Reg(rr)],
            Instr::Ldi { rd, k }
            | Instr::AluImm { rd, k, .. }
            | Instr::Word { rd, k, .. }
            | Instr::Cpi { rd, k } => vec![Reg(rd), Imm(k as i32)],
            Instr::In { rd, port } => vec![Reg(rd), Addr(port)],
            Instr::Out { port, rr } => vec![Addr(port), Reg(rr)],
            Instr::IoBit { port, bit, .. } | Instr::SkipIo { port, bit, .. } => {
                vec![Addr(port), Imm(bit as i32)]
            }
            Instr::SkipReg { rr, bit, .. } => vec![Reg(rr), Imm(bit as i32)],
            Instr::Jmp { target } | Instr::Call { target } | Instr::Branch { target, .. } => {
                vec![Addr(target)]
            }
            Instr::Rjmp { offset } | Instr::Rcall { offset } => vec![Imm(offset as i32)],
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        for (i, operand) in self.operands().iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{operand}")?;
        }
        Ok(())
    }
}

/// Instruction together with where it came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Stmt {
    pub instr: Instr,
    /// 1-based line in the source file
    pub line: usize,
}

/// Assembled program: instruction stream, resolved labels and the source it was built from.
/// The address of an instruction is its index in the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    stmts: Vec<Stmt>,
    labels: LabelTable,
    source: Vec<String>,
}

impl Program {
    pub fn new(stmts: Vec<Stmt>, labels: LabelTable, source: &str) -> Self {
        Program {
            stmts,
            labels,
            source: source.lines().map(str::to_string).collect(),
        }
    }

    pub fn get(&self, addr: u16) -> Option<&Instr> {
        self.stmts.get(addr as usize).map(|stmt| &stmt.instr)
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Source line the instruction at `addr` was assembled from.
    pub fn line_of(&self, addr: u16) -> Option<usize> {
        self.stmts.get(addr as usize).map(|stmt| stmt.line)
    }

    /// Text of a 1-based source line.
    pub fn source_line(&self, line: usize) -> Option<&str> {
        line.checked_sub(1)
            .and_then(|idx| self.source.get(idx))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stmt> {
        self.stmts.iter()
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Stmt;
    type IntoIter = std::slice::Iter<'a, Stmt>;
    fn into_iter(self) -> Self::IntoIter {
        self.stmts.iter()
    }
}
