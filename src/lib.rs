// Parsing
mod parser;
pub use parser::{assemble, AsmParser, MAX_INSTRUCTIONS};
mod air;
pub use air::{AluOp, Cond, ImmOp, Instr, LabelTable, MemRef, Program, Stmt, UnaryOp, WordOp};
mod operand;
pub use operand::{parse_number, Operand, OperandError};

// Running
mod runtime;
pub use runtime::{Cpu, Halt, RunSummary, Sreg, StepOutcome};
mod memory;
pub use memory::{Memory, DEFAULT_MEMORY_SIZE, MEMORY_MAX};
mod trace;
pub use trace::{MemoryChange, RegisterChange, StepSnapshot, Trace};
pub mod output;

mod symbol;
pub use symbol::{Flag, Form, Mnemonic, Register, RegisterParseError, REGISTER_COUNT};

mod error;
pub use error::{AsmError, ErrorClass, RuntimeError};
mod lexer;
pub use lexer::TokenKind;

pub mod env;
pub use env::{Config, ConfigError};

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
