use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::lexer::TokenKind;
use crate::symbol::Mnemonic;

/// Broad category of an error, independent of its exact cause.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorClass {
    /// Unknown mnemonic, bad operands or malformed literal
    Syntax,
    /// Undefined or duplicate label
    Resolution,
    /// Register index not allowed for the instruction
    RegisterRange,
    /// Division by zero
    Arithmetic,
    /// Program counter left the program
    Control,
    /// Access outside of memory
    Memory,
}

// Assembler errors

/// Reason a source file failed to assemble. Every variant carries the 1-based
/// line and the span of the offending token.
#[derive(Clone, PartialEq, Eq, Debug, Error, Diagnostic)]
pub enum AsmError {
    #[error("Unknown instruction `{mnemonic}`")]
    #[diagnostic(
        code(parse::unknown_instr),
        help("check the list of available instructions in the documentation.")
    )]
    UnknownInstruction {
        mnemonic: String,
        line: usize,
        #[label("unknown instruction")]
        span: SourceSpan,
    },

    #[error("Operand count mismatch: `{mnemonic}` expects {expected}, found {found}")]
    #[diagnostic(
        code(parse::operand_count),
        help("check the number of operands for this instruction.")
    )]
    OperandCount {
        mnemonic: Mnemonic,
        expected: usize,
        found: usize,
        line: usize,
        #[label("this instruction")]
        span: SourceSpan,
    },

    #[error("Expected operand of type {expected} for `{mnemonic}`, found {found}")]
    #[diagnostic(
        code(parse::operand_type),
        help("check the type of operands allowed for this instruction.")
    )]
    OperandType {
        mnemonic: Mnemonic,
        expected: &'static str,
        found: &'static str,
        line: usize,
        #[label("unexpected operand")]
        span: SourceSpan,
    },

    #[error("Encountered an invalid literal `{text}`")]
    #[diagnostic(
        code(parse::bad_lit),
        help("literals may be decimal (`-12`), hex (`$1F`, `0x1F`) or binary (`0b101`), optionally prefixed with `#`.")
    )]
    MalformedLiteral {
        text: String,
        line: usize,
        #[label("incorrect literal")]
        span: SourceSpan,
    },

    #[error("Found numeric literal {value} of incorrect size")]
    #[diagnostic(code(parse::lit_range), help("this operand expects values from {min} to {max}."))]
    ValueOutOfRange {
        value: i32,
        min: i32,
        max: i32,
        line: usize,
        #[label("out-of-range literal")]
        span: SourceSpan,
    },

    #[error("Unexpected token of type {found}")]
    #[diagnostic(
        code(parse::unexpected_token),
        help("lines should contain an optional `label:` followed by an instruction and its operands.")
    )]
    UnexpectedToken {
        found: TokenKind,
        line: usize,
        #[label("unexpected token")]
        span: SourceSpan,
    },

    #[error("Undefined label `{name}`")]
    #[diagnostic(
        code(parse::undefined_label),
        help("labels are case-sensitive; define it with `{name}:` somewhere in the file.")
    )]
    UndefinedLabel {
        name: String,
        line: usize,
        #[label("not defined")]
        span: SourceSpan,
    },

    #[error("Duplicate label `{name}`")]
    #[diagnostic(
        code(parse::duplicate_label),
        help("prefix labels are only allowed once per file")
    )]
    DuplicateLabel {
        name: String,
        line: usize,
        #[label("duplicate label")]
        span: SourceSpan,
    },

    #[error("Program exceeds {max} instructions")]
    #[diagnostic(code(parse::program_size), help("instruction addresses are 16 bits wide."))]
    ProgramTooLong {
        max: usize,
        line: usize,
        #[label("first instruction past the limit")]
        span: SourceSpan,
    },

    #[error("Register `{text}` is out of range")]
    #[diagnostic(code(parse::register_range), help("this operand must be one of {allowed}."))]
    RegisterOutOfRange {
        text: String,
        allowed: &'static str,
        line: usize,
        #[label("register out of range")]
        span: SourceSpan,
    },
}

impl AsmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AsmError::UnknownInstruction { .. }
            | AsmError::OperandCount { .. }
            | AsmError::OperandType { .. }
            | AsmError::MalformedLiteral { .. }
            | AsmError::ValueOutOfRange { .. }
            | AsmError::UnexpectedToken { .. }
            | AsmError::ProgramTooLong { .. } => ErrorClass::Syntax,
            AsmError::UndefinedLabel { .. } | AsmError::DuplicateLabel { .. } => {
                ErrorClass::Resolution
            }
            AsmError::RegisterOutOfRange { .. } => ErrorClass::RegisterRange,
        }
    }

    /// 1-based source line of the error.
    pub fn line(&self) -> usize {
        match self {
            AsmError::UnknownInstruction { line, .. }
            | AsmError::OperandCount { line, .. }
            | AsmError::OperandType { line, .. }
            | AsmError::MalformedLiteral { line, .. }
            | AsmError::ValueOutOfRange { line, .. }
            | AsmError::UnexpectedToken { line, .. }
            | AsmError::UndefinedLabel { line, .. }
            | AsmError::DuplicateLabel { line, .. }
            | AsmError::ProgramTooLong { line, .. }
            | AsmError::RegisterOutOfRange { line, .. } => *line,
        }
    }
}

// Runtime errors

/// Fatal condition raised while executing. CPU state and trace are left as
/// they were before the failing instruction.
#[derive(Clone, PartialEq, Eq, Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error("Division by zero at address {pc} (step {step})")]
    #[diagnostic(
        code(run::div_zero),
        help("check the divisor register before `DIV`.")
    )]
    DivisionByZero { pc: u16, step: u64 },

    #[error("Jump to {target} leaves the program (address {pc}, step {step})")]
    #[diagnostic(
        code(run::pc_range),
        help("targets must lie within the program; use `done: jmp done` to halt.")
    )]
    PcOutOfRange { pc: u16, target: i64, step: u64 },

    #[error("Memory access at {addr} is outside memory of {size} bytes (address {pc}, step {step})")]
    #[diagnostic(
        code(run::mem_range),
        help("check address registers and stack depth.")
    )]
    MemoryOutOfRange {
        pc: u16,
        addr: i64,
        size: usize,
        step: u64,
    },
}

impl RuntimeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RuntimeError::DivisionByZero { .. } => ErrorClass::Arithmetic,
            RuntimeError::PcOutOfRange { .. } => ErrorClass::Control,
            RuntimeError::MemoryOutOfRange { .. } => ErrorClass::Memory,
        }
    }

    /// Address of the instruction that failed.
    pub fn pc(&self) -> u16 {
        match self {
            RuntimeError::DivisionByZero { pc, .. }
            | RuntimeError::PcOutOfRange { pc, .. }
            | RuntimeError::MemoryOutOfRange { pc, .. } => *pc,
        }
    }

    /// Step at which execution failed.
    pub fn step(&self) -> u64 {
        match self {
            RuntimeError::DivisionByZero { step, .. }
            | RuntimeError::PcOutOfRange { step, .. }
            | RuntimeError::MemoryOutOfRange { step, .. } => *step,
        }
    }
}
