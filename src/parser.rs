use crate::{
    air::{AluOp, Cond, ImmOp, Instr, LabelTable, MemRef, Program, Stmt, UnaryOp, WordOp},
    error::AsmError,
    lexer::{tokenize, Token, TokenKind},
    operand::{Operand, OperandError},
    symbol::{Mnemonic, Register, Span, SrcOffset},
};

/// Largest number of instructions a program may hold.
pub const MAX_INSTRUCTIONS: usize = u16::MAX as usize;

/// Assemble source text into a program.
pub fn assemble(src: &str) -> Result<Program, AsmError> {
    AsmParser::new(src)?.parse()
}

/// An instruction line found by the first pass, operands not yet interpreted.
struct Line {
    /// 1-based line number
    number: usize,
    mnemonic: Mnemonic,
    /// Span of the mnemonic
    span: Span,
    /// Identifier and literal tokens, separators removed
    operands: Vec<Token>,
}

impl Line {
    /// Span from the mnemonic to the end of the last operand.
    fn full_span(&self) -> Span {
        let end = self.operands.last().map_or(self.span.end(), |tok| tok.span.end());
        Span::new(SrcOffset(self.span.offs()), end - self.span.offs())
    }
}

/// Two-pass assembler.
///
/// [`AsmParser::new`] runs the first pass, which records every label at the address of the
/// next instruction and groups the remaining tokens of each line. [`AsmParser::parse`] runs
/// the second pass, which interprets operands, resolves labels and builds the instructions.
/// Because all labels are known before the second pass begins, forward references need no
/// special handling.
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    lines: Vec<Line>,
    labels: LabelTable,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Result<Self, AsmError> {
        let mut parser = AsmParser {
            src,
            lines: Vec::new(),
            labels: LabelTable::new(),
        };
        let mut line = Vec::new();
        let mut number = 1;
        for tok in tokenize(src) {
            match tok.kind {
                TokenKind::Whitespace | TokenKind::Comment => {}
                TokenKind::Newline => {
                    parser.scan_line(&line, number)?;
                    line.clear();
                    number += 1;
                }
                _ => line.push(tok),
            }
        }
        parser.scan_line(&line, number)?;
        Ok(parser)
    }

    /// Labels discovered by the first pass.
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Number of instructions discovered by the first pass.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn get_span(&self, span: Span) -> &'a str {
        &self.src[span.offs()..span.end()]
    }

    fn scan_line(&mut self, toks: &[Token], number: usize) -> Result<(), AsmError> {
        let mut rest = toks;
        // Any number of `name:` prefixes
        while let [label, colon, tail @ ..] = rest {
            if label.kind != TokenKind::Ident || colon.kind != TokenKind::Colon {
                break;
            }
            let name = self.get_span(label.span);
            // Address of the next instruction, which never exceeds MAX_INSTRUCTIONS
            let addr = self.lines.len() as u16;
            if self.labels.insert(name, addr).is_err() {
                return Err(AsmError::DuplicateLabel {
                    name: name.to_string(),
                    line: number,
                    span: label.span.into(),
                });
            }
            rest = tail;
        }

        let Some((first, tail)) = rest.split_first() else {
            return Ok(());
        };
        if first.kind != TokenKind::Ident {
            return Err(unexpected(first, number));
        }
        let text = self.get_span(first.span);
        let mnemonic = text
            .parse::<Mnemonic>()
            .map_err(|_| AsmError::UnknownInstruction {
                mnemonic: text.to_string(),
                line: number,
                span: first.span.into(),
            })?;

        // Operands separated by whitespace, commas, or both
        let mut operands = Vec::new();
        let mut after_comma = None;
        for tok in tail {
            match tok.kind {
                TokenKind::Ident | TokenKind::Lit => {
                    operands.push(*tok);
                    after_comma = None;
                }
                TokenKind::Comma if !operands.is_empty() && after_comma.is_none() => {
                    after_comma = Some(*tok);
                }
                _ => return Err(unexpected(tok, number)),
            }
        }
        if let Some(comma) = after_comma {
            return Err(unexpected(&comma, number));
        }

        if self.lines.len() >= MAX_INSTRUCTIONS {
            return Err(AsmError::ProgramTooLong {
                max: MAX_INSTRUCTIONS,
                line: number,
                span: first.span.into(),
            });
        }
        self.lines.push(Line {
            number,
            mnemonic,
            span: first.span,
            operands,
        });
        Ok(())
    }

    /// Second pass: build the program.
    pub fn parse(self) -> Result<Program, AsmError> {
        let mut stmts = Vec::with_capacity(self.lines.len());
        for (addr, line) in self.lines.iter().enumerate() {
            let instr = self.encode(addr as u16, line)?;
            stmts.push(Stmt {
                instr,
                line: line.number,
            });
        }
        log::debug!(
            "assembled {} instructions, {} labels",
            stmts.len(),
            self.labels.len()
        );
        Ok(Program::new(stmts, self.labels, self.src))
    }

    fn operand(&self, tok: &Token, line: usize) -> Result<(Operand, Span), AsmError> {
        let text = self.get_span(tok.span);
        let classified = match tok.kind {
            TokenKind::Lit => Operand::from_literal(text),
            _ => Operand::from_ident(text),
        };
        let operand = classified.map_err(|err| match err {
            OperandError::MalformedLiteral => AsmError::MalformedLiteral {
                text: text.to_string(),
                line,
                span: tok.span.into(),
            },
            OperandError::RegisterOutOfRange => AsmError::RegisterOutOfRange {
                text: text.to_string(),
                allowed: "R0 to R31",
                line,
                span: tok.span.into(),
            },
        })?;
        let operand = operand
            .resolve(&self.labels)
            .map_err(|name| AsmError::UndefinedLabel {
                name,
                line,
                span: tok.span.into(),
            })?;
        Ok((operand, tok.span))
    }

    fn encode(&self, addr: u16, line: &Line) -> Result<Instr, AsmError> {
        use Mnemonic as M;

        let mnemonic = line.mnemonic;
        let expected = mnemonic.form().arity();
        if line.operands.len() != expected {
            return Err(AsmError::OperandCount {
                mnemonic,
                expected,
                found: line.operands.len(),
                line: line.number,
                span: line.full_span().into(),
            });
        }
        let ops = Operands {
            ops: line
                .operands
                .iter()
                .map(|tok| self.operand(tok, line.number))
                .collect::<Result<_, _>>()?,
            mnemonic,
            line: line.number,
        };

        let alu = |op| -> Result<Instr, AsmError> {
            Ok(Instr::Alu {
                op,
                rd: ops.reg(0)?,
                rr: ops.reg(1)?,
            })
        };
        let alu_imm = |op| -> Result<Instr, AsmError> {
            Ok(Instr::AluImm {
                op,
                rd: ops.high_reg(0)?,
                k: ops.byte(1)?,
            })
        };
        let unary = |op| -> Result<Instr, AsmError> { Ok(Instr::Unary { op, rd: ops.reg(0)? }) };
        let word = |op| -> Result<Instr, AsmError> {
            Ok(Instr::Word {
                op,
                rd: ops.pair_reg(0)?,
                k: ops.number(1, 0, 63)? as u8,
            })
        };
        let branch = |cond| -> Result<Instr, AsmError> {
            Ok(Instr::Branch {
                cond,
                target: ops.target(0)?,
            })
        };
        let skip_reg = |if_set| -> Result<Instr, AsmError> {
            Ok(Instr::SkipReg {
                rr: ops.reg(0)?,
                bit: ops.bit(1)?,
                if_set,
            })
        };
        let skip_io = |if_set| -> Result<Instr, AsmError> {
            Ok(Instr::SkipIo {
                port: ops.port(0)?,
                bit: ops.bit(1)?,
                if_set,
            })
        };
        let io_bit = |set| -> Result<Instr, AsmError> {
            Ok(Instr::IoBit {
                set,
                port: ops.port(0)?,
                bit: ops.bit(1)?,
            })
        };

        match mnemonic {
            // Data transfer
            M::Ldi => Ok(Instr::Ldi {
                rd: ops.high_reg(0)?,
                k: ops.byte(1)?,
            }),
            M::Mov => Ok(Instr::Mov {
                rd: ops.reg(0)?,
                rr: ops.reg(1)?,
            }),
            M::Ld => Ok(Instr::Ld {
                rd: ops.reg(0)?,
                src: ops.mem_ref(1)?,
            }),
            M::St => Ok(Instr::St {
                dst: ops.mem_ref(0)?,
                rr: ops.reg(1)?,
            }),
            M::In => Ok(Instr::In {
                rd: ops.reg(0)?,
                port: ops.port(1)?,
            }),
            M::Out => Ok(Instr::Out {
                port: ops.port(0)?,
                rr: ops.reg(1)?,
            }),
            M::Push => Ok(Instr::Push { rr: ops.reg(0)? }),
            M::Pop => Ok(Instr::Pop { rd: ops.reg(0)? }),
            // Arithmetic
            M::Add => alu(AluOp::Add),
            M::Adc => alu(AluOp::Adc),
            M::Sub => alu(AluOp::Sub),
            M::Sbc => alu(AluOp::Sbc),
            M::Subi => alu_imm(ImmOp::Subi),
            M::Sbci => alu_imm(ImmOp::Sbci),
            M::Inc => unary(UnaryOp::Inc),
            M::Dec => unary(UnaryOp::Dec),
            M::Neg => unary(UnaryOp::Neg),
            M::Mul => Ok(Instr::Mul {
                rd: ops.pair_reg(0)?,
                rr: ops.reg(1)?,
            }),
            M::Div => Ok(Instr::Div {
                rd: ops.pair_reg(0)?,
                rr: ops.reg(1)?,
            }),
            M::Adiw => word(WordOp::Adiw),
            M::Sbiw => word(WordOp::Sbiw),
            // Logical and bit
            M::And => alu(AluOp::And),
            M::Or => alu(AluOp::Or),
            M::Eor => alu(AluOp::Eor),
            M::Andi => alu_imm(ImmOp::Andi),
            M::Ori => alu_imm(ImmOp::Ori),
            M::Eori => alu_imm(ImmOp::Eori),
            M::Com => unary(UnaryOp::Com),
            M::Clr => unary(UnaryOp::Clr),
            M::Ser => Ok(Instr::Unary {
                op: UnaryOp::Ser,
                rd: ops.high_reg(0)?,
            }),
            M::Tst => unary(UnaryOp::Tst),
            M::Swap => unary(UnaryOp::Swap),
            M::Sbi => io_bit(true),
            M::Cbi => io_bit(false),
            // Shift and rotate
            M::Lsl => unary(UnaryOp::Lsl),
            M::Lsr => unary(UnaryOp::Lsr),
            M::Rol => unary(UnaryOp::Rol),
            M::Ror => unary(UnaryOp::Ror),
            // Control flow
            M::Jmp => Ok(Instr::Jmp {
                target: ops.target(0)?,
            }),
            M::Rjmp => Ok(Instr::Rjmp {
                offset: ops.offset(0, addr)?,
            }),
            M::Call => Ok(Instr::Call {
                target: ops.target(0)?,
            }),
            M::Rcall => Ok(Instr::Rcall {
                offset: ops.offset(0, addr)?,
            }),
            M::Ret => Ok(Instr::Ret),
            M::Reti => Ok(Instr::Reti),
            M::Brne => branch(Cond::Ne),
            M::Breq => branch(Cond::Eq),
            M::Brcs | M::Brlo => branch(Cond::Cs),
            M::Brcc | M::Brsh => branch(Cond::Cc),
            M::Brge => branch(Cond::Ge),
            M::Brlt => branch(Cond::Lt),
            M::Brmi => branch(Cond::Mi),
            M::Brpl => branch(Cond::Pl),
            // Compare and skip
            M::Cp => Ok(Instr::Cp {
                rd: ops.reg(0)?,
                rr: ops.reg(1)?,
            }),
            M::Cpi => Ok(Instr::Cpi {
                rd: ops.high_reg(0)?,
                k: ops.byte(1)?,
            }),
            M::Cpse => Ok(Instr::Cpse {
                rd: ops.reg(0)?,
                rr: ops.reg(1)?,
            }),
            M::Sbrs => skip_reg(true),
            M::Sbrc => skip_reg(false),
            M::Sbis => skip_io(true),
            M::Sbic => skip_io(false),
            // MCU control
            M::Nop => Ok(Instr::Nop),
            M::Sei => Ok(Instr::Sei),
            M::Cli => Ok(Instr::Cli),
        }
    }
}

fn unexpected(tok: &Token, line: usize) -> AsmError {
    AsmError::UnexpectedToken {
        found: tok.kind,
        line,
        span: tok.span.into(),
    }
}

/// Interpreted operands of one instruction, already checked for count.
struct Operands {
    ops: Vec<(Operand, Span)>,
    mnemonic: Mnemonic,
    line: usize,
}

impl Operands {
    fn type_error(&self, idx: usize, expected: &'static str) -> AsmError {
        let (operand, span) = &self.ops[idx];
        AsmError::OperandType {
            mnemonic: self.mnemonic,
            expected,
            found: operand.kind_name(),
            line: self.line,
            span: (*span).into(),
        }
    }

    fn range_error(&self, idx: usize, value: i32, min: i32, max: i32) -> AsmError {
        AsmError::ValueOutOfRange {
            value,
            min,
            max,
            line: self.line,
            span: self.ops[idx].1.into(),
        }
    }

    fn register_error(&self, idx: usize, reg: Register, allowed: &'static str) -> AsmError {
        AsmError::RegisterOutOfRange {
            text: reg.to_string(),
            allowed,
            line: self.line,
            span: self.ops[idx].1.into(),
        }
    }

    fn reg(&self, idx: usize) -> Result<Register, AsmError> {
        match self.ops[idx].0 {
            Operand::Reg(reg) => Ok(reg),
            _ => Err(self.type_error(idx, "register")),
        }
    }

    /// Register usable by the immediate instruction family.
    fn high_reg(&self, idx: usize) -> Result<Register, AsmError> {
        let reg = self.reg(idx)?;
        if !reg.is_high() {
            return Err(self.register_error(idx, reg, "R16 to R31"));
        }
        Ok(reg)
    }

    /// Low register of a pair; the register above it must exist.
    fn pair_reg(&self, idx: usize) -> Result<Register, AsmError> {
        let reg = self.reg(idx)?;
        if reg.next().is_none() {
            return Err(self.register_error(idx, reg, "R0 to R30"));
        }
        Ok(reg)
    }

    fn number(&self, idx: usize, min: i32, max: i32) -> Result<i32, AsmError> {
        match self.ops[idx].0 {
            Operand::Imm(val) if (min..=max).contains(&val) => Ok(val),
            Operand::Imm(val) => Err(self.range_error(idx, val, min, max)),
            _ => Err(self.type_error(idx, "immediate")),
        }
    }

    /// Byte immediate; negative values become their two's complement.
    fn byte(&self, idx: usize) -> Result<u8, AsmError> {
        self.number(idx, -128, 255).map(|val| val as u8)
    }

    fn bit(&self, idx: usize) -> Result<u8, AsmError> {
        self.number(idx, 0, 7).map(|val| val as u8)
    }

    fn port(&self, idx: usize) -> Result<u16, AsmError> {
        self.number(idx, 0, u16::MAX as i32).map(|val| val as u16)
    }

    /// Absolute instruction address, from a label or a number.
    fn target(&self, idx: usize) -> Result<u16, AsmError> {
        match self.ops[idx].0 {
            Operand::Addr(addr) => Ok(addr),
            Operand::Imm(_) => self.port(idx),
            _ => Err(self.type_error(idx, "address")),
        }
    }

    /// Offset from the instruction after `addr`. Labels are converted to the offset.
    fn offset(&self, idx: usize, addr: u16) -> Result<i16, AsmError> {
        let (min, max) = (i16::MIN as i32, i16::MAX as i32);
        let val = match self.ops[idx].0 {
            Operand::Addr(target) => target as i32 - (addr as i32 + 1),
            Operand::Imm(val) => val,
            _ => return Err(self.type_error(idx, "offset")),
        };
        if !(min..=max).contains(&val) {
            return Err(self.range_error(idx, val, min, max));
        }
        Ok(val as i16)
    }

    /// Register holding an address, or a fixed memory address.
    fn mem_ref(&self, idx: usize) -> Result<MemRef, AsmError> {
        match self.ops[idx].0 {
            Operand::Reg(reg) => Ok(MemRef::Indirect(reg)),
            Operand::Imm(_) => self.port(idx).map(MemRef::Direct),
            _ => Err(self.type_error(idx, "register or memory address")),
        }
    }
}
