use std::{fmt, str::FromStr};

use miette::SourceSpan;

/// Used to refer to offsets from the start of a source file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SrcOffset(pub usize);

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Span {
    offs: SrcOffset,
    len: usize,
}

impl Span {
    pub fn new(offs: SrcOffset, len: usize) -> Self {
        Span { offs, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offs(&self) -> usize {
        self.offs.0
    }

    pub fn end(&self) -> usize {
        self.offs.0 + self.len
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 32;

/// One of the 32 general purpose registers, `R0` to `R31`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Register(u8);

impl Register {
    /// First register usable by the immediate instruction family.
    pub const FIRST_HIGH: Register = Register(16);

    pub fn new(index: u8) -> Option<Self> {
        (index < REGISTER_COUNT as u8).then_some(Register(index))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Register directly above this one, used for register pairs.
    pub fn next(self) -> Option<Self> {
        Register::new(self.0 + 1)
    }

    pub fn is_high(self) -> bool {
        self >= Self::FIRST_HIGH
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Reason a token could not be read as a register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegisterParseError {
    /// Not of the form `rN`.
    NotRegister,
    /// Of the form `rN`, but `N` is not a valid index.
    OutOfRange,
}

impl FromStr for Register {
    type Err = RegisterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(&['r', 'R'][..])
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
            .ok_or(RegisterParseError::NotRegister)?;
        digits
            .parse::<u8>()
            .ok()
            .and_then(Register::new)
            .ok_or(RegisterParseError::OutOfRange)
    }
}

/// Status register flags, named after their bit in SREG.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Flag {
    /// Carry
    C = 0,
    /// Zero
    Z = 1,
    /// Negative
    N = 2,
    /// Two's complement overflow
    V = 3,
    /// Sign, N ^ V
    S = 4,
    /// Half carry
    H = 5,
    /// Bit copy storage
    T = 6,
    /// Global interrupt enable
    I = 7,
}

impl Flag {
    /// Flags ordered from the highest SREG bit to the lowest.
    pub const ALL: [Flag; 8] = [
        Flag::I,
        Flag::T,
        Flag::H,
        Flag::S,
        Flag::V,
        Flag::N,
        Flag::Z,
        Flag::C,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn from_bit(bit: u8) -> Option<Self> {
        Flag::ALL.into_iter().find(|flag| flag.bit() == bit)
    }

    pub fn name(self) -> char {
        match self {
            Flag::C => 'C',
            Flag::Z => 'Z',
            Flag::N => 'N',
            Flag::V => 'V',
            Flag::S => 'S',
            Flag::H => 'H',
            Flag::T => 'T',
            Flag::I => 'I',
        }
    }
}

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Flag::ALL
                .into_iter()
                .find(|flag| flag.name() == c.to_ascii_uppercase())
                .ok_or(()),
            _ => Err(()),
        }
    }
}

/// Shape of the operand list an instruction expects.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Form {
    /// No operands
    None,
    /// `Rd`
    Reg,
    /// `Rd, Rr`
    RegReg,
    /// `Rd, K`
    RegImm,
    /// `Rd, Rr` or `Rd, addr`
    RegMem,
    /// `Rd, Rr` or `addr, Rr`
    MemReg,
    /// `Rd, port`
    RegPort,
    /// `port, Rr`
    PortReg,
    /// `port, bit`
    PortBit,
    /// `Rr, bit`
    RegBit,
    /// Absolute address or label
    Target,
    /// Signed offset or label
    Relative,
}

impl Form {
    pub fn arity(self) -> usize {
        match self {
            Form::None => 0,
            Form::Reg | Form::Target | Form::Relative => 1,
            Form::RegReg
            | Form::RegImm
            | Form::RegMem
            | Form::MemReg
            | Form::RegPort
            | Form::PortReg
            | Form::PortBit
            | Form::RegBit => 2,
        }
    }
}

macro_rules! mnemonics {
    ( $( $variant:ident => $text:literal, $form:ident; )* ) => {
        /// Every mnemonic understood by the assembler.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub enum Mnemonic {
            $( $variant, )*
        }

        impl Mnemonic {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Mnemonic::$variant => $text, )*
                }
            }

            pub fn form(self) -> Form {
                match self {
                    $( Mnemonic::$variant => Form::$form, )*
                }
            }
        }

        impl FromStr for Mnemonic {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $( $text => Ok(Mnemonic::$variant), )*
                    _ => Err(()),
                }
            }
        }
    };
}

mnemonics! {
    // Data transfer
    Ldi => "LDI", RegImm;
    Mov => "MOV", RegReg;
    Ld => "LD", RegMem;
    St => "ST", MemReg;
    In => "IN", RegPort;
    Out => "OUT", PortReg;
    Push => "PUSH", Reg;
    Pop => "POP", Reg;
    // Arithmetic
    Add => "ADD", RegReg;
    Adc => "ADC", RegReg;
    Sub => "SUB", RegReg;
    Sbc => "SBC", RegReg;
    Subi => "SUBI", RegImm;
    Sbci => "SBCI", RegImm;
    Inc => "INC", Reg;
    Dec => "DEC", Reg;
    Neg => "NEG", Reg;
    Mul => "MUL", RegReg;
    Div => "DIV", RegReg;
    Adiw => "ADIW", RegImm;
    Sbiw => "SBIW", RegImm;
    // Logical and bit
    And => "AND", RegReg;
    Or => "OR", RegReg;
    Eor => "EOR", RegReg;
    Andi => "ANDI", RegImm;
    Ori => "ORI", RegImm;
    Eori => "EORI", RegImm;
    Com => "COM", Reg;
    Clr => "CLR", Reg;
    Ser => "SER", Reg;
    Tst => "TST", Reg;
    Swap => "SWAP", Reg;
    Sbi => "SBI", PortBit;
    Cbi => "CBI", PortBit;
    // Shift and rotate
    Lsl => "LSL", Reg;
    Lsr => "LSR", Reg;
    Rol => "ROL", Reg;
    Ror => "ROR", Reg;
    // Control flow
    Jmp => "JMP", Target;
    Rjmp => "RJMP", Relative;
    Call => "CALL", Target;
    Rcall => "RCALL", Relative;
    Ret => "RET", None;
    Reti => "RETI", None;
    Brne => "BRNE", Target;
    Breq => "BREQ", Target;
    Brcs => "BRCS", Target;
    Brlo => "BRLO", Target;
    Brcc => "BRCC", Target;
    Brsh => "BRSH", Target;
    Brge => "BRGE", Target;
    Brlt => "BRLT", Target;
    Brmi => "BRMI", Target;
    Brpl => "BRPL", Target;
    // Compare and skip
    Cp => "CP", RegReg;
    Cpi => "CPI", RegImm;
    Cpse => "CPSE", RegReg;
    Sbrs => "SBRS", RegBit;
    Sbrc => "SBRC", RegBit;
    Sbis => "SBIS", PortBit;
    Sbic => "SBIC", PortBit;
    // MCU control
    Nop => "NOP", None;
    Sei => "SEI", None;
    Cli => "CLI", None;
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_parse() {
        assert_eq!("r0".parse(), Ok(Register(0)));
        assert_eq!("R31".parse(), Ok(Register(31)));
        assert_eq!("r32".parse::<Register>(), Err(RegisterParseError::OutOfRange));
        assert_eq!("r".parse::<Register>(), Err(RegisterParseError::NotRegister));
        assert_eq!("r1x".parse::<Register>(), Err(RegisterParseError::NotRegister));
        assert_eq!("loop".parse::<Register>(), Err(RegisterParseError::NotRegister));
    }

    #[test]
    fn register_pair() {
        assert_eq!(Register(30).next(), Some(Register(31)));
        assert_eq!(Register(31).next(), None);
    }

    #[test]
    fn mnemonic_case_insensitive() {
        assert_eq!("ldi".parse(), Ok(Mnemonic::Ldi));
        assert_eq!("LdI".parse(), Ok(Mnemonic::Ldi));
        assert_eq!("brne".parse(), Ok(Mnemonic::Brne));
        assert!("frob".parse::<Mnemonic>().is_err());
    }

    #[test]
    fn mnemonic_arity() {
        assert_eq!(Mnemonic::Nop.form().arity(), 0);
        assert_eq!(Mnemonic::Inc.form().arity(), 1);
        assert_eq!(Mnemonic::Sbis.form().arity(), 2);
    }

    #[test]
    fn flag_names() {
        assert_eq!("z".parse(), Ok(Flag::Z));
        assert_eq!("I".parse(), Ok(Flag::I));
        assert!("ZZ".parse::<Flag>().is_err());
        assert_eq!(Flag::from_bit(4), Some(Flag::S));
    }
}
