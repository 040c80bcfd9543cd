use std::fmt;

use crate::air::LabelTable;
use crate::symbol::{Register, RegisterParseError};

/// A single instruction operand as written in source.
///
/// Labels only exist until the second assembler pass, which replaces every
/// [`Operand::Label`] with the [`Operand::Addr`] it names.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    Reg(Register),
    /// Numeric literal, before truncation to its final width
    Imm(i32),
    /// Resolved address inside the instruction stream
    Addr(u16),
    Label(String),
}

/// Why a token could not become an operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandError {
    MalformedLiteral,
    RegisterOutOfRange,
}

impl Operand {
    /// Classify a literal token (anything starting with a digit, `#`, `$` or `-`).
    pub fn from_literal(text: &str) -> Result<Operand, OperandError> {
        parse_number(text)
            .map(Operand::Imm)
            .ok_or(OperandError::MalformedLiteral)
    }

    /// Classify an identifier token: either a register or a label reference.
    pub fn from_ident(text: &str) -> Result<Operand, OperandError> {
        match text.parse::<Register>() {
            Ok(reg) => Ok(Operand::Reg(reg)),
            Err(RegisterParseError::OutOfRange) => Err(OperandError::RegisterOutOfRange),
            Err(RegisterParseError::NotRegister) => Ok(Operand::Label(text.to_string())),
        }
    }

    /// Replace a label reference with its address. Returns the label name if undefined.
    pub fn resolve(self, labels: &LabelTable) -> Result<Operand, String> {
        match self {
            Operand::Label(name) => match labels.get(&name) {
                Some(addr) => Ok(Operand::Addr(addr)),
                None => Err(name),
            },
            other => Ok(other),
        }
    }

    /// Name of the operand type, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operand::Reg(_) => "register",
            Operand::Imm(_) => "immediate",
            Operand::Addr(_) => "address",
            Operand::Label(_) => "label",
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{reg}"),
            Operand::Imm(val) => write!(f, "{val}"),
            Operand::Addr(addr) => write!(f, "{addr}"),
            Operand::Label(name) => f.write_str(name),
        }
    }
}

/// Parse a numeric literal.
///
/// Accepts an optional `#` marker, an optional `-` sign, and then one of
/// `$FF` or `0xFF` (hex), `0b1010` (binary), or plain decimal.
pub fn parse_number(token: &str) -> Option<i32> {
    let t = token.strip_prefix('#').unwrap_or(token);
    let (negative, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    let magnitude = if let Some(hex) = t.strip_prefix('$') {
        parse_radix(hex, 16)
    } else if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        parse_radix(hex, 16)
    } else if let Some(bin) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        parse_radix(bin, 2)
    } else {
        parse_radix(t, 10)
    }?;
    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).ok()
}

fn parse_radix(digits: &str, radix: u32) -> Option<i64> {
    // `from_str_radix` would accept its own sign
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    i64::from_str_radix(digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_decimal() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("#42"), Some(42));
        assert_eq!(parse_number("-7"), Some(-7));
        assert_eq!(parse_number("#-128"), Some(-128));
        assert_eq!(parse_number("0"), Some(0));
    }

    #[test]
    fn parse_number_hex() {
        assert_eq!(parse_number("$FF"), Some(255));
        assert_eq!(parse_number("$ff"), Some(255));
        assert_eq!(parse_number("0x1F"), Some(31));
        assert_eq!(parse_number("#0x10"), Some(16));
        assert_eq!(parse_number("#$10"), Some(16));
    }

    #[test]
    fn parse_number_binary() {
        assert_eq!(parse_number("0b1010"), Some(10));
        assert_eq!(parse_number("0B11111111"), Some(255));
    }

    #[test]
    fn parse_number_malformed() {
        assert_eq!(parse_number("0xZZ"), None);
        assert_eq!(parse_number("0b102"), None);
        assert_eq!(parse_number("12ab"), None);
        assert_eq!(parse_number("$"), None);
        assert_eq!(parse_number("#"), None);
        assert_eq!(parse_number("--1"), None);
        assert_eq!(parse_number("99999999999"), None);
    }

    #[test]
    fn classify_ident() {
        assert_eq!(
            Operand::from_ident("r5"),
            Ok(Operand::Reg(Register::new(5).unwrap()))
        );
        assert_eq!(
            Operand::from_ident("R40"),
            Err(OperandError::RegisterOutOfRange)
        );
        assert_eq!(
            Operand::from_ident("loop"),
            Ok(Operand::Label("loop".to_string()))
        );
    }

    #[test]
    fn resolve_label() {
        let mut labels = LabelTable::new();
        labels.insert("done", 4).unwrap();
        assert_eq!(
            Operand::Label("done".into()).resolve(&labels),
            Ok(Operand::Addr(4))
        );
        assert_eq!(
            Operand::Label("Done".into()).resolve(&labels),
            Err("Done".to_string())
        );
        assert_eq!(Operand::Imm(3).resolve(&labels), Ok(Operand::Imm(3)));
    }
}
