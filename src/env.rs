use std::{ffi::OsStr, str::FromStr};

use thiserror::Error;

use crate::memory::{DEFAULT_MEMORY_SIZE, MEMORY_MAX};
use crate::symbol::Register;

/// Default bound on executed instructions per run.
pub const DEFAULT_MAX_STEPS: u64 = 100_000;

const MEMORY_SIZE_VAR: &str = "TINY8_MEMORY_SIZE";
const MAX_STEPS_VAR: &str = "TINY8_MAX_STEPS";
const MINIMAL_VAR: &str = "TINY8_MINIMAL";

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ConfigError {
    #[error("memory size must be between 1 and 65536 bytes, got {0}")]
    MemorySize(usize),
    #[error("environment variable {name} has invalid value `{value}`")]
    InvalidVar { name: &'static str, value: String },
    #[error("invalid register assignment `{0}`, expected `rN=VALUE`")]
    RegisterAssignment(String),
}

/// Settings for a single run, applied when a program is loaded.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Config {
    /// Size of data memory in bytes
    pub memory_size: usize,
    /// Bound on the total number of executed instructions
    pub max_steps: u64,
    /// Register values set before the first instruction executes
    pub registers: Vec<(Register, u8)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memory_size: DEFAULT_MEMORY_SIZE,
            max_steps: DEFAULT_MAX_STEPS,
            registers: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults, overridden by `TINY8_MEMORY_SIZE` and `TINY8_MAX_STEPS` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(size) = var_parse(MEMORY_SIZE_VAR)? {
            config.memory_size = size;
        }
        if let Some(steps) = var_parse(MAX_STEPS_VAR)? {
            config.max_steps = steps;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_size == 0 || self.memory_size > MEMORY_MAX {
            return Err(ConfigError::MemorySize(self.memory_size));
        }
        Ok(())
    }

    /// Add a starting register value. Later assignments to the same register win.
    pub fn set_register(&mut self, reg: Register, val: u8) {
        self.registers.retain(|&(r, _)| r != reg);
        self.registers.push((reg, val));
    }
}

/// Parse a command-line register assignment such as `r16=0x20` or `R3=-1`.
pub fn parse_register_assignment(text: &str) -> Result<(Register, u8), ConfigError> {
    let err = || ConfigError::RegisterAssignment(text.to_string());
    let (reg, val) = text.split_once('=').ok_or_else(err)?;
    let reg = reg.trim().parse::<Register>().map_err(|_| err())?;
    let val = crate::operand::parse_number(val.trim())
        .filter(|v| (-128..=255).contains(v))
        .ok_or_else(err)?;
    Ok((reg, val as u8))
}

/// Plain output requested through the environment.
pub fn is_minimal() -> bool {
    var_is(MINIMAL_VAR, "1")
}

fn var_parse<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value }),
        Err(_) => Ok(None),
    }
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}
