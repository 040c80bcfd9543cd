use crate::symbol::{Flag, Register, REGISTER_COUNT};

/// A register was written while executing `step`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegisterChange {
    pub step: u64,
    pub register: Register,
    pub value: u8,
}

/// A memory byte was written while executing `step`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemoryChange {
    pub step: u64,
    pub addr: u16,
    pub value: u8,
}

/// Complete CPU state after executing `step`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StepSnapshot {
    pub step: u64,
    /// Address of the instruction that was executed
    pub pc: u16,
    /// Address of the next instruction to execute
    pub next_pc: u16,
    /// Executed instruction, rendered as assembly
    pub instr: String,
    pub sp: u16,
    pub sreg: u8,
    pub regs: [u8; REGISTER_COUNT],
    /// Non-zero memory bytes in address order. Memory starts zeroed, so
    /// every address missing here holds zero.
    pub mem: Vec<(u16, u8)>,
}

impl StepSnapshot {
    pub fn reg(&self, reg: Register) -> u8 {
        self.regs[reg.index()]
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.sreg & (1 << flag.bit()) != 0
    }

    pub fn mem(&self, addr: u16) -> u8 {
        self.mem
            .binary_search_by_key(&addr, |&(a, _)| a)
            .map(|idx| self.mem[idx].1)
            .unwrap_or(0)
    }
}

/// Append-only execution history. Entries are ordered by step, which lets any
/// step be inspected by lookup instead of re-execution.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Trace {
    registers: Vec<RegisterChange>,
    memory: Vec<MemoryChange>,
    steps: Vec<StepSnapshot>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_register(&mut self, step: u64, register: Register, value: u8) {
        debug_assert!(self.registers.last().map_or(true, |last| last.step <= step));
        self.registers.push(RegisterChange {
            step,
            register,
            value,
        });
    }

    pub(crate) fn record_memory(&mut self, step: u64, addr: u16, value: u8) {
        debug_assert!(self.memory.last().map_or(true, |last| last.step <= step));
        self.memory.push(MemoryChange { step, addr, value });
    }

    pub(crate) fn record_step(&mut self, snapshot: StepSnapshot) {
        debug_assert!(self.steps.last().map_or(true, |last| last.step < snapshot.step));
        self.steps.push(snapshot);
    }

    pub fn registers(&self) -> &[RegisterChange] {
        &self.registers
    }

    pub fn memory(&self) -> &[MemoryChange] {
        &self.memory
    }

    pub fn steps(&self) -> &[StepSnapshot] {
        &self.steps
    }

    pub fn snapshot(&self, step: u64) -> Option<&StepSnapshot> {
        self.steps
            .binary_search_by_key(&step, |snap| snap.step)
            .ok()
            .map(|idx| &self.steps[idx])
    }

    /// Register writes made while executing `step`.
    pub fn registers_at(&self, step: u64) -> &[RegisterChange] {
        let start = self.registers.partition_point(|change| change.step < step);
        let end = self.registers.partition_point(|change| change.step <= step);
        &self.registers[start..end]
    }

    /// Memory writes made while executing `step`.
    pub fn memory_at(&self, step: u64) -> &[MemoryChange] {
        let start = self.memory.partition_point(|change| change.step < step);
        let end = self.memory.partition_point(|change| change.step <= step);
        &self.memory[start..end]
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.registers.is_empty() && self.memory.is_empty()
    }
}
