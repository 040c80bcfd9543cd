use crate::air::{AluOp, Instr, MemRef, Program, UnaryOp, WordOp};
use crate::env::{Config, ConfigError};
use crate::error::RuntimeError;
use crate::memory::Memory;
use crate::symbol::{Flag, Register, REGISTER_COUNT};
use crate::trace::{StepSnapshot, Trace};

/// Status register.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Sreg(u8);

impl Sreg {
    pub fn get(self, flag: Flag) -> bool {
        self.0 & (1 << flag.bit()) != 0
    }

    pub fn set(&mut self, flag: Flag, val: bool) {
        if val {
            self.0 |= 1 << flag.bit();
        } else {
            self.0 &= !(1 << flag.bit());
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Set Z, N and S from `res`, with V given.
    fn set_znv(&mut self, res: u8, v: bool) {
        let n = res & 0x80 != 0;
        self.set(Flag::Z, res == 0);
        self.set(Flag::N, n);
        self.set(Flag::V, v);
        self.set(Flag::S, n ^ v);
    }
}

/// Why a run stopped without error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Halt {
    /// Program counter reached the end of the program
    EndOfProgram,
    /// Step bound reached, usually a `done: jmp done` loop
    StepLimit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RunSummary {
    pub halt: Halt,
    /// Total steps executed by this CPU
    pub steps: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepOutcome {
    /// An instruction was executed
    Executed,
    /// Nothing left to execute
    Finished,
}

/// Where the program counter goes after an instruction.
enum Next {
    Advance,
    Skip,
    Jump(u16),
}

/// Complete machine state for one run of one program.
pub struct Cpu {
    regs: [u8; REGISTER_COUNT],
    sreg: Sreg,
    pc: u16,
    sp: u16,
    mem: Memory,
    program: Program,
    max_steps: u64,
    steps: u64,
    trace: Trace,
}

impl Cpu {
    /// Load `program` into a fresh CPU. Starting register values from `config`
    /// are applied before execution and are not part of the trace.
    pub fn new(program: Program, config: &Config) -> Result<Cpu, ConfigError> {
        config.validate()?;
        Ok(Cpu::with_config(program, config))
    }

    /// Load `program` with the default configuration.
    pub fn load(program: Program) -> Cpu {
        Cpu::with_config(program, &Config::default())
    }

    fn with_config(program: Program, config: &Config) -> Cpu {
        let mut regs = [0; REGISTER_COUNT];
        for &(reg, val) in &config.registers {
            regs[reg.index()] = val;
        }
        log::debug!(
            "loaded {} instructions, {} bytes of memory",
            program.len(),
            config.memory_size
        );
        Cpu {
            regs,
            sreg: Sreg::default(),
            pc: 0,
            sp: (config.memory_size - 1) as u16,
            mem: Memory::new(config.memory_size),
            program,
            max_steps: config.max_steps,
            steps: 0,
            trace: Trace::new(),
        }
    }

    pub fn reg(&self, reg: Register) -> u8 {
        self.regs[reg.index()]
    }

    /// Read a register by index, `None` if the index is not 0-31.
    pub fn reg_at(&self, idx: usize) -> Option<u8> {
        self.regs.get(idx).copied()
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.regs
    }

    pub fn mem(&self, addr: u16) -> Option<u8> {
        self.mem.read(addr as usize)
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.sreg.get(flag)
    }

    pub fn sreg(&self) -> u8 {
        self.sreg.bits()
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn sp(&self) -> u16 {
        self.sp
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn is_finished(&self) -> bool {
        self.pc as usize >= self.program.len()
    }

    /// Run until the end of the program or the step bound.
    pub fn run(&mut self) -> Result<RunSummary, RuntimeError> {
        log::debug!("run started at pc={} step={}", self.pc, self.steps);
        let halt = loop {
            if self.is_finished() {
                break Halt::EndOfProgram;
            }
            if self.steps >= self.max_steps {
                log::warn!(
                    "stopped after {} steps at pc={}, program did not finish",
                    self.steps,
                    self.pc
                );
                break Halt::StepLimit;
            }
            self.step()?;
        };
        log::debug!("run stopped: {halt:?} after {} steps", self.steps);
        Ok(RunSummary {
            halt,
            steps: self.steps,
        })
    }

    /// Execute the instruction at PC. On error, nothing about the CPU or trace changes.
    pub fn step(&mut self) -> Result<StepOutcome, RuntimeError> {
        let pc = self.pc;
        let Some(&instr) = self.program.get(pc) else {
            return Ok(StepOutcome::Finished);
        };
        log::trace!("{:>5} {:04}: {}", self.steps, pc, instr);

        let next = self.execute(instr)?;
        let len = self.program.len() as u32;
        self.pc = match next {
            Next::Advance => (pc as u32 + 1).min(len) as u16,
            // Skipping past the end finishes the program
            Next::Skip => (pc as u32 + 2).min(len) as u16,
            Next::Jump(target) => target,
        };

        self.trace.record_step(StepSnapshot {
            step: self.steps,
            pc,
            next_pc: self.pc,
            instr: instr.to_string(),
            sp: self.sp,
            sreg: self.sreg.bits(),
            regs: self.regs,
            mem: self.mem.nonzero(),
        });
        self.steps += 1;
        Ok(StepOutcome::Executed)
    }

    fn execute(&mut self, instr: Instr) -> Result<Next, RuntimeError> {
        match instr {
            Instr::Nop => {}
            Instr::Sei => self.sreg.set(Flag::I, true),
            Instr::Cli => self.sreg.set(Flag::I, false),
            Instr::Ldi { rd, k } => self.set_reg(rd, k),
            Instr::Mov { rd, rr } => self.set_reg(rd, self.reg(rr)),
            Instr::Ld { rd, src } => {
                let val = self.read_mem(self.address(src))?;
                self.set_reg(rd, val);
            }
            Instr::St { dst, rr } => self.store(self.address(dst), self.reg(rr))?,
            Instr::In { rd, port } => {
                let val = self.read_mem(port as usize)?;
                self.set_reg(rd, val);
            }
            Instr::Out { port, rr } => self.store(port as usize, self.reg(rr))?,
            Instr::Push { rr } => self.push_val(self.reg(rr))?,
            Instr::Pop { rd } => {
                let val = self.pop_val()?;
                self.set_reg(rd, val);
            }
            Instr::Alu { op, rd, rr } => self.alu(op, rd, self.reg(rr)),
            Instr::AluImm { op, rd, k } => self.alu(op.alu(), rd, k),
            Instr::Unary { op, rd } => self.unary(op, rd),
            Instr::Mul { rd, rr } => {
                let prod = self.reg(rd) as u16 * self.reg(rr) as u16;
                self.set_pair(rd, prod);
                self.sreg.set(Flag::C, prod & 0x8000 != 0);
                self.sreg.set(Flag::Z, prod == 0);
            }
            Instr::Div { rd, rr } => {
                let (a, b) = (self.reg(rd), self.reg(rr));
                if b == 0 {
                    return Err(RuntimeError::DivisionByZero {
                        pc: self.pc,
                        step: self.steps,
                    });
                }
                self.set_reg(rd, a / b);
                self.set_reg(pair_high(rd), a % b);
            }
            Instr::Word { op, rd, k } => self.word(op, rd, k),
            Instr::Cp { rd, rr } => {
                self.sub(self.reg(rd), self.reg(rr), false);
            }
            Instr::Cpi { rd, k } => {
                self.sub(self.reg(rd), k, false);
            }
            Instr::Cpse { rd, rr } => {
                if self.reg(rd) == self.reg(rr) {
                    return Ok(Next::Skip);
                }
            }
            Instr::IoBit { set, port, bit } => {
                let val = self.read_mem(port as usize)?;
                let val = if set { val | (1 << bit) } else { val & !(1 << bit) };
                self.store(port as usize, val)?;
            }
            Instr::SkipReg { rr, bit, if_set } => {
                if (self.reg(rr) & (1 << bit) != 0) == if_set {
                    return Ok(Next::Skip);
                }
            }
            Instr::SkipIo { port, bit, if_set } => {
                if (self.read_mem(port as usize)? & (1 << bit) != 0) == if_set {
                    return Ok(Next::Skip);
                }
            }
            Instr::Jmp { target } => return self.jump(target as i64),
            Instr::Rjmp { offset } => return self.jump(self.pc as i64 + 1 + offset as i64),
            Instr::Call { target } => return self.call(target as i64),
            Instr::Rcall { offset } => return self.call(self.pc as i64 + 1 + offset as i64),
            Instr::Ret | Instr::Reti => return self.ret(),
            Instr::Branch { cond, target } => {
                let (flag, want) = cond.test();
                if self.sreg.get(flag) == want {
                    return self.jump(target as i64);
                }
            }
        }
        Ok(Next::Advance)
    }

    fn set_reg(&mut self, reg: Register, val: u8) {
        self.regs[reg.index()] = val;
        self.trace.record_register(self.steps, reg, val);
    }

    /// Write a little-endian word to `lo` and the register above it.
    fn set_pair(&mut self, lo: Register, val: u16) {
        self.set_reg(lo, val as u8);
        self.set_reg(pair_high(lo), (val >> 8) as u8);
    }

    fn pair(&self, lo: Register) -> u16 {
        self.reg(lo) as u16 | (self.reg(pair_high(lo)) as u16) << 8
    }

    fn address(&self, mem_ref: MemRef) -> usize {
        match mem_ref {
            MemRef::Indirect(reg) => self.reg(reg) as usize,
            MemRef::Direct(addr) => addr as usize,
        }
    }

    fn mem_error(&self, addr: i64) -> RuntimeError {
        RuntimeError::MemoryOutOfRange {
            pc: self.pc,
            addr,
            size: self.mem.size(),
            step: self.steps,
        }
    }

    fn read_mem(&self, addr: usize) -> Result<u8, RuntimeError> {
        self.mem.read(addr).ok_or_else(|| self.mem_error(addr as i64))
    }

    fn store(&mut self, addr: usize, val: u8) -> Result<(), RuntimeError> {
        if self.mem.write(addr, val).is_none() {
            return Err(self.mem_error(addr as i64));
        }
        self.trace.record_memory(self.steps, addr as u16, val);
        Ok(())
    }

    /// Stack pointer moved by `offset`. SP never wraps through either end of the address space.
    fn stack_addr(&self, offset: i64) -> Result<u16, RuntimeError> {
        let addr = self.sp as i64 + offset;
        u16::try_from(addr).map_err(|_| self.mem_error(addr))
    }

    fn push_val(&mut self, val: u8) -> Result<(), RuntimeError> {
        let sp = self.stack_addr(-1)?;
        self.store(self.sp as usize, val)?;
        self.sp = sp;
        Ok(())
    }

    fn pop_val(&mut self) -> Result<u8, RuntimeError> {
        let sp = self.stack_addr(1)?;
        let val = self.read_mem(sp as usize)?;
        self.sp = sp;
        Ok(val)
    }

    /// Validate a control transfer target. The end of the program is a valid target.
    fn check_target(&self, target: i64) -> Result<u16, RuntimeError> {
        if (0..=self.program.len() as i64).contains(&target) {
            Ok(target as u16)
        } else {
            Err(RuntimeError::PcOutOfRange {
                pc: self.pc,
                target,
                step: self.steps,
            })
        }
    }

    fn jump(&self, target: i64) -> Result<Next, RuntimeError> {
        self.check_target(target).map(Next::Jump)
    }

    fn call(&mut self, target: i64) -> Result<Next, RuntimeError> {
        let target = self.check_target(target)?;
        // Both stack bytes are checked before either is written
        let lo_addr = self.stack_addr(-1)?;
        self.stack_addr(-2)?;
        for addr in [self.sp, lo_addr] {
            self.read_mem(addr as usize)?;
        }
        let ret = self.pc + 1;
        self.push_val((ret >> 8) as u8)?;
        self.push_val(ret as u8)?;
        Ok(Next::Jump(target))
    }

    fn ret(&mut self) -> Result<Next, RuntimeError> {
        let lo_addr = self.stack_addr(1)?;
        let hi_addr = self.stack_addr(2)?;
        let lo = self.read_mem(lo_addr as usize)?;
        let hi = self.read_mem(hi_addr as usize)?;
        let target = self.check_target((hi as i64) << 8 | lo as i64)?;
        self.sp = hi_addr;
        Ok(Next::Jump(target))
    }

    fn alu(&mut self, op: AluOp, rd: Register, b: u8) {
        let a = self.reg(rd);
        let carry = self.sreg.get(Flag::C);
        let res = match op {
            AluOp::Add => self.add(a, b, false),
            AluOp::Adc => self.add(a, b, carry),
            AluOp::Sub => self.sub(a, b, false),
            AluOp::Sbc => self.sub(a, b, carry),
            AluOp::And => self.logic(a & b),
            AluOp::Or => self.logic(a | b),
            AluOp::Eor => self.logic(a ^ b),
        };
        self.set_reg(rd, res);
    }

    fn add(&mut self, a: u8, b: u8, carry: bool) -> u8 {
        let c = carry as u8;
        let wide = a as u16 + b as u16 + c as u16;
        let res = wide as u8;
        self.sreg.set(Flag::C, wide > 0xFF);
        self.sreg.set(Flag::H, (a & 0x0F) + (b & 0x0F) + c > 0x0F);
        self.sreg.set_znv(res, !(a ^ b) & (a ^ res) & 0x80 != 0);
        res
    }

    fn sub(&mut self, a: u8, b: u8, borrow: bool) -> u8 {
        let c = borrow as u8;
        let res = a.wrapping_sub(b).wrapping_sub(c);
        self.sreg.set(Flag::C, (a as u16) < b as u16 + c as u16);
        self.sreg.set(Flag::H, (a & 0x0F) < (b & 0x0F) + c);
        self.sreg.set_znv(res, (a ^ b) & (a ^ res) & 0x80 != 0);
        res
    }

    /// Flags for logical results: V cleared, C untouched.
    fn logic(&mut self, res: u8) -> u8 {
        self.sreg.set_znv(res, false);
        res
    }

    fn shift(&mut self, res: u8, carry: bool) -> u8 {
        let n = res & 0x80 != 0;
        self.sreg.set(Flag::C, carry);
        self.sreg.set_znv(res, n ^ carry);
        res
    }

    fn unary(&mut self, op: UnaryOp, rd: Register) {
        let a = self.reg(rd);
        let carry = self.sreg.get(Flag::C);
        let res = match op {
            UnaryOp::Inc => {
                let res = a.wrapping_add(1);
                self.sreg.set_znv(res, res == 0x80);
                res
            }
            UnaryOp::Dec => {
                let res = a.wrapping_sub(1);
                self.sreg.set_znv(res, res == 0x7F);
                res
            }
            UnaryOp::Neg => self.sub(0, a, false),
            UnaryOp::Com => self.logic(!a),
            UnaryOp::Clr => self.logic(0),
            UnaryOp::Ser => self.logic(0xFF),
            UnaryOp::Swap => self.logic(a.rotate_left(4)),
            UnaryOp::Tst => {
                self.logic(a);
                return;
            }
            UnaryOp::Lsl => self.shift(a << 1, a & 0x80 != 0),
            UnaryOp::Lsr => self.shift(a >> 1, a & 0x01 != 0),
            UnaryOp::Rol => self.shift(a << 1 | carry as u8, a & 0x80 != 0),
            UnaryOp::Ror => self.shift(a >> 1 | (carry as u8) << 7, a & 0x01 != 0),
        };
        self.set_reg(rd, res);
    }

    fn word(&mut self, op: WordOp, rd: Register, k: u8) {
        let w = self.pair(rd);
        let res = match op {
            WordOp::Adiw => w.wrapping_add(k as u16),
            WordOp::Sbiw => w.wrapping_sub(k as u16),
        };
        let hi7 = w & 0x8000 != 0;
        let r15 = res & 0x8000 != 0;
        let (v, c) = match op {
            WordOp::Adiw => (!hi7 && r15, !r15 && hi7),
            WordOp::Sbiw => (hi7 && !r15, r15 && !hi7),
        };
        self.set_pair(rd, res);
        self.sreg.set(Flag::C, c);
        self.sreg.set(Flag::Z, res == 0);
        self.sreg.set(Flag::N, r15);
        self.sreg.set(Flag::V, v);
        self.sreg.set(Flag::S, r15 ^ v);
    }
}

/// Upper register of a pair. The assembler only accepts `rd <= R30` for pair instructions.
fn pair_high(lo: Register) -> Register {
    lo.next().unwrap_or(lo)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::error::ErrorClass;
    use crate::parser::assemble;

    fn r(idx: u8) -> Register {
        Register::new(idx).unwrap()
    }

    fn cpu(src: &str) -> Cpu {
        Cpu::load(assemble(src).unwrap())
    }

    fn run(src: &str) -> Cpu {
        let mut cpu = cpu(src);
        cpu.run().unwrap();
        cpu
    }

    fn run_with_steps(src: &str, max_steps: u64) -> (Cpu, RunSummary) {
        let config = Config {
            max_steps,
            ..Config::default()
        };
        let mut cpu = Cpu::new(assemble(src).unwrap(), &config).unwrap();
        let summary = cpu.run().unwrap();
        (cpu, summary)
    }

    #[test]
    fn fibonacci() {
        let src = "
            ldi r16, 0
            ldi r17, 1
            ldi r18, 9
        loop:
            add r16, r17
            mov r19, r16
            mov r16, r17
            mov r17, r19
            dec r18
            brne loop
        done: jmp done
        ";
        let (cpu, summary) = run_with_steps(src, 100);
        assert_eq!(cpu.reg(r(17)), 55);
        assert_eq!(summary.halt, Halt::StepLimit);
        assert_eq!(summary.steps, 100);
        assert_eq!(cpu.pc(), 9);
    }

    #[test]
    fn inc_wraps_to_zero() {
        let cpu = run("ldi r16, 255\ninc r16");
        assert_eq!(cpu.reg(r(16)), 0);
        assert!(cpu.flag(Flag::Z));
        assert!(!cpu.flag(Flag::V));
    }

    #[test]
    fn div_quotient_remainder() {
        let cpu = run("ldi r16, 10\nldi r17, 3\ndiv r16, r17");
        assert_eq!(cpu.reg(r(16)), 3);
        assert_eq!(cpu.reg(r(17)), 1);
    }

    #[test]
    fn div_by_zero_truncates_trace() {
        let mut cpu = cpu("ldi r16, 5\nldi r17, 0\ndiv r16, r17\nnop");
        let err = cpu.run().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Arithmetic);
        assert_eq!(err, RuntimeError::DivisionByZero { pc: 2, step: 2 });
        assert_eq!(cpu.trace().steps().len(), 2);
        assert_eq!(cpu.trace().registers().len(), 2);
        assert_eq!(cpu.pc(), 2);
        assert_eq!(cpu.reg(r(16)), 5);
    }

    #[test]
    fn end_of_program() {
        let mut cpu = cpu("nop\nnop");
        assert_eq!(cpu.step(), Ok(StepOutcome::Executed));
        let summary = cpu.run().unwrap();
        assert_eq!(summary.halt, Halt::EndOfProgram);
        assert_eq!(summary.steps, 2);
        assert_eq!(cpu.step(), Ok(StepOutcome::Finished));
        assert_eq!(cpu.steps(), 2);
    }

    #[test]
    fn empty_program_finishes() {
        let summary = cpu("; nothing\n").run().unwrap();
        assert_eq!(summary.halt, Halt::EndOfProgram);
        assert_eq!(summary.steps, 0);
    }

    #[test]
    fn add_flags() {
        let cpu = run("ldi r16, 200\nldi r17, 100\nadd r16, r17");
        assert_eq!(cpu.reg(r(16)), 44);
        assert!(cpu.flag(Flag::C));
        assert!(!cpu.flag(Flag::Z));

        let cpu = run("ldi r16, 127\nldi r17, 1\nadd r16, r17");
        assert_eq!(cpu.reg(r(16)), 128);
        assert!(cpu.flag(Flag::V));
        assert!(cpu.flag(Flag::N));
        assert!(!cpu.flag(Flag::S));
        assert!(cpu.flag(Flag::H));
        assert!(!cpu.flag(Flag::C));
    }

    #[test]
    fn adc_uses_carry() {
        let cpu = run("ldi r16, 255\nldi r17, 1\nadd r16, r17\nldi r18, 0\nldi r19, 0\nadc r18, r19");
        assert_eq!(cpu.reg(r(18)), 1);
        assert!(!cpu.flag(Flag::C));
    }

    #[test]
    fn sub_and_compare() {
        let cpu = run("ldi r16, 3\nldi r17, 5\nsub r16, r17");
        assert_eq!(cpu.reg(r(16)), 254);
        assert!(cpu.flag(Flag::C));
        assert!(cpu.flag(Flag::N));

        let cpu = run("ldi r16, 7\ncpi r16, 7");
        assert_eq!(cpu.reg(r(16)), 7);
        assert!(cpu.flag(Flag::Z));
        assert!(!cpu.flag(Flag::C));

        let cpu = run("ldi r16, 0\nldi r17, 1\nsub r16, r17\nldi r18, 5\nsbci r18, 2");
        assert_eq!(cpu.reg(r(18)), 2);
    }

    #[test]
    fn neg_and_logic() {
        let cpu = run("ldi r16, 1\nneg r16");
        assert_eq!(cpu.reg(r(16)), 0xFF);
        assert!(cpu.flag(Flag::C));

        let cpu = run("ldi r16, 255\nldi r17, 1\nadd r16, r17\nldi r18, 0xF0\nandi r18, 0x3C");
        assert_eq!(cpu.reg(r(18)), 0x30);
        // Logic keeps the carry from the add
        assert!(cpu.flag(Flag::C));
        assert!(!cpu.flag(Flag::V));

        let cpu = run("ldi r16, 0x12\nswap r16\nldi r17, 0x0F\ncom r17\nser r18\nclr r19");
        assert_eq!(cpu.reg(r(16)), 0x21);
        assert_eq!(cpu.reg(r(17)), 0xF0);
        assert_eq!(cpu.reg(r(18)), 0xFF);
        assert_eq!(cpu.reg(r(19)), 0);
        assert!(cpu.flag(Flag::Z));
    }

    #[test]
    fn tst_sets_flags_only() {
        let mut cpu = cpu("ldi r16, 0x80\ntst r16");
        cpu.run().unwrap();
        assert!(cpu.flag(Flag::N));
        assert_eq!(cpu.trace().registers_at(1).len(), 0);
    }

    #[test]
    fn shifts_and_rotates() {
        let cpu = run("ldi r16, 0x81\nlsl r16");
        assert_eq!(cpu.reg(r(16)), 0x02);
        assert!(cpu.flag(Flag::C));

        let cpu = run("ldi r16, 0x01\nlsr r16");
        assert_eq!(cpu.reg(r(16)), 0);
        assert!(cpu.flag(Flag::C));
        assert!(cpu.flag(Flag::Z));

        let cpu = run("ldi r16, 0x80\nlsl r16\nldi r17, 0x00\nrol r17");
        assert_eq!(cpu.reg(r(17)), 0x01);
        assert!(!cpu.flag(Flag::C));

        let cpu = run("ldi r16, 0x01\nlsr r16\nldi r17, 0x02\nror r17");
        assert_eq!(cpu.reg(r(17)), 0x81);
        assert!(cpu.flag(Flag::N));
    }

    #[test]
    fn mul_and_word_ops() {
        let cpu = run("ldi r16, 200\nldi r17, 200\nmul r16, r17");
        assert_eq!(cpu.reg(r(16)), (40000u16 & 0xFF) as u8);
        assert_eq!(cpu.reg(r(17)), (40000u16 >> 8) as u8);
        assert!(cpu.flag(Flag::C));

        let cpu = run("ldi r24, 0xFF\nldi r25, 0x00\nadiw r24, 1");
        assert_eq!(cpu.reg(r(24)), 0x00);
        assert_eq!(cpu.reg(r(25)), 0x01);

        let cpu = run("ldi r24, 0\nldi r25, 0\nsbiw r24, 1");
        assert_eq!(cpu.reg(r(24)), 0xFF);
        assert_eq!(cpu.reg(r(25)), 0xFF);
        assert!(cpu.flag(Flag::C));
        assert!(cpu.flag(Flag::N));
    }

    #[test]
    fn load_store_indirect() {
        let mut cpu = cpu("ldi r16, 100\nldi r17, 42\nst r16, r17\nld r18, r16");
        cpu.run().unwrap();
        assert_eq!(cpu.mem(100), Some(42));
        assert_eq!(cpu.reg(r(18)), 42);
        assert_eq!(cpu.trace().memory().len(), 1);
        assert_eq!(cpu.trace().memory()[0].step, 2);

        let cpu = run("ldi r16, 0xAA\nst 1500, r16\nld r17, 1500");
        assert_eq!(cpu.mem(1500), Some(0xAA));
        assert_eq!(cpu.reg(r(17)), 0xAA);
    }

    #[test]
    fn direct_access_outside_memory() {
        let mut cpu = cpu("ldi r16, 1\nst 4000, r16");
        cpu.step().unwrap();
        let err = cpu.step().unwrap_err();
        assert_eq!(
            err,
            RuntimeError::MemoryOutOfRange {
                pc: 1,
                addr: 4000,
                size: 2048,
                step: 1
            }
        );
        assert!(cpu.trace().memory().is_empty());
    }

    #[test]
    fn io_bits_and_skips() {
        let src = "
            sbi 0x20, 3
            sbis 0x20, 3
            ldi r16, 1
            cbi 0x20, 3
            sbic 0x20, 3
            ldi r17, 1
            in r18, 0x20
        ";
        let cpu = run(src);
        assert_eq!(cpu.reg(r(16)), 0);
        assert_eq!(cpu.reg(r(17)), 0);
        assert_eq!(cpu.mem(0x20), Some(0));
        assert_eq!(cpu.sreg(), 0);
    }

    #[test]
    fn skip_register_bit_and_cpse() {
        let cpu = run("ldi r16, 4\nsbrs r16, 2\nldi r17, 1\nsbrc r16, 2\nldi r18, 1");
        assert_eq!(cpu.reg(r(17)), 0);
        assert_eq!(cpu.reg(r(18)), 1);

        let cpu = run("ldi r16, 9\nldi r17, 9\ncpse r16, r17\nldi r18, 1");
        assert_eq!(cpu.reg(r(18)), 0);
    }

    #[test]
    fn push_pop_stack() {
        let mut cpu = cpu("ldi r16, 7\npush r16\npop r17");
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.sp(), 2046);
        assert_eq!(cpu.mem(2047), Some(7));
        cpu.step().unwrap();
        assert_eq!(cpu.sp(), 2047);
        assert_eq!(cpu.reg(r(17)), 7);
    }

    #[test]
    fn pop_empty_stack_is_memory_error() {
        let mut cpu = cpu("pop r16");
        let err = cpu.step().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Memory);
        assert_eq!(cpu.sp(), 2047);
    }

    #[test]
    fn call_and_return() {
        let src = "
            ldi r16, 1
            call sub
            ldi r17, 2
            jmp end
        sub:
            ldi r18, 3
            ret
        end:
        ";
        let cpu = run(src);
        assert_eq!(cpu.reg(r(17)), 2);
        assert_eq!(cpu.reg(r(18)), 3);
        assert_eq!(cpu.sp(), 2047);
        // Return address 2, high byte pushed first
        assert_eq!(cpu.mem(2047), Some(0));
        assert_eq!(cpu.mem(2046), Some(2));
    }

    #[test]
    fn relative_jumps() {
        let cpu = run("rjmp skip\nldi r16, 1\nskip: rcall sub\nrjmp 2\nsub: ret\nldi r17, 1");
        assert_eq!(cpu.reg(r(16)), 0);
        assert_eq!(cpu.reg(r(17)), 0);
    }

    #[test]
    fn jump_outside_program() {
        let mut far = cpu("ldi r16, 1\njmp 10");
        let err = far.run().unwrap_err();
        assert_eq!(
            err,
            RuntimeError::PcOutOfRange {
                pc: 1,
                target: 10,
                step: 1
            }
        );
        assert_eq!(err.class(), ErrorClass::Control);

        let mut cpu = cpu("rjmp -5");
        assert!(matches!(
            cpu.run(),
            Err(RuntimeError::PcOutOfRange { target: -4, .. })
        ));
    }

    #[test]
    fn full_memory_stack_does_not_wrap() {
        let config = Config {
            memory_size: 0x10000,
            ..Config::default()
        };
        let mut cpu = Cpu::new(assemble("pop r16").unwrap(), &config).unwrap();
        let err = cpu.step().unwrap_err();
        assert_eq!(
            err,
            RuntimeError::MemoryOutOfRange {
                pc: 0,
                addr: 0x10000,
                size: 0x10000,
                step: 0
            }
        );
        assert_eq!(cpu.sp(), 0xFFFF);
        assert!(cpu.trace().registers().is_empty());
    }

    #[test]
    fn push_below_address_zero() {
        let config = Config {
            memory_size: 1,
            ..Config::default()
        };
        let mut cpu = Cpu::new(assemble("ldi r16, 1\npush r16").unwrap(), &config).unwrap();
        cpu.step().unwrap();
        let err = cpu.step().unwrap_err();
        assert!(matches!(err, RuntimeError::MemoryOutOfRange { addr: -1, .. }));
        assert_eq!(cpu.sp(), 0);
        assert_eq!(cpu.mem(0), Some(0));

        let mut cpu = Cpu::new(assemble("rcall 0").unwrap(), &config).unwrap();
        assert_eq!(cpu.step().unwrap_err().class(), ErrorClass::Memory);
        assert!(cpu.trace().memory().is_empty());
    }

    #[test]
    fn or_and_eor_forms() {
        let src = "
            ldi r16, 0x0F
            ldi r17, 0x30
            or r16, r17
            ori r16, 0x40
            ldi r18, 0x0C
            eor r16, r18
            eori r16, 0x03
        ";
        let cpu = run(src);
        assert_eq!(cpu.reg(r(16)), 0x70);
        assert!(!cpu.flag(Flag::Z));
        assert!(!cpu.flag(Flag::N));
        assert!(!cpu.flag(Flag::V));

        let cpu = run("ldi r16, 0x55\neor r16, r16");
        assert_eq!(cpu.reg(r(16)), 0);
        assert!(cpu.flag(Flag::Z));
    }

    #[test]
    fn sbc_subtracts_borrow() {
        let cpu = run("ldi r16, 0\nldi r17, 1\nsub r16, r17\nldi r18, 5\nldi r19, 2\nsbc r18, r19");
        assert_eq!(cpu.reg(r(18)), 2);
        assert!(!cpu.flag(Flag::C));
    }

    #[test]
    fn sub_overflow_and_half_borrow() {
        let cpu = run("ldi r16, 0x80\nldi r17, 1\nsub r16, r17");
        assert_eq!(cpu.reg(r(16)), 0x7F);
        assert!(cpu.flag(Flag::V));
        assert!(cpu.flag(Flag::H));
        assert!(!cpu.flag(Flag::N));
        assert!(cpu.flag(Flag::S));
        assert!(!cpu.flag(Flag::C));

        let cpu = run("ldi r16, 0\nldi r17, 1\nsub r16, r17\nldi r18, 0x20\nldi r19, 0x0F\nsbc r18, r19");
        assert_eq!(cpu.reg(r(18)), 0x10);
        assert!(cpu.flag(Flag::H));
        assert!(!cpu.flag(Flag::V));
    }

    #[test]
    fn out_writes_port() {
        let mut cpu = cpu("ldi r16, 0x5A\nout 0x30, r16\nin r17, 0x30");
        cpu.run().unwrap();
        assert_eq!(cpu.mem(0x30), Some(0x5A));
        assert_eq!(cpu.reg(r(17)), 0x5A);
        assert_eq!(cpu.trace().memory_at(1).len(), 1);
    }

    #[test]
    fn reti_returns_like_ret() {
        let src = "
            rcall handler
            ldi r17, 2
            rjmp end
        handler:
            ldi r16, 1
            reti
        end:
        ";
        let cpu = run(src);
        assert_eq!(cpu.reg(r(16)), 1);
        assert_eq!(cpu.reg(r(17)), 2);
        assert_eq!(cpu.sp(), 2047);
    }

    #[test]
    fn sign_and_carry_branches() {
        let src = "
            ldi r16, 3
            cpi r16, 3
            breq equal
            ldi r20, 1
        equal:
            cpi r16, 4
            brpl skip
            brge skip
            ldi r17, 1
            brcs carry
            ldi r18, 1
        carry:
            cpi r16, 1
            brcs skip
            ldi r19, 1
        skip:
        ";
        let cpu = run(src);
        assert_eq!(cpu.reg(r(20)), 0);
        assert_eq!(cpu.reg(r(17)), 1);
        assert_eq!(cpu.reg(r(18)), 0);
        assert_eq!(cpu.reg(r(19)), 1);
    }

    #[test]
    fn ret_to_garbage_address() {
        let mut cpu = cpu("ldi r16, 0xFF\npush r16\npush r16\nret");
        let err = cpu.run().unwrap_err();
        assert!(matches!(err, RuntimeError::PcOutOfRange { target: 0xFFFF, .. }));
        assert_eq!(cpu.sp(), 2045);
    }

    #[test]
    fn branches() {
        let src = "
            ldi r16, 5
            cpi r16, 10
            brlt less
            ldi r17, 1
        less:
            brsh never
            brmi negative
            ldi r18, 1
        negative:
        never:
        ";
        let cpu = run(src);
        assert_eq!(cpu.reg(r(17)), 0);
        assert_eq!(cpu.reg(r(18)), 0);
    }

    #[test]
    fn interrupt_flag() {
        let cpu = run("sei");
        assert!(cpu.flag(Flag::I));
        let cpu = run("sei\ncli");
        assert!(!cpu.flag(Flag::I));
    }

    #[test]
    fn starting_registers() {
        let mut config = Config::default();
        config.set_register(r(20), 9);
        let mut cpu = Cpu::new(assemble("inc r20").unwrap(), &config).unwrap();
        cpu.run().unwrap();
        assert_eq!(cpu.reg(r(20)), 10);
        assert_eq!(cpu.trace().registers().len(), 1);
    }

    #[test]
    fn invalid_memory_size() {
        let config = Config {
            memory_size: 0,
            ..Config::default()
        };
        assert!(Cpu::new(assemble("nop").unwrap(), &config).is_err());
    }

    #[test]
    fn snapshots_record_state() {
        let mut cpu = cpu("ldi r16, 3\nldi r17, 9\nst r16, r17");
        cpu.run().unwrap();
        let first = &cpu.trace().steps()[0];
        assert_eq!(first.step, 0);
        assert_eq!(first.instr, "LDI R16, 3");
        assert_eq!(first.reg(r(16)), 3);
        let last = cpu.trace().snapshot(2).unwrap();
        assert_eq!(last.mem(3), 9);
        assert_eq!(last.next_pc, 3);
        assert_eq!(last.sp, 2047);
    }

    #[test]
    fn every_write_is_traced() {
        let mut cpu = cpu("ldi r16, 1\nldi r16, 1");
        cpu.run().unwrap();
        assert_eq!(cpu.trace().registers().len(), 2);
    }

    proptest! {
        #[test]
        fn register_write_read(idx in 16u8..32, val in 0u8..=255) {
            let cpu = run(&format!("ldi r{idx}, {val}\nmov r{}, r{idx}", idx - 16));
            prop_assert_eq!(cpu.reg(r(idx)), val);
            prop_assert_eq!(cpu.reg(r(idx - 16)), val);
        }

        #[test]
        fn add_carry(a in 0u8..=255, b in 0u8..=255) {
            let cpu = run(&format!("ldi r16, {a}\nldi r17, {b}\nadd r16, r17"));
            prop_assert_eq!(cpu.reg(r(16)), a.wrapping_add(b));
            prop_assert_eq!(cpu.flag(Flag::C), a as u16 + b as u16 > 255);
        }

        #[test]
        fn sub_borrow(a in 0u8..=255, b in 0u8..=255) {
            let cpu = run(&format!("ldi r16, {a}\nldi r17, {b}\nsub r16, r17"));
            prop_assert_eq!(cpu.reg(r(16)), a.wrapping_sub(b));
            prop_assert_eq!(cpu.flag(Flag::C), a < b);
            prop_assert_eq!(cpu.flag(Flag::Z), a == b);
        }

        #[test]
        fn deterministic(a in 0u8..=255, b in 1u8..=255) {
            let src = format!(
                "ldi r16, {a}\nldi r17, {b}\nloop: sub r16, r17\nbrcc loop\npush r16\ndone: jmp done"
            );
            let (first, _) = run_with_steps(&src, 300);
            let (second, _) = run_with_steps(&src, 300);
            prop_assert_eq!(first.trace(), second.trace());
        }
    }
}
