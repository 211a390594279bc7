//! A small in-process assembler for the instruction vocabulary the engine
//! injects: `lw`, `sw`, `addi`, `csrr`, `csrw`, `csrrw`, `csrrs`, `ebreak`.
//!
//! Injection sequences issue the same handful of source lines hundreds of
//! times, so [`Assembler`] memoizes text → word.

use core::fmt::{self, Display};
use std::collections::HashMap;

use super::parse_gpr;

const OPC_LOAD: u32 = 0x03;
const OPC_STORE: u32 = 0x23;
const OPC_OP_IMM: u32 = 0x13;
const OPC_SYSTEM: u32 = 0x73;

pub const EBREAK: u32 = 0x0010_0073;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    UnknownMnemonic(String),
    BadOperands(String),
    ImmOutOfRange(i64),
}

impl Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::UnknownMnemonic(m) => write!(f, "unknown mnemonic: {}", m),
            AsmError::BadOperands(line) => write!(f, "malformed operands: {}", line),
            AsmError::ImmOutOfRange(v) => write!(f, "immediate out of range: {}", v),
        }
    }
}

impl std::error::Error for AsmError {}

fn i_type(opcode: u32, funct3: u32, rd: u32, rs1: u32, imm: i32) -> Result<u32, AsmError> {
    if !(-2048..=2047).contains(&imm) {
        return Err(AsmError::ImmOutOfRange(imm as i64));
    }
    let imm = (imm as u32) & 0xFFF;
    Ok((imm << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode)
}

fn s_type(funct3: u32, rs1: u32, rs2: u32, imm: i32) -> Result<u32, AsmError> {
    if !(-2048..=2047).contains(&imm) {
        return Err(AsmError::ImmOutOfRange(imm as i64));
    }
    let imm = (imm as u32) & 0xFFF;
    Ok(((imm >> 5) << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | ((imm & 0x1F) << 7)
        | OPC_STORE)
}

fn csr_type(funct3: u32, rd: u32, rs1: u32, csr: u32) -> u32 {
    (csr << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | OPC_SYSTEM
}

fn reg_operand(tok: &str) -> Result<u32, AsmError> {
    parse_gpr(tok)
        .map(u32::from)
        .ok_or_else(|| AsmError::BadOperands(tok.to_string()))
}

fn int_operand(tok: &str) -> Result<i64, AsmError> {
    let (digits, radix, neg) = match tok.strip_prefix('-') {
        Some(rest) => (rest, 10, true),
        None => (tok, 10, false),
    };
    let (digits, radix) = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (digits, radix),
    };
    let v = i64::from_str_radix(digits, radix)
        .map_err(|_| AsmError::BadOperands(tok.to_string()))?;
    Ok(if neg { -v } else { v })
}

/// A CSR operand is either a known mnemonic or a numeric address.
fn csr_operand(tok: &str) -> Result<u32, AsmError> {
    if let Some(addr) = super::csr_addr(tok) {
        return Ok(addr);
    }
    let v = int_operand(tok)?;
    if !(0..=0xFFF).contains(&v) {
        return Err(AsmError::ImmOutOfRange(v));
    }
    Ok(v as u32)
}

/// Split `imm(rs1)` into its parts.
fn mem_operand(tok: &str) -> Result<(i32, u32), AsmError> {
    let open = tok.find('(').ok_or_else(|| AsmError::BadOperands(tok.to_string()))?;
    let close = tok.rfind(')').ok_or_else(|| AsmError::BadOperands(tok.to_string()))?;
    if close != tok.len() - 1 || close <= open {
        return Err(AsmError::BadOperands(tok.to_string()));
    }
    let imm = if open == 0 { 0 } else { int_operand(&tok[..open])? as i32 };
    let rs1 = reg_operand(&tok[open + 1..close])?;
    Ok((imm, rs1))
}

fn encode_line(line: &str) -> Result<u32, AsmError> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let mnemonic = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");
    let ops: Vec<&str> = rest
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let bad = || AsmError::BadOperands(line.to_string());

    match mnemonic {
        "ebreak" => {
            if !ops.is_empty() {
                return Err(bad());
            }
            Ok(EBREAK)
        }
        "lw" => {
            let &[rd, mem] = ops.as_slice() else { return Err(bad()) };
            let (imm, rs1) = mem_operand(mem)?;
            i_type(OPC_LOAD, 0b010, reg_operand(rd)?, rs1, imm)
        }
        "sw" => {
            let &[rs2, mem] = ops.as_slice() else { return Err(bad()) };
            let (imm, rs1) = mem_operand(mem)?;
            s_type(0b010, rs1, reg_operand(rs2)?, imm)
        }
        "addi" => {
            let &[rd, rs1, imm] = ops.as_slice() else { return Err(bad()) };
            i_type(OPC_OP_IMM, 0b000, reg_operand(rd)?, reg_operand(rs1)?, int_operand(imm)? as i32)
        }
        // csrw csr, rs  ==  csrrw x0, csr, rs
        "csrw" => {
            let &[csr, rs] = ops.as_slice() else { return Err(bad()) };
            Ok(csr_type(0b001, 0, reg_operand(rs)?, csr_operand(csr)?))
        }
        // csrr rd, csr  ==  csrrs rd, csr, x0
        "csrr" => {
            let &[rd, csr] = ops.as_slice() else { return Err(bad()) };
            Ok(csr_type(0b010, reg_operand(rd)?, 0, csr_operand(csr)?))
        }
        "csrrw" => {
            let &[rd, csr, rs] = ops.as_slice() else { return Err(bad()) };
            Ok(csr_type(0b001, reg_operand(rd)?, reg_operand(rs)?, csr_operand(csr)?))
        }
        "csrrs" => {
            let &[rd, csr, rs] = ops.as_slice() else { return Err(bad()) };
            Ok(csr_type(0b010, reg_operand(rd)?, reg_operand(rs)?, csr_operand(csr)?))
        }
        other => Err(AsmError::UnknownMnemonic(other.to_string())),
    }
}

/// Text → machine-word assembler with a memoization cache.
#[derive(Debug, Default)]
pub struct Assembler {
    cache: HashMap<String, u32>,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler::default()
    }

    /// Assemble a single line to exactly one 32-bit word.
    pub fn assemble_line(&mut self, line: &str) -> Result<u32, AsmError> {
        let line = line.trim();
        if let Some(&word) = self.cache.get(line) {
            return Ok(word);
        }
        let word = encode_line(line)?;
        self.cache.insert(line.to_string(), word);
        Ok(word)
    }

    /// Assemble a sequence of lines, one word per line.
    pub fn assemble(&mut self, lines: &[&str]) -> Result<Vec<u32>, AsmError> {
        lines.iter().map(|l| self.assemble_line(l)).collect()
    }
}
