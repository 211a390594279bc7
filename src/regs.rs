//! The Debug Module register catalog.
//!
//! Every higher layer speaks in register ids and field names; the tables in
//! this module are the single source of truth for addresses and bit layout.
//! All operations are pure functions over compile-time data.

use core::fmt::{self, Display};

/// A bitfield within a 32-bit DM register. `msb`/`lsb` are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub msb: u8,
    pub lsb: u8,
}

impl Field {
    pub const fn width(&self) -> u32 {
        (self.msb - self.lsb + 1) as u32
    }

    pub const fn mask(&self) -> u32 {
        // A 32-wide field must not overflow the shift.
        if self.width() == 32 {
            u32::MAX
        } else {
            ((1u32 << self.width()) - 1) << self.lsb
        }
    }
}

/// Debug Module register identifiers, indexable into [`DM_REGS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DmReg {
    Platform,
    Dconfig,
    Dselect,
    Wmask,
    Wactive,
    Wstatus,
    Dctrl,
    Dpc,
    Dinject,
    Dscratch,
}

/// Immutable register descriptor: symbolic id, wire address, field list.
#[derive(Debug)]
pub struct RegInfo {
    pub reg: DmReg,
    pub name: &'static str,
    pub addr: u32,
    pub fields: &'static [Field],
}

const PLATFORM_FIELDS: &[Field] = &[
    Field { name: "platformid", msb: 31, lsb: 28 },
    Field { name: "numclusters", msb: 27, lsb: 21 },
    Field { name: "numcores", msb: 20, lsb: 12 },
    Field { name: "numwarps", msb: 11, lsb: 3 },
    Field { name: "numthreads", msb: 2, lsb: 0 },
];

const DCONFIG_FIELDS: &[Field] = &[
    Field { name: "ndmresetcyc", msb: 31, lsb: 29 },
    Field { name: "resethaltreqcyc", msb: 28, lsb: 26 },
    Field { name: "ebreakh", msb: 0, lsb: 0 },
];

const DSELECT_FIELDS: &[Field] = &[
    Field { name: "winsel", msb: 31, lsb: 22 },
    Field { name: "warpsel", msb: 21, lsb: 7 },
    Field { name: "threadsel", msb: 6, lsb: 0 },
];

const WMASK_FIELDS: &[Field] = &[Field { name: "mask", msb: 31, lsb: 0 }];

const WACTIVE_FIELDS: &[Field] = &[Field { name: "astatus", msb: 31, lsb: 0 }];

const WSTATUS_FIELDS: &[Field] = &[Field { name: "status", msb: 31, lsb: 0 }];

const DCTRL_FIELDS: &[Field] = &[
    Field { name: "dmactive", msb: 31, lsb: 31 },
    Field { name: "ndmreset", msb: 30, lsb: 30 },
    Field { name: "allhalted", msb: 29, lsb: 29 },
    Field { name: "anyhalted", msb: 28, lsb: 28 },
    Field { name: "allrunning", msb: 27, lsb: 27 },
    Field { name: "anyrunning", msb: 26, lsb: 26 },
    Field { name: "allunavail", msb: 25, lsb: 25 },
    Field { name: "anyunavail", msb: 24, lsb: 24 },
    Field { name: "hacause", msb: 11, lsb: 9 },
    Field { name: "injectstate", msb: 8, lsb: 7 },
    Field { name: "injectreq", msb: 6, lsb: 6 },
    Field { name: "stepstate", msb: 5, lsb: 4 },
    Field { name: "stepreq", msb: 3, lsb: 3 },
    Field { name: "resethaltreq", msb: 2, lsb: 2 },
    Field { name: "resumereq", msb: 1, lsb: 1 },
    Field { name: "haltreq", msb: 0, lsb: 0 },
];

const DPC_FIELDS: &[Field] = &[Field { name: "pc", msb: 31, lsb: 0 }];

const DINJECT_FIELDS: &[Field] = &[Field { name: "instr", msb: 31, lsb: 0 }];

const DSCRATCH_FIELDS: &[Field] = &[Field { name: "data", msb: 31, lsb: 0 }];

/// The full catalog, indexed by `DmReg as usize`.
pub const DM_REGS: &[RegInfo] = &[
    RegInfo { reg: DmReg::Platform, name: "platform", addr: 0x00, fields: PLATFORM_FIELDS },
    RegInfo { reg: DmReg::Dconfig, name: "dconfig", addr: 0x01, fields: DCONFIG_FIELDS },
    RegInfo { reg: DmReg::Dselect, name: "dselect", addr: 0x02, fields: DSELECT_FIELDS },
    RegInfo { reg: DmReg::Wmask, name: "wmask", addr: 0x03, fields: WMASK_FIELDS },
    RegInfo { reg: DmReg::Wactive, name: "wactive", addr: 0x04, fields: WACTIVE_FIELDS },
    RegInfo { reg: DmReg::Wstatus, name: "wstatus", addr: 0x05, fields: WSTATUS_FIELDS },
    RegInfo { reg: DmReg::Dctrl, name: "dctrl", addr: 0x06, fields: DCTRL_FIELDS },
    RegInfo { reg: DmReg::Dpc, name: "dpc", addr: 0x07, fields: DPC_FIELDS },
    RegInfo { reg: DmReg::Dinject, name: "dinject", addr: 0x08, fields: DINJECT_FIELDS },
    RegInfo { reg: DmReg::Dscratch, name: "dscratch", addr: 0x09, fields: DSCRATCH_FIELDS },
];

/// Lookup failure for a field name that does not exist on a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownField {
    pub reg: &'static str,
    pub field: &'static str,
}

impl Display for UnknownField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "register {} has no field named {}", self.reg, self.field)
    }
}

pub fn descriptor(reg: DmReg) -> &'static RegInfo {
    &DM_REGS[reg as usize]
}

pub fn field(reg: DmReg, name: &'static str) -> Result<&'static Field, UnknownField> {
    let info = descriptor(reg);
    info.fields
        .iter()
        .find(|f| f.name == name)
        .ok_or(UnknownField { reg: info.name, field: name })
}

/// `(word & mask) >> lsb`
pub fn extract(reg: DmReg, name: &'static str, word: u32) -> Result<u32, UnknownField> {
    let f = field(reg, name)?;
    Ok((word & f.mask()) >> f.lsb)
}

/// `(word & !mask) | ((value << lsb) & mask)`
pub fn insert(reg: DmReg, name: &'static str, word: u32, value: u32) -> Result<u32, UnknownField> {
    let f = field(reg, name)?;
    Ok((word & !f.mask()) | ((value << f.lsb) & f.mask()))
}

/// Why a warp halted, as reported by `DCTRL.hacause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltCause {
    None,
    Ebreak,
    HaltReq,
    StepReq,
    ResetHaltReq,
    Unknown(u32),
}

impl HaltCause {
    pub fn from_raw(raw: u32) -> HaltCause {
        match raw {
            0 => HaltCause::None,
            1 => HaltCause::Ebreak,
            2 => HaltCause::HaltReq,
            3 => HaltCause::StepReq,
            4 => HaltCause::ResetHaltReq,
            other => HaltCause::Unknown(other),
        }
    }
}

impl Display for HaltCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltCause::None => write!(f, "none"),
            HaltCause::Ebreak => write!(f, "ebreak"),
            HaltCause::HaltReq => write!(f, "halt requested"),
            HaltCause::StepReq => write!(f, "step requested"),
            HaltCause::ResetHaltReq => write!(f, "reset halt requested"),
            HaltCause::Unknown(v) => write!(f, "unknown ({})", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_indexable_by_id() {
        for (i, info) in DM_REGS.iter().enumerate() {
            assert_eq!(info.reg as usize, i);
            assert_eq!(descriptor(info.reg).addr, info.addr);
        }
    }

    #[test]
    fn addresses_match_wire_layout() {
        assert_eq!(descriptor(DmReg::Platform).addr, 0x0);
        assert_eq!(descriptor(DmReg::Dconfig).addr, 0x1);
        assert_eq!(descriptor(DmReg::Dselect).addr, 0x2);
        assert_eq!(descriptor(DmReg::Wmask).addr, 0x3);
        assert_eq!(descriptor(DmReg::Wactive).addr, 0x4);
        assert_eq!(descriptor(DmReg::Wstatus).addr, 0x5);
        assert_eq!(descriptor(DmReg::Dctrl).addr, 0x6);
        assert_eq!(descriptor(DmReg::Dpc).addr, 0x7);
        assert_eq!(descriptor(DmReg::Dinject).addr, 0x8);
        assert_eq!(descriptor(DmReg::Dscratch).addr, 0x9);
    }

    #[test]
    fn fields_fit_and_do_not_overlap() {
        for info in DM_REGS {
            let mut seen: u32 = 0;
            for f in info.fields {
                assert!(f.msb >= f.lsb, "{}.{}", info.name, f.name);
                assert!(f.msb < 32, "{}.{}", info.name, f.name);
                assert_eq!(seen & f.mask(), 0, "{}.{} overlaps", info.name, f.name);
                seen |= f.mask();
            }
        }
    }

    #[test]
    fn full_width_field_mask_is_all_ones() {
        let f = field(DmReg::Wmask, "mask").unwrap();
        assert_eq!(f.width(), 32);
        assert_eq!(f.mask(), 0xFFFF_FFFF);
    }

    #[test]
    fn extract_after_insert_is_identity_masked_to_width() {
        for info in DM_REGS {
            for f in info.fields {
                for &word in &[0u32, 0xFFFF_FFFF, 0xA5A5_5A5A] {
                    for &v in &[0u32, 1, 0x7F, 0xFFFF_FFFF] {
                        let set = insert(info.reg, f.name, word, v).unwrap();
                        let got = extract(info.reg, f.name, set).unwrap();
                        let width_mask = f.mask() >> f.lsb;
                        assert_eq!(got, v & width_mask, "{}.{}", info.name, f.name);
                        // Bits outside the field are untouched.
                        assert_eq!(set & !f.mask(), word & !f.mask());
                    }
                }
            }
        }
    }

    #[test]
    fn dctrl_request_bits() {
        // Spot-check positions the engine depends on.
        assert_eq!(field(DmReg::Dctrl, "haltreq").unwrap().mask(), 1 << 0);
        assert_eq!(field(DmReg::Dctrl, "resumereq").unwrap().mask(), 1 << 1);
        assert_eq!(field(DmReg::Dctrl, "stepreq").unwrap().mask(), 1 << 3);
        assert_eq!(field(DmReg::Dctrl, "injectreq").unwrap().mask(), 1 << 6);
        assert_eq!(field(DmReg::Dctrl, "dmactive").unwrap().mask(), 1 << 31);
        assert_eq!(field(DmReg::Dctrl, "hacause").unwrap().mask(), 0b111 << 9);
    }

    #[test]
    fn unknown_field_is_an_error() {
        let err = field(DmReg::Dctrl, "nonesuch").unwrap_err();
        assert_eq!(err.reg, "dctrl");
        assert_eq!(err.field, "nonesuch");
    }

    #[test]
    fn halt_cause_decoding() {
        assert_eq!(HaltCause::from_raw(0), HaltCause::None);
        assert_eq!(HaltCause::from_raw(1), HaltCause::Ebreak);
        assert_eq!(HaltCause::from_raw(2), HaltCause::HaltReq);
        assert_eq!(HaltCause::from_raw(3), HaltCause::StepReq);
        assert_eq!(HaltCause::from_raw(4), HaltCause::ResetHaltReq);
        assert_eq!(HaltCause::from_raw(7), HaltCause::Unknown(7));
    }
}
