//! The target description served through `qXfer:features:read`.

use crate::riscv::{GDB_CSRS, GPR_ABI_NAMES};

/// Build the target.xml document: the RV32 CPU feature (x0..x31 + pc) and
/// the exposed Vortex CSR block, numbered the way the `g`/`p` bank is laid
/// out.
pub(super) fn build() -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\"?>\n\
         <!DOCTYPE target SYSTEM \"gdb-target.dtd\">\n\
         <target version=\"1.0\">\n\
         <architecture>riscv:rv32</architecture>\n\
         <feature name=\"org.gnu.gdb.riscv.cpu\">\n",
    );

    for (regnum, name) in GPR_ABI_NAMES.iter().enumerate() {
        xml.push_str(&format!(
            "  <reg name=\"{}\" bitsize=\"32\" type=\"int\" regnum=\"{}\"/>\n",
            name, regnum
        ));
    }
    xml.push_str("  <reg name=\"pc\" bitsize=\"32\" type=\"code_ptr\" regnum=\"32\"/>\n");
    xml.push_str("</feature>\n<feature name=\"org.vortex.debug.csr\">\n");

    for (i, name) in GDB_CSRS.iter().enumerate() {
        xml.push_str(&format!(
            "  <reg name=\"{}\" bitsize=\"32\" type=\"int\" regnum=\"{}\" group=\"csr\"/>\n",
            name,
            33 + i
        ));
    }
    xml.push_str("</feature>\n</target>\n");
    xml
}
