//! `vxdbg`: remote debugger for the Vortex many-warp RISC-V GPGPU.
//!
//! The crate talks to a debug server running alongside the target (simulator
//! or FPGA) over a line-based TCP transport, drives the target's Debug
//! Module registers through it, and re-exposes the whole machine (every warp
//! and thread, architectural registers, memory, software breakpoints) to a
//! standard GDB client via the Remote Serial Protocol.
//!
//! Layering, leaves first:
//!
//! - [`regs`]: the DM register catalog (compile-time field tables).
//! - [`riscv`]: architectural register names, `misa` decoding, and the
//!   in-process encoder for injected instructions.
//! - [`transport`]: the request/response channel to the debug server.
//! - [`engine`]: the warp-control engine built on the three above.
//! - [`protocol`] / [`stub`]: the GDB RSP front end over the engine.

pub mod engine;
pub mod error;
pub mod protocol;
pub mod regs;
pub mod riscv;
pub mod stub;
pub mod transport;

pub use engine::Engine;
pub use error::Error;
pub use stub::GdbStub;
