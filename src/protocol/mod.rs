//! GDB Remote Serial Protocol plumbing: packet framing, command parsing,
//! and response assembly. Nothing in this module touches a socket or the
//! engine; it is pure data-in/data-out so every command round-trip can be
//! tested in isolation.

pub mod commands;
pub mod hex;
pub mod packet;
pub mod response_writer;

pub use commands::{ClientFeatures, Command, CommandParseError};
pub use packet::{checksum, packetify, Packet, PacketParseError};
pub use response_writer::ResponseWriter;
