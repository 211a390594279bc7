use std::process::exit;

use log::{error, info};

use vxdbg::engine::Engine;
use vxdbg::stub::{GdbStub, DEFAULT_GDB_PORT};
use vxdbg::transport::TcpTransport;

const DEFAULT_TRANSPORT_ADDR: &str = "127.0.0.1:5555";

fn usage() -> ! {
    eprintln!("usage: vxdbg [transport-addr] [gdb-port]");
    eprintln!("  transport-addr  debug server to attach to (default {})", DEFAULT_TRANSPORT_ADDR);
    eprintln!("  gdb-port        port to serve GDB clients on (default {})", DEFAULT_GDB_PORT);
    exit(2);
}

fn run(transport_addr: &str, gdb_port: u16) -> Result<(), vxdbg::Error> {
    let transport = TcpTransport::connect(transport_addr)
        .map_err(vxdbg::Error::Transport)?;

    let mut engine = Engine::new();
    engine.set_transport(Box::new(transport));
    engine.initialize()?;

    let mut stub = GdbStub::new(&mut engine)?;
    stub.serve_forever(gdb_port)
}

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") || args.len() > 2 {
        usage();
    }
    let transport_addr = args.get(0).map(String::as_str).unwrap_or(DEFAULT_TRANSPORT_ADDR);
    let gdb_port = match args.get(1) {
        Some(p) => p.parse().unwrap_or_else(|_| usage()),
        None => DEFAULT_GDB_PORT,
    };

    info!("attaching to debug server at {}", transport_addr);
    if let Err(e) = run(transport_addr, gdb_port) {
        error!("fatal: {} (rc={})", e, e.code());
        exit(1);
    }
}
