//! Compute the canonical signature of a JSON-RPC request.
//!
//! Reads a single request from stdin (or `--file`) and prints its hex
//! digest. Useful for grepping cassettes and debugging replay misses.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use mcp_proxy_gateway::jsonrpc::Request;
use mcp_proxy_gateway::signature;

#[derive(Parser, Debug)]
#[command(name = "mcp-proxy-gateway-sig", version, about)]
struct Cli {
    /// Path to a JSON-RPC request (defaults to stdin)
    #[arg(long)]
    file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let data = match &cli.file {
        Some(path) => std::fs::read(path),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).map(|_| buf)
        }
    };
    let data = match data {
        Ok(data) => data,
        Err(err) => return fail("read input", &err),
    };

    let req: Request = match serde_json::from_slice(&data) {
        Ok(req) => req,
        Err(err) => return fail("parse JSON", &err),
    };
    if let Err(err) = req.validate() {
        return fail("validate JSON-RPC", &err);
    }

    match signature::from_request(&req) {
        Ok(sig) => {
            println!("{sig}");
            ExitCode::SUCCESS
        }
        Err(err) => fail("compute signature", &err),
    }
}

fn fail(context: &str, err: &dyn std::fmt::Display) -> ExitCode {
    eprintln!("{context}: {err}");
    ExitCode::FAILURE
}
