//! Line-delimited JSON-RPC over stdin/stdout.

use std::io::{self, BufRead, BufReader, Write};
use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::RpcServer;

/// stdio transport: one JSON-RPC message per line.
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Run until stdin closes.
    pub async fn run(self, server: RpcServer) -> Result<(), io::Error> {
        let stdin = io::stdin();
        let stdout = io::stdout();

        let reader = BufReader::new(stdin.lock());
        let mut stdout = stdout.lock();

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("failed to read line: {}", e);
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            debug!("received {} bytes", line.len());

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("failed to parse request: {}", e);
                    write_response(
                        &mut stdout,
                        &JsonRpcResponse::error(None, JsonRpcError::parse_error()),
                    )?;
                    continue;
                }
            };

            if let Some(response) = server.handle_request(request).await {
                write_response(&mut stdout, &response)?;
            }
        }

        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn write_response(stdout: &mut impl Write, response: &JsonRpcResponse) -> Result<(), io::Error> {
    match serde_json::to_string(response) {
        Ok(json) => {
            debug!("sending {} bytes", json.len());
            writeln!(stdout, "{}", json)?;
            stdout.flush()
        }
        Err(e) => {
            error!("failed to serialize response: {}", e);
            // Send a minimal error response so the client doesn't hang.
            let fallback =
                r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;
            writeln!(stdout, "{}", fallback)?;
            stdout.flush()
        }
    }
}
