//! TCP debug server

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

use crate::protocol::{DebugCommand, DebugResponse};

/// Trait that the application implements to handle debug commands
pub trait DebugHandler: Send + Sync + 'static {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse;
}

/// Debug server handle - the server stops when this is dropped
pub struct DebugServer {
    local_addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl DebugServer {
    /// Bind to `addr` and serve commands in the background.
    ///
    /// Must be called from within a tokio runtime. Binding port 0 picks a
    /// free port; see [`DebugServer::local_addr`].
    pub async fn bind(handler: Arc<Mutex<dyn DebugHandler>>, addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Debug server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::info!("Debug client connected from {}", peer);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, handler).await;
                            log::info!("Debug client disconnected: {}", peer);
                        });
                    }
                    Err(e) => {
                        log::error!("Debug server accept error: {}", e);
                    }
                }
            }
        });

        Ok(Self { local_addr, handle })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for DebugServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Answer one request line with one response line (newline included).
pub async fn respond(handler: &Mutex<dyn DebugHandler>, line: &str) -> String {
    let response = match serde_json::from_str::<DebugCommand>(line) {
        Ok(cmd) => {
            log::debug!("Debug command: {:?}", cmd);
            handler.lock().await.handle_command(cmd)
        }
        Err(e) => DebugResponse::error(format!("Invalid command JSON: {}", e)),
    };

    let mut json = serde_json::to_string(&response).unwrap_or_else(|e| {
        format!("{{\"status\":\"error\",\"message\":\"Serialize error: {}\"}}", e)
    });
    json.push('\n');
    json
}

async fn handle_connection(stream: TcpStream, handler: Arc<Mutex<dyn DebugHandler>>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Debug server read error: {}", e);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reply = respond(&handler, trimmed).await;
        if let Err(e) = writer.write_all(reply.as_bytes()).await {
            log::error!("Debug server write error: {}", e);
            break;
        }
    }
}
