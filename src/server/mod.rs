//! TCP server
//!
//! Thread-per-connection server speaking a length-prefixed frame protocol:
//! every message is a 4-byte big-endian payload length followed by that many
//! bytes of UTF-8. A request frame carries one SQL statement or dot command;
//! the response frame carries the rendered result. Each connection owns a
//! `QueryProcessor` over the shared controller, recovery log and storage.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::executor::processor::{QueryProcessor, StatementOutcome};
use crate::storage::manager::StorageManager;
use crate::transaction::controller::ConcurrencyController;
use crate::transaction::recovery::RecoveryLog;

/// Default server port
pub const DEFAULT_PORT: u16 = 5433;

/// Largest frame a peer may send
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Directory for persisted tables; in-memory when unset
    pub data_dir: Option<PathBuf>,
    /// Recovery log file; in-memory when unset
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            data_dir: None,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host address
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Persist tables under `dir`
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Append the recovery log to `path`
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Get the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The shared engine: one of each core component, handed to every connection
pub struct Server {
    config: ServerConfig,
    controller: Arc<ConcurrencyController>,
    recovery: Arc<RecoveryLog>,
    storage: Arc<StorageManager>,
}

impl Server {
    /// Create a server, loading persisted state when the config names any
    pub fn new(config: ServerConfig) -> Result<Self> {
        let storage = match &config.data_dir {
            Some(dir) => StorageManager::with_base_path(dir)?,
            None => StorageManager::new(),
        };
        let recovery = match &config.log_file {
            Some(path) => RecoveryLog::with_log_file(path)?,
            None => RecoveryLog::new(),
        };
        Ok(Self {
            config,
            controller: Arc::new(ConcurrencyController::new()),
            recovery: Arc::new(recovery),
            storage: Arc::new(storage),
        })
    }

    /// Start the server and listen for connections
    pub fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address())?;
        info!(address = %self.config.bind_address(), "server listening");

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let controller = self.controller.clone();
                    let recovery = self.recovery.clone();
                    let storage = self.storage.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, controller, recovery, storage) {
                            error!(error = %e, "connection failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                }
            }
        }

        Ok(())
    }
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputFormat {
    Table,
    Json,
}

fn handle_connection(
    stream: TcpStream,
    controller: Arc<ConcurrencyController>,
    recovery: Arc<RecoveryLog>,
    storage: Arc<StorageManager>,
) -> Result<()> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(%peer, "client connected");

    let mut reader = stream.try_clone()?;
    let mut writer = stream;

    let storage_for_commands = storage.clone();
    let mut processor = QueryProcessor::new(controller, recovery, storage);
    let mut format = OutputFormat::Table;

    write_frame(&mut writer, "LockstepDB server ready")?;

    loop {
        let request = match read_frame(&mut reader)? {
            Some(payload) => payload,
            None => break,
        };
        let request = request.trim();
        if request.is_empty() {
            continue;
        }

        if let Some(command) = request.strip_prefix('.') {
            match command {
                "quit" | "exit" => {
                    write_frame(&mut writer, "Goodbye!")?;
                    break;
                }
                "mode json" => {
                    format = OutputFormat::Json;
                    write_frame(&mut writer, "Output mode set to JSON")?;
                }
                "mode table" => {
                    format = OutputFormat::Table;
                    write_frame(&mut writer, "Output mode set to Table")?;
                }
                "tables" => {
                    let tables = storage_for_commands.list_tables();
                    let response = if tables.is_empty() {
                        "No tables found.".to_string()
                    } else {
                        format!("Tables:\n  {}", tables.join("\n  "))
                    };
                    write_frame(&mut writer, &response)?;
                }
                _ => {
                    write_frame(&mut writer, &format!("Unknown command: .{}", command))?;
                }
            }
            continue;
        }

        let response = match processor.process(request) {
            Ok(StatementOutcome::Completed(result)) => match format {
                OutputFormat::Table => result.render_text(),
                OutputFormat::Json => serde_json::to_string(&result)
                    .unwrap_or_else(|e| format!("{{\"status\":\"error\",\"message\":\"{}\"}}", e)),
            },
            Ok(StatementOutcome::Retry) => match format {
                OutputFormat::Table => "RETRY: statement deferred, resubmit it\n".to_string(),
                OutputFormat::Json => "{\"status\":\"retry\"}".to_string(),
            },
            Err(e) => {
                // Invariant violations end the session, not the server
                error!(%peer, error = %e, "session failed");
                write_frame(&mut writer, &format!("FATAL: {}", e))?;
                break;
            }
        };
        write_frame(&mut writer, &response)?;
    }

    // An open transaction dies with its connection
    if processor.current_transaction().is_some() {
        if let Err(e) = processor.rollback() {
            warn!(%peer, error = %e, "rollback on disconnect failed");
        }
    }
    info!(%peer, "client disconnected");
    Ok(())
}

/// Read one length-prefixed frame. `Ok(None)` means the peer closed cleanly.
pub fn read_frame(reader: &mut impl Read) -> Result<Option<String>> {
    let len = match reader.read_u32::<BigEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(Error::Internal(format!("frame too large: {} bytes", len)));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    let text = String::from_utf8(payload)
        .map_err(|e| Error::Internal(format!("frame is not UTF-8: {}", e)))?;
    Ok(Some(text))
}

/// Write one length-prefixed frame
pub fn write_frame(writer: &mut impl Write, payload: &str) -> Result<()> {
    writer.write_u32::<BigEndian>(payload.len() as u32)?;
    writer.write_all(payload.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Connect to a running server
pub fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    TcpStream::connect(&addr).map_err(Error::from)
}
