//! LockstepDB interactive client
//!
//! A rustyline REPL that connects to a running server and speaks the
//! length-prefixed frame protocol. Statements accumulate across lines until a
//! terminating semicolon; dot commands are sent as-is.

use std::env;
use std::net::TcpStream;

use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use lockstepdb::server::{connect, read_frame, write_frame, DEFAULT_PORT};

fn print_banner(address: &str) {
    println!("LockstepDB client connected to {}", address);
    println!("Type '.help' for help, '.quit' to exit");
}

fn print_help() {
    println!(
        r#"
Commands:
  .help              Show this help message
  .quit              Exit the client
  .tables            List all tables
  .mode json         Render results as JSON
  .mode table        Render results as aligned text

SQL:
  CREATE TABLE t (id INTEGER, name TEXT);
  INSERT INTO t VALUES (1, 'Alice'), (2, 'Bob');
  SELECT name FROM t WHERE id > 1 ORDER BY name ASC LIMIT 10;
  UPDATE t SET name = 'Carol' WHERE id = 2;
  DELETE FROM t WHERE id = 1;
  BEGIN TRANSACTION; ... COMMIT; | ROLLBACK;
"#
    );
}

/// Send one request and print the server's response. Returns false when the
/// session should end.
fn round_trip(stream: &mut TcpStream, request: &str) -> anyhow::Result<bool> {
    write_frame(stream, request).context("failed to send request")?;
    match read_frame(stream).context("failed to read response")? {
        Some(response) => {
            if response.ends_with('\n') {
                print!("{}", response);
            } else {
                println!("{}", response);
            }
            Ok(!matches!(request, ".quit" | ".exit"))
        }
        None => {
            println!("Server closed the connection");
            Ok(false)
        }
    }
}

fn run_repl(host: &str, port: u16) -> anyhow::Result<()> {
    let address = format!("{}:{}", host, port);
    let mut stream = connect(host, port)
        .with_context(|| format!("could not connect to {}", address))?;

    // Greeting frame
    if let Some(greeting) = read_frame(&mut stream).context("failed to read greeting")? {
        println!("{}", greeting);
    }
    print_banner(&address);

    let mut editor = DefaultEditor::new()?;
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() {
            "lockstep> "
        } else {
            "     ...> "
        };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if buffer.is_empty() && trimmed.starts_with('.') {
            editor.add_history_entry(trimmed)?;
            if trimmed == ".help" {
                print_help();
                continue;
            }
            if !round_trip(&mut stream, trimmed)? {
                break;
            }
            continue;
        }

        buffer.push_str(&line);
        buffer.push(' ');

        if trimmed.ends_with(';') {
            let statement = buffer.trim().to_string();
            buffer.clear();
            editor.add_history_entry(statement.as_str())?;
            if !round_trip(&mut stream, &statement)? {
                break;
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut host = "127.0.0.1".to_string();
    let mut port = DEFAULT_PORT;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-H" => {
                host = args
                    .get(i + 1)
                    .context("--host requires a value")?
                    .clone();
                i += 2;
            }
            "--port" | "-p" => {
                port = args
                    .get(i + 1)
                    .context("--port requires a value")?
                    .parse()
                    .context("invalid port")?;
                i += 2;
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }

    run_repl(&host, port)
}
