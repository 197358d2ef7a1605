//! Line-oriented terminal client.
//!
//! Typed lines are checked locally against the server grammar so obvious
//! mistakes never hit the wire; everything the server sends is printed as
//! it arrives by a separate reader task.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;

use crate::error::{ClientError, CommandError};
use crate::server::command::{self, GLOBAL, PRIVATE, RENAME, split_token};

pub const CONNECT: &str = "start-conection";
pub const HELP: &str = "help";

pub const HELP_TEXT: &str = "\
Available commands:
  start-conection <IP>                 # Connect to the server
  change-userName <newName>            # Change your name
  send-msg <targetUser> <message>      # Send a private message
  global-msg <message>                 # Send a message to everyone
  salir                                # Close the session";

/// What to do with one line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Connect(String),
    Send(String),
    Print(String),
    Help,
    Quit,
    Nothing,
}

/// Interpret a typed line. `connected` decides whether server commands may
/// be sent and whether unknown text is forwarded or rejected.
pub fn interpret(line: &str, connected: bool) -> Action {
    let line = line.trim();
    if line.is_empty() {
        return Action::Nothing;
    }
    if command::is_quit(line) {
        return Action::Quit;
    }

    let (keyword, rest) = split_token(line);
    let not_connected = || Action::Print(format!("Not connected. Use: {} <IP>", CONNECT));

    match keyword {
        CONNECT if rest.is_empty() => Action::Print(format!("Usage: {} <IP>", CONNECT)),
        CONNECT => Action::Connect(rest.to_string()),
        RENAME if rest.is_empty() => Action::Print(CommandError::RenameUsage.to_string()),
        PRIVATE if split_token(rest).1.is_empty() => {
            Action::Print(CommandError::PrivateUsage.to_string())
        }
        GLOBAL if rest.is_empty() => Action::Print(CommandError::GlobalUsage.to_string()),
        RENAME | PRIVATE | GLOBAL if !connected => not_connected(),
        RENAME | PRIVATE | GLOBAL => Action::Send(line.to_string()),
        _ if line.eq_ignore_ascii_case(HELP) => Action::Help,
        _ if connected => Action::Send(line.to_string()),
        _ => Action::Print("Unknown command. Type 'help' to see options.".to_string()),
    }
}

/// An open connection: our write half plus the task printing server lines.
struct Connection {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Connection {
    async fn open(host: &str, port: u16) -> Result<Self, ClientError> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::Connect { addr: addr.clone(), source })?;
        let (reader_half, writer) = stream.into_split();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(reader_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("\nServer: {}", line);
                prompt();
            }
            println!("\nConnection closed.");
        });

        println!("Connected to {}", addr);
        Ok(Connection { writer, reader })
    }

    fn is_open(&self) -> bool {
        !self.reader.is_finished()
    }

    async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.write_all(format!("{}\n", line).as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Interactive loop over stdin. Connects right away when `host` is given.
pub async fn run_client(host: Option<String>, port: u16) -> Result<(), ClientError> {
    println!("Chat client");
    println!("{}", HELP_TEXT);

    let mut conn: Option<Connection> = None;
    if let Some(host) = host {
        match Connection::open(&host, port).await {
            Ok(c) => conn = Some(c),
            Err(e) => println!("{}", e),
        }
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = stdin.next_line().await? else {
            break;
        };

        if conn.as_ref().is_some_and(|c| !c.is_open()) {
            conn = None;
        }

        match interpret(&line, conn.is_some()) {
            Action::Connect(host) => {
                if conn.is_some() {
                    println!("Already connected.");
                    continue;
                }
                match Connection::open(&host, port).await {
                    Ok(c) => conn = Some(c),
                    Err(e) => println!("{}", e),
                }
            }
            Action::Send(text) => {
                if let Some(c) = conn.as_mut() {
                    if let Err(e) = c.send(&text).await {
                        println!("Connection lost: {}", e);
                        conn = None;
                    }
                }
            }
            Action::Print(msg) => println!("{}", msg),
            Action::Help => println!("{}", HELP_TEXT),
            Action::Quit => {
                if let Some(c) = conn.as_mut() {
                    let _ = c.send(command::QUIT).await;
                }
                println!("Session finished.");
                break;
            }
            Action::Nothing => {}
        }
    }

    Ok(())
}
