//! Line grammar accepted from a connected peer.
//!
//! The keyword is the first whitespace-delimited token and is matched
//! case-sensitively. Message bodies are the rest of the line after the
//! whitespace that follows the last required token, kept verbatim.

use crate::error::CommandError;

pub const RENAME: &str = "change-userName";
pub const PRIVATE: &str = "send-msg";
pub const GLOBAL: &str = "global-msg";
pub const QUIT: &str = "salir";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Rename { name: &'a str },
    Private { target: &'a str, body: &'a str },
    Global { body: &'a str },
    Quit,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Result<Self, CommandError> {
        if is_quit(line) {
            return Ok(Command::Quit);
        }

        let (keyword, rest) = split_token(line);
        match keyword {
            RENAME => {
                let name = rest.trim();
                if name.is_empty() {
                    return Err(CommandError::RenameUsage);
                }
                if !is_valid_identity(name) {
                    return Err(CommandError::InvalidName);
                }
                Ok(Command::Rename { name })
            }
            PRIVATE => {
                let (target, body) = split_token(rest);
                if target.is_empty() || body.trim().is_empty() {
                    return Err(CommandError::PrivateUsage);
                }
                Ok(Command::Private { target, body })
            }
            GLOBAL => {
                if rest.trim().is_empty() {
                    return Err(CommandError::GlobalUsage);
                }
                Ok(Command::Global { body: rest })
            }
            _ => Err(CommandError::Unknown),
        }
    }
}

/// `salir` in any letter case ends the session.
pub fn is_quit(line: &str) -> bool {
    line.eq_ignore_ascii_case(QUIT)
}

/// Identities are non-empty and contain no whitespace.
pub fn is_valid_identity(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

/// Split off the first token. The remainder starts after the whitespace
/// run that ends the token; it is empty when there is nothing left.
pub fn split_token(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(end) => {
            let rest = s[end..].trim_start();
            (&s[..end], rest)
        }
        None => (s, ""),
    }
}
