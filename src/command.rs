//! Outbound command construction

use crate::{
    constants::BLOCK_TERMINATOR,
    error::{Error, Result},
};
use std::fmt;

/// Validate that a user-provided string contains no newline characters.
///
/// Commands are line-delimited; embedded newlines would allow injection
/// of arbitrary protocol commands.
fn validate_no_newlines(s: &str, context: &str) -> Result<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(Error::InvalidCommand {
            message: format!("{} must not contain newlines", context),
        });
    }
    Ok(())
}

/// Wire commands understood by the switch.
///
/// The convenience verbs on [`Connection`](crate::Connection) are string
/// templates over `Api`/`BgApi`; only these primitives appear on the wire
/// as distinct verbs.
#[derive(Clone)]
pub enum Command {
    /// Answer the login challenge with a password.
    Auth {
        /// Event socket password.
        password: String,
    },
    /// Execute an API command synchronously.
    Api {
        /// Command and arguments, e.g. `"status"`.
        command: String,
    },
    /// Execute an API command in the background; the reply only
    /// acknowledges job acceptance.
    BgApi {
        /// Command and arguments.
        command: String,
    },
    /// Subscribe to event delivery, e.g. format `"xml"`, spec `"ALL"`.
    Events {
        /// Serialization format: `plain` or `xml`.
        format: String,
        /// Space-separated event names, or `ALL`.
        spec: String,
    },
    /// Log out and close the session.
    Exit,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Auth { .. } => f
                .debug_struct("Auth")
                .field("password", &"[REDACTED]")
                .finish(),
            Command::Api { command } => f.debug_struct("Api").field("command", command).finish(),
            Command::BgApi { command } => {
                f.debug_struct("BgApi").field("command", command).finish()
            }
            Command::Events { format, spec } => f
                .debug_struct("Events")
                .field("format", format)
                .field("spec", spec)
                .finish(),
            Command::Exit => write!(f, "Exit"),
        }
    }
}

impl Command {
    /// Format a simple command with optional arguments
    fn format_simple_command(cmd: &str, args: &[&str]) -> String {
        let mut result = String::from(cmd);
        for arg in args {
            result.push(' ');
            result.push_str(arg);
        }
        result.push_str(BLOCK_TERMINATOR);
        result
    }

    /// Validate all user-supplied fields, then convert to wire format.
    pub fn to_wire_format(&self) -> Result<String> {
        match self {
            Command::Auth { password } => {
                validate_no_newlines(password, "password")?;
                Ok(Self::format_simple_command("auth", &[password]))
            }
            Command::Api { command } => {
                validate_no_newlines(command, "api command")?;
                Ok(Self::format_simple_command("api", &[command]))
            }
            Command::BgApi { command } => {
                validate_no_newlines(command, "bgapi command")?;
                Ok(Self::format_simple_command("bgapi", &[command]))
            }
            Command::Events { format, spec } => {
                validate_no_newlines(format, "event format")?;
                validate_no_newlines(spec, "event list")?;
                Ok(Self::format_simple_command("event", &[format, spec]))
            }
            Command::Exit => Ok(Self::format_simple_command("exit", &[])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_formats() {
        let auth = Command::Auth {
            password: "ClueCon".to_string(),
        };
        assert_eq!(auth.to_wire_format().unwrap(), "auth ClueCon\n\n");

        let api = Command::Api {
            command: "status".to_string(),
        };
        assert_eq!(api.to_wire_format().unwrap(), "api status\n\n");

        let bgapi = Command::BgApi {
            command: "originate user/1000 9664".to_string(),
        };
        assert_eq!(
            bgapi.to_wire_format().unwrap(),
            "bgapi originate user/1000 9664\n\n"
        );

        let events = Command::Events {
            format: "xml".to_string(),
            spec: "ALL".to_string(),
        };
        assert_eq!(events.to_wire_format().unwrap(), "event xml ALL\n\n");

        assert_eq!(Command::Exit.to_wire_format().unwrap(), "exit\n\n");
    }

    #[test]
    fn newline_injection_rejected() {
        let api = Command::Api {
            command: "status\n\nevent plain ALL".to_string(),
        };
        assert!(api.to_wire_format().is_err());

        let auth = Command::Auth {
            password: "pw\napi status".to_string(),
        };
        assert!(auth.to_wire_format().is_err());

        let events = Command::Events {
            format: "xml\r".to_string(),
            spec: "ALL".to_string(),
        };
        assert!(events.to_wire_format().is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let auth = Command::Auth {
            password: "secret".to_string(),
        };
        let debug_str = format!("{:?}", auth);
        assert!(!debug_str.contains("secret"));
        assert!(debug_str.contains("REDACTED"));
    }
}
