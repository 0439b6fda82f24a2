//! Interactive capture session.
//!
//! Reads one command per line and runs it to completion before reading the
//! next. The pin lives for the whole session.

use crate::report;
use anyhow::Result;
use facefile_core::{
    CameraDevice, CaptureController, CaptureError, GalleryStore, Identity, Matcher, Session,
};
use std::io::{BufRead, Write};
use std::str::FromStr;

const HELP: &str = "\
commands:
  verify (v)        capture, match against the gallery, file the image
  save (s)          capture and save to the connected identity
  connect <n>       connect to user_<n>
  disconnect (d)    clear the connected identity
  status            show the connected identity
  list              list identities
  help              show this message
  quit (q)          leave the session
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Verify,
    Save,
    Connect(Identity),
    Disconnect,
    Status,
    List,
    Help,
    Quit,
}

impl FromStr for SessionCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let cmd = words.next().unwrap_or_default().to_ascii_lowercase();
        let arg = words.next();

        let parsed = match cmd.as_str() {
            "verify" | "v" => Self::Verify,
            "save" | "s" => Self::Save,
            "disconnect" | "d" => Self::Disconnect,
            "status" => Self::Status,
            "list" | "ls" => Self::List,
            "help" | "?" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            "connect" | "c" => {
                let raw = arg.ok_or("usage: connect <n>")?;
                let identity = raw
                    .parse::<u32>()
                    .ok()
                    .and_then(Identity::new)
                    .or_else(|| Identity::from_dir_name(raw))
                    .ok_or_else(|| format!("not an identity: {raw}"))?;
                return Ok(Self::Connect(identity));
            }
            "" => return Err(String::new()),
            other => return Err(format!("unknown command: {other} (try `help`)")),
        };
        Ok(parsed)
    }
}

/// Run the command loop until `quit` or end of input.
///
/// Operation-level failures are reported and the loop continues; fatal
/// storage errors end the session with an error.
pub fn run<G, M, R, W>(
    controller: &CaptureController<G, M>,
    camera: &dyn CameraDevice,
    input: R,
    out: &mut W,
) -> Result<()>
where
    G: GalleryStore,
    M: Matcher,
    R: BufRead,
    W: Write,
{
    let mut session = Session::new();
    let mut lines = input.lines();

    loop {
        write!(out, "facefile> ")?;
        out.flush()?;

        let Some(line) = lines.next().transpose()? else {
            writeln!(out)?;
            break;
        };

        let command = match line.parse::<SessionCommand>() {
            Ok(command) => command,
            Err(msg) if msg.is_empty() => continue,
            Err(msg) => {
                writeln!(out, "{msg}")?;
                continue;
            }
        };
        tracing::debug!(?command, "session command");

        let result = match command {
            SessionCommand::Verify => controller
                .capture_and_verify(&mut session, camera)
                .map(|o| report::describe(&o)),
            SessionCommand::Save => controller
                .capture_and_save(&session, camera)
                .map(|o| report::describe(&o)),
            SessionCommand::Connect(identity) => controller
                .connect(&mut session, identity)
                .map(|()| format!("Connected to {identity}")),
            SessionCommand::Disconnect => Ok(match controller.disconnect(&mut session) {
                Some(identity) => format!("Disconnected from {identity}"),
                None => "Disconnected".to_string(),
            }),
            SessionCommand::Status => Ok(match session.current() {
                Some(identity) => format!("Connected to {identity}"),
                None => "Not connected".to_string(),
            }),
            SessionCommand::List => report::summarize(controller.gallery())
                .map(|rows| report::render_table(&rows).trim_end().to_string())
                .map_err(CaptureError::from),
            SessionCommand::Help => Ok(HELP.trim_end().to_string()),
            SessionCommand::Quit => break,
        };

        match result {
            Ok(msg) => writeln!(out, "{msg}")?,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(CaptureError::NoPinnedIdentity) => {
                writeln!(out, "warning: {}", CaptureError::NoPinnedIdentity)?
            }
            Err(e) => {
                tracing::warn!(error = %e, "command failed");
                writeln!(out, "error: {e}")?
            }
        }
    }

    Ok(())
}
