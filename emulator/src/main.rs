use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use hub_emulator::{Session, TranscriptProfile};

const USAGE: &str = "Usage: hub-emulator [treat|touch|jam] [--script <file>]";

/// Command-line choices for one emulator run.
struct Options {
    profile: TranscriptProfile,
    /// Replays commands from a file instead of reading stdin.
    script: Option<PathBuf>,
}

impl Options {
    fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut options = Self {
            profile: TranscriptProfile::Treat,
            script: None,
        };
        while let Some(arg) = args.next() {
            if arg == "--script" {
                let path = args.next().ok_or("Expected a file after --script")?;
                options.script = Some(PathBuf::from(path));
            } else {
                options.profile = TranscriptProfile::from_tag(&arg)?;
            }
        }
        Ok(options)
    }
}

enum Flow {
    Continue,
    Quit,
}

fn main() -> io::Result<()> {
    let options = Options::from_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let mut session = Session::new(options.profile)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(
        out,
        "Hub ready after {} ms of virtual time; transcript in {}.",
        session.elapsed_ms(),
        options.profile.log_path()
    )?;

    match options.script {
        Some(path) => replay(&mut session, &fs::read_to_string(path)?, &mut out),
        None => interactive(&mut session, &mut out),
    }
}

/// Runs each non-comment line of `script`, echoing it like typed input.
fn replay(session: &mut Session, script: &str, out: &mut impl Write) -> io::Result<()> {
    for line in script.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        writeln!(out, "{} {line}", prompt(session))?;
        if let Flow::Quit = execute(session, line, out)? {
            break;
        }
    }
    Ok(())
}

fn interactive(session: &mut Session, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Type `help` for commands or `exit` to quit.")?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();
    loop {
        write!(out, "{} ", prompt(session))?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(());
        }
        if let Flow::Quit = execute(session, line.trim(), out)? {
            return Ok(());
        }
    }
}

fn execute(session: &mut Session, line: &str, out: &mut impl Write) -> io::Result<Flow> {
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        writeln!(out, "Session closed at {} ms.", session.elapsed_ms())?;
        return Ok(Flow::Quit);
    }
    for response in session.handle_command(line)? {
        writeln!(out, "{response}")?;
    }
    Ok(Flow::Continue)
}

/// Prompt stamped with the virtual clock, matching the transcript layout.
fn prompt(session: &Session) -> String {
    format!("[+{:>6} ms] hub>", session.elapsed_ms())
}
