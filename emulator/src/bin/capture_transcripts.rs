use std::io;

use hub_emulator::{Session, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Treat)?;
    record_profile(TranscriptProfile::Touch)?;
    record_profile(TranscriptProfile::Jam)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile)?;
    let script: &[&str] = match profile {
        TranscriptProfile::Treat => &[
            "status",
            "lights left 50 20",
            "present 3000",
            "play",
            "play",
            "status",
        ],
        TranscriptProfile::Touch => &[
            "touch left",
            "touch middle 400",
            "status",
            "drift right 40",
            "run 11000",
            "status",
        ],
        TranscriptProfile::Jam => &[
            "jam",
            "run 4000",
            "status",
            "present 3000",
            "clear",
            "run 2000",
            "status",
            "present 3000",
        ],
    };
    for line in script {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}
