//! Best-effort audio cues for `play_sound` notices.

use std::io::Write;
use std::process::{Command, Stdio};

use bulletin_common::config::SoundConfig;
use bulletin_common::types::NotificationRecord;

/// A cue fired once per delivered `play_sound` record.
///
/// Implementations must not block; callers log and ignore errors.
pub trait SoundCue {
    fn play(&self, record: &NotificationRecord) -> anyhow::Result<()>;
}

/// Writes the terminal bell character to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl SoundCue for TerminalBell {
    fn play(&self, _record: &NotificationRecord) -> anyhow::Result<()> {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

/// Spawns an external player command without blocking on it.
///
/// The command line is split on whitespace; the first word is the program.
/// Each child is handed to a short-lived waiter thread so finished players
/// are reaped instead of lingering as zombies.
#[derive(Debug, Clone)]
pub struct CommandCue {
    program: String,
    args: Vec<String>,
}

impl CommandCue {
    pub fn new(command_line: &str) -> anyhow::Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| anyhow::anyhow!("sound command is empty"))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

impl SoundCue for CommandCue {
    fn play(&self, record: &NotificationRecord) -> anyhow::Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("BULLETIN_NOTICE_ID", record.id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let id = record.id;
        std::thread::Builder::new()
            .name("sound-cue".into())
            .spawn(move || match child.wait() {
                Ok(status) if !status.success() => {
                    tracing::debug!(id, %status, "Sound command exited unsuccessfully");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(id, error = %e, "Failed to wait for sound command"),
            })?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl SoundCue for Silent {
    fn play(&self, _record: &NotificationRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Build the configured cue.
pub fn from_config(config: &SoundConfig) -> anyhow::Result<Box<dyn SoundCue>> {
    Ok(match config {
        SoundConfig::Bell => Box::new(TerminalBell),
        SoundConfig::Command(line) => Box::new(CommandCue::new(line)?),
        SoundConfig::Off => Box::new(Silent),
    })
}
