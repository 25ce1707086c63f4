use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{FitMode, expand_home};
use crate::error::Error;
use crate::media::SourceKind;

/// Control requests delivered to the scheduler from outside (stdin, signals,
/// keyboard).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Play,
    Pause,
    Resume,
    TogglePause,
    Stop,
    Reload,
    /// Load and start playing a new source.
    Load(PathBuf),
    SetFitMode(FitMode),
    SetFitModeFor(SourceKind, FitMode),
    SetSpeedPercent(u32),
    Seek(f64),
}

impl FromStr for EngineCommand {
    type Err = Error;

    /// Parse one text line, e.g. `speed 150`, `fit image tile`, `load ~/a.mp4`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let no_args = |cmd: EngineCommand| {
            if rest.is_empty() {
                Ok(cmd)
            } else {
                Err(Error::Command(format!("'{verb}' takes no arguments")))
            }
        };

        match verb.to_ascii_lowercase().as_str() {
            "play" => no_args(Self::Play),
            "pause" => no_args(Self::Pause),
            "resume" => no_args(Self::Resume),
            "toggle" => no_args(Self::TogglePause),
            "stop" => no_args(Self::Stop),
            "reload" => no_args(Self::Reload),
            "load" => {
                if rest.is_empty() {
                    return Err(Error::Command("'load' needs a path".into()));
                }
                Ok(Self::Load(expand_home(Path::new(rest))))
            }
            "fit" => parse_fit(rest),
            "speed" => {
                let percent = rest
                    .trim_end_matches('%')
                    .parse::<u32>()
                    .map_err(|_| Error::Command(format!("invalid speed '{rest}'")))?;
                Ok(Self::SetSpeedPercent(percent))
            }
            "seek" => {
                let fraction = rest
                    .parse::<f64>()
                    .ok()
                    .filter(|p| (0.0..=1.0).contains(p))
                    .ok_or_else(|| {
                        Error::Command(format!("seek expects a fraction in [0, 1], got '{rest}'"))
                    })?;
                Ok(Self::Seek(fraction))
            }
            "" => Err(Error::Command("empty command".into())),
            other => Err(Error::Command(format!("unknown command '{other}'"))),
        }
    }
}

fn parse_fit(rest: &str) -> Result<EngineCommand, Error> {
    let mut words = rest.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(mode), None, None) => Ok(EngineCommand::SetFitMode(mode.parse()?)),
        (Some(kind), Some(mode), None) => {
            let kind = match kind.to_ascii_lowercase().as_str() {
                "video" => SourceKind::Video,
                "image" => SourceKind::Image,
                other => {
                    return Err(Error::Command(format!(
                        "unknown source kind '{other}', expected video or image"
                    )));
                }
            };
            Ok(EngineCommand::SetFitModeFor(kind, mode.parse()?))
        }
        _ => Err(Error::Command("usage: fit [video|image] <mode>".into())),
    }
}
