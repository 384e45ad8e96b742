//! Interactive commands read from stdin while the daemon runs

use std::str::FromStr;

use chrono_tz::Tz;

use crate::alarm::{parse_timezone, AlarmId, AlarmTime, Repeat};
use crate::error::AlarmParseError;

pub const HELP: &str = "commands: stop | list | add <HH:MM> <timezone> <repeat> <name...> | remove <id> | help";

/// A parsed command line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Stop,
    List,
    Add {
        time: AlarmTime,
        timezone: Tz,
        repeat: Repeat,
        name: String,
    },
    Remove(AlarmId),
    Help,
    /// Blank line; still counts as user interaction
    Nothing,
}

/// Why a line could not be understood
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Alarm(#[from] AlarmParseError),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Command::Nothing);
        };

        match verb.to_ascii_lowercase().as_str() {
            "stop" | "s" => Ok(Command::Stop),
            "list" | "ls" => Ok(Command::List),
            "help" | "?" => Ok(Command::Help),
            "remove" | "rm" => {
                let id = words.next().ok_or(CommandError::Usage("remove <id>"))?;
                Ok(Command::Remove(AlarmId::from(id)))
            }
            "add" => {
                const USAGE: &str = "add <HH:MM> <timezone> <repeat> <name...>";
                let time = words.next().ok_or(CommandError::Usage(USAGE))?;
                let zone = words.next().ok_or(CommandError::Usage(USAGE))?;
                let repeat = words.next().ok_or(CommandError::Usage(USAGE))?;
                let name = words.collect::<Vec<_>>().join(" ");
                if name.is_empty() {
                    return Err(AlarmParseError::EmptyName.into());
                }
                Ok(Command::Add {
                    time: time.parse()?,
                    timezone: parse_timezone(zone)?,
                    repeat: repeat.parse()?,
                    name,
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        assert_eq!("stop".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("  LIST ".parse::<Command>(), Ok(Command::List));
        assert_eq!("".parse::<Command>(), Ok(Command::Nothing));
        assert_eq!(
            "rm abc123".parse::<Command>(),
            Ok(Command::Remove(AlarmId::from("abc123")))
        );
    }

    #[test]
    fn test_parse_add() {
        let cmd: Command = "add 07:30 America/Mexico_City weekdays Morning run"
            .parse()
            .unwrap();
        assert_eq!(
            cmd,
            Command::Add {
                time: AlarmTime::new(7, 30).unwrap(),
                timezone: chrono_tz::America::Mexico_City,
                repeat: Repeat::Weekdays,
                name: "Morning run".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "snooze".parse::<Command>(),
            Err(CommandError::Unknown(_))
        ));
        assert!(matches!(
            "add 07:30".parse::<Command>(),
            Err(CommandError::Usage(_))
        ));
        assert!(matches!(
            "add 25:00 UTC daily x".parse::<Command>(),
            Err(CommandError::Alarm(AlarmParseError::InvalidTime(_)))
        ));
        assert!(matches!(
            "add 07:00 Nowhere/City daily x".parse::<Command>(),
            Err(CommandError::Alarm(AlarmParseError::UnknownTimezone(_)))
        ));
        assert!(matches!(
            "add 07:00 UTC daily".parse::<Command>(),
            Err(CommandError::Alarm(AlarmParseError::EmptyName))
        ));
    }
}
