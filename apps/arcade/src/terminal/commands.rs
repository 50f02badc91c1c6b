use arcade_proto::{MouseButton, MouseInput};

use crate::input::PLAYER_ONE;
use crate::terminal::error::CliError;

pub const HELP: &str = "\
commands:
  list                         show the games the relay offered
  start <game>                 start a game
  stop                         leave the running game
  key <code> down|up           press or release a key (e.g. ArrowUp, KeyZ, KeyQ)
  mouse <button> <dx> <dy>     move the mouse; button is none|left|middle|right
  help                         show this text
  quit                         exit";

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCommand {
    List,
    Start(String),
    Stop,
    Key { code: String, pressed: bool },
    Mouse(MouseInput),
    Help,
    Quit,
}

/// Blank lines parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<LineCommand>, CliError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();
    let command = match (verb, rest.as_slice()) {
        ("list" | "ls", []) => LineCommand::List,
        ("start", []) => return Err(invalid("start needs a game name")),
        ("start", name) => LineCommand::Start(name.join(" ")),
        ("stop", []) => LineCommand::Stop,
        ("key", [code, direction]) => LineCommand::Key {
            code: code.to_string(),
            pressed: match *direction {
                "down" | "press" => true,
                "up" | "release" => false,
                other => return Err(invalid(format!("key direction must be down or up, got {other}"))),
            },
        },
        ("mouse", [button, dx, dy]) => LineCommand::Mouse(MouseInput {
            user: PLAYER_ONE,
            button: parse_button(button)?,
            pos_x: parse_delta(dx)?,
            pos_y: parse_delta(dy)?,
        }),
        ("help" | "?", []) => LineCommand::Help,
        ("quit" | "exit", []) => LineCommand::Quit,
        (verb, _) => return Err(invalid(format!("unrecognized command '{verb}'; try help"))),
    };
    Ok(Some(command))
}

fn parse_button(value: &str) -> Result<MouseButton, CliError> {
    match value {
        "none" | "0" => Ok(MouseButton::None),
        "left" | "1" => Ok(MouseButton::Left),
        "middle" | "2" => Ok(MouseButton::Middle),
        "right" | "3" => Ok(MouseButton::Right),
        other => Err(invalid(format!("unknown mouse button '{other}'"))),
    }
}

fn parse_delta(value: &str) -> Result<i32, CliError> {
    value
        .parse()
        .map_err(|_| invalid(format!("'{value}' is not a whole number")))
}

fn invalid(message: impl Into<String>) -> CliError {
    CliError::InvalidArgument(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_names_may_contain_spaces() {
        assert_eq!(
            parse_line("start super mario").unwrap(),
            Some(LineCommand::Start("super mario".into()))
        );
    }

    #[test]
    fn key_and_mouse_lines() {
        assert_eq!(
            parse_line("key ArrowLeft down").unwrap(),
            Some(LineCommand::Key {
                code: "ArrowLeft".into(),
                pressed: true
            })
        );
        assert_eq!(
            parse_line("mouse left -4 10").unwrap(),
            Some(LineCommand::Mouse(MouseInput {
                user: 0,
                button: MouseButton::Left,
                pos_x: -4,
                pos_y: 10,
            }))
        );
    }

    #[test]
    fn blank_and_bad_lines() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(matches!(
            parse_line("start"),
            Err(CliError::InvalidArgument(_))
        ));
        assert!(parse_line("key KeyZ sideways").is_err());
        assert!(parse_line("mouse wheel 1 1").is_err());
        assert!(parse_line("dance").is_err());
    }
}
