//! Interpretation of a line typed by the local user.

pub const EXIT_COMMAND: &str = "!exit";
pub const FILE_COMMAND: &str = "!file";
pub const HELP_COMMAND: &str = "!help";

pub const HELP_TEXT: &str =
    "type a message and press enter to send it. !file [path] sends a file, !exit leaves the chat";

#[derive(Debug, PartialEq, Eq)]
pub enum LocalCommand {
    Exit,
    /// The path is optional; without it the next input line is used.
    SendFile(Option<String>),
    Help,
    Chat(String),
    Empty,
}

impl LocalCommand {
    /// Commands are matched exactly; anything else is chat text.
    pub fn parse(line: &str) -> Self {
        let text = line.trim_end();
        if text.is_empty() {
            return LocalCommand::Empty;
        }

        match text {
            EXIT_COMMAND => LocalCommand::Exit,
            HELP_COMMAND => LocalCommand::Help,
            FILE_COMMAND => LocalCommand::SendFile(None),
            _ => match text.strip_prefix(FILE_COMMAND) {
                Some(rest) if rest.starts_with(char::is_whitespace) => {
                    LocalCommand::SendFile(Some(rest.trim().to_string()))
                }
                _ => LocalCommand::Chat(text.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_commands() {
        assert_eq!(LocalCommand::parse("!exit"), LocalCommand::Exit);
        assert_eq!(LocalCommand::parse("!help\r\n"), LocalCommand::Help);
        assert_eq!(LocalCommand::parse("!file"), LocalCommand::SendFile(None));
        assert_eq!(
            LocalCommand::parse("!file \"/tmp/a b.txt\""),
            LocalCommand::SendFile(Some("\"/tmp/a b.txt\"".into()))
        );
    }

    #[test]
    fn near_misses_are_chat() {
        assert_eq!(LocalCommand::parse("!EXIT"), LocalCommand::Chat("!EXIT".into()));
        assert_eq!(LocalCommand::parse("!filex"), LocalCommand::Chat("!filex".into()));
        assert_eq!(
            LocalCommand::parse("  hello there "),
            LocalCommand::Chat("  hello there".into())
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(LocalCommand::parse(""), LocalCommand::Empty);
        assert_eq!(LocalCommand::parse("   \n"), LocalCommand::Empty);
    }
}
