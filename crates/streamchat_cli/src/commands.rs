#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    /// Print the transcript as rendered markup pairs.
    Transcript,
    Quit,
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
/help        show this help
/transcript  print every exchange as display markup
/quit        leave
Ctrl-C cancels a reply that is still streaming.";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let command = trimmed
        .split_whitespace()
        .next()
        .unwrap_or(trimmed)
        .to_string();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/transcript" => SlashCommand::Transcript,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::{parse_slash_command, SlashCommand};

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_slash_command("hello there"), None);
        assert_eq!(parse_slash_command("  path/with/slash"), None);
    }

    #[test]
    fn known_commands_ignore_arguments_and_whitespace() {
        assert_eq!(parse_slash_command("  /quit now "), Some(SlashCommand::Quit));
        assert_eq!(parse_slash_command("/exit"), Some(SlashCommand::Quit));
        assert_eq!(
            parse_slash_command("/transcript"),
            Some(SlashCommand::Transcript)
        );
        assert_eq!(parse_slash_command("/help"), Some(SlashCommand::Help));
    }

    #[test]
    fn unknown_commands_keep_their_name() {
        assert_eq!(
            parse_slash_command("/retry 3"),
            Some(SlashCommand::Unknown("/retry".to_string()))
        );
    }
}
