use agent_session::{ApprovalScope, QuestionAnswers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Stop,
    Queue,
    New,
    Approve {
        request_id: String,
        scope: ApprovalScope,
    },
    Deny {
        request_id: String,
    },
    Answer {
        request_id: String,
        answers: QuestionAnswers,
    },
    Quit,
    /// A known command with missing or malformed arguments.
    Usage(&'static str),
    Unknown(String),
}

pub const APPROVE_USAGE: &str = "Usage: /approve <request-id> [session]";
pub const DENY_USAGE: &str = "Usage: /deny <request-id>";
pub const ANSWER_USAGE: &str = "Usage: /answer <request-id> <header>=<label>[,<label>...]";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = words.next().unwrap_or(trimmed).to_string();
    let args: Vec<&str> = words.collect();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/stop" => SlashCommand::Stop,
        "/queue" => SlashCommand::Queue,
        "/new" => SlashCommand::New,
        "/quit" => SlashCommand::Quit,
        "/approve" => match args.as_slice() {
            [request_id] => SlashCommand::Approve {
                request_id: request_id.to_string(),
                scope: ApprovalScope::Once,
            },
            [request_id, "session"] => SlashCommand::Approve {
                request_id: request_id.to_string(),
                scope: ApprovalScope::Session,
            },
            _ => SlashCommand::Usage(APPROVE_USAGE),
        },
        "/deny" => match args.as_slice() {
            [request_id] => SlashCommand::Deny {
                request_id: request_id.to_string(),
            },
            _ => SlashCommand::Usage(DENY_USAGE),
        },
        "/answer" => match args.split_first() {
            Some((request_id, pairs)) if !pairs.is_empty() => match parse_answers(pairs) {
                Some(answers) => SlashCommand::Answer {
                    request_id: request_id.to_string(),
                    answers,
                },
                None => SlashCommand::Usage(ANSWER_USAGE),
            },
            _ => SlashCommand::Usage(ANSWER_USAGE),
        },
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}

fn parse_answers(pairs: &[&str]) -> Option<QuestionAnswers> {
    let mut answers = QuestionAnswers::new();
    for pair in pairs {
        let (header, labels) = pair.split_once('=')?;
        let labels: Vec<String> = labels
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect();
        if header.is_empty() || labels.is_empty() {
            return None;
        }
        answers.insert(header.to_string(), labels);
    }
    Some(answers)
}
