use std::sync::Arc;

use agent_session::{
    Command, ConfirmationResponse, InteractionOutcome, SubmitOutcome, TaskCoordinator,
};

use crate::commands::{parse_slash_command, SlashCommand};
use crate::console::Console;

pub const HELP_TEXT: &str = "Commands: /help, /stop, /queue, /new, /approve <id> [session], \
/deny <id>, /answer <id> <header>=<label>, /quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Turns input lines into coordinator calls.
pub struct Repl {
    coordinator: Arc<TaskCoordinator>,
    console: Arc<Console>,
}

impl Repl {
    pub fn new(coordinator: Arc<TaskCoordinator>, console: Arc<Console>) -> Self {
        Self {
            coordinator,
            console,
        }
    }

    pub fn greet(&self) {
        let profile = self.coordinator.profile();
        self.console.print(&format!(
            "{} ({}) ready. Type /help for commands.",
            profile.provider_id, profile.model_id
        ));
    }

    pub fn handle_line(&self, line: &str) -> Flow {
        let prompt = line.trim();
        if prompt.is_empty() {
            return Flow::Continue;
        }

        if let Some(command) = parse_slash_command(prompt) {
            return self.on_command(command);
        }

        match self.coordinator.submit(Command::text(prompt)) {
            Ok(SubmitOutcome::Queued { position, .. }) => {
                self.console.print(&format!("[queued #{position}]"));
            }
            Ok(SubmitOutcome::Scheduled { .. }) => {}
            Err(error) => self.console.print(&format!("Error: {error}")),
        }
        Flow::Continue
    }

    fn on_command(&self, command: SlashCommand) -> Flow {
        match command {
            SlashCommand::Help => self.console.print(HELP_TEXT),
            SlashCommand::Stop => {
                if !self.coordinator.abort() {
                    self.console.print("Nothing is running.");
                }
            }
            SlashCommand::Queue => {
                let queued = self.coordinator.queued_commands();
                if queued.is_empty() {
                    self.console.print("Queue is empty.");
                }
                for (index, command) in queued.iter().enumerate() {
                    self.console
                        .print(&format!("{}. {}", index + 1, command.display));
                }
            }
            SlashCommand::New => {
                let session_id = self.coordinator.create_session();
                self.console.print(&format!("[session] {session_id}"));
            }
            SlashCommand::Approve { request_id, scope } => {
                let response = ConfirmationResponse::approve(scope);
                self.report_confirmation(&request_id, response);
            }
            SlashCommand::Deny { request_id } => {
                self.report_confirmation(&request_id, ConfirmationResponse::deny());
            }
            SlashCommand::Answer {
                request_id,
                answers,
            } => match self.coordinator.answer_question(&request_id, answers) {
                Ok(()) => self.console.print(&format!("Answered {request_id}.")),
                Err(error) => self.console.print(&format!("Error: {error}")),
            },
            SlashCommand::Quit => {
                self.coordinator.abort();
                return Flow::Quit;
            }
            SlashCommand::Usage(usage) => self.console.print(usage),
            SlashCommand::Unknown(command) => {
                self.console.print(&format!("Unknown command: {command}"));
            }
        }

        Flow::Continue
    }

    fn report_confirmation(&self, request_id: &str, response: ConfirmationResponse) {
        match self.coordinator.respond_confirmation(request_id, response) {
            Ok(InteractionOutcome::Approved { .. }) => {
                self.console.print(&format!("Approved {request_id}."));
            }
            Ok(_) => self.console.print(&format!("Denied {request_id}.")),
            Err(error) => self.console.print(&format!("Error: {error}")),
        }
    }
}
