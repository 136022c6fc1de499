use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use negotiator_agent::bootstrap::bootstrap;
use negotiator_agent::runtime::{ConversationRuntime, TurnKind};
use negotiator_core::config::LoadOptions;
use negotiator_core::domain::conversation::ConversationId;
use negotiator_core::handoff::{InMemoryHandoffSink, WorkflowHandoff};

use crate::commands::CommandResult;
use crate::logging::init_logging;

const COMMAND: &str = "chat";
const PROMPT: &str = "you> ";

#[derive(Debug, Default, PartialEq)]
pub struct ChatSummary {
    pub turns: usize,
    pub handoff: Option<WorkflowHandoff>,
}

pub fn run(options: LoadOptions, conversation_id: Option<String>) -> CommandResult {
    let app = match bootstrap(options) {
        Ok(app) => app,
        Err(error) => {
            return CommandResult::failure(COMMAND, "bootstrap", error.to_string(), 2);
        }
    };
    init_logging(&app.config);

    let async_runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                1,
            );
        }
    };

    let handoffs = InMemoryHandoffSink::default();
    let runtime = app.runtime.with_handoff_sink(Arc::new(handoffs));
    let conversation_id =
        conversation_id.map(ConversationId::new).unwrap_or_else(ConversationId::generate);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let summary = async_runtime.block_on(converse(
        &runtime,
        conversation_id.clone(),
        stdin.lock(),
        &mut stdout,
    ));

    match summary {
        Ok(ChatSummary { handoff: Some(handoff), turns }) => CommandResult::success(
            COMMAND,
            format!(
                "conversation {conversation_id} handed off to {} after {turns} turns",
                handoff.resolved_stage_id
            ),
        ),
        Ok(ChatSummary { handoff: None, turns }) => CommandResult::success(
            COMMAND,
            format!("conversation {conversation_id} ended after {turns} turns without a handoff"),
        ),
        Err(error) => CommandResult::failure(COMMAND, "io", format!("{error:#}"), 1),
    }
}

/// Reads utterances line by line until `/quit`, end of input, or a handoff.
pub async fn converse<R, W>(
    runtime: &ConversationRuntime,
    conversation_id: ConversationId,
    input: R,
    output: &mut W,
) -> Result<ChatSummary>
where
    R: BufRead,
    W: Write,
{
    let mut summary = ChatSummary::default();
    writeln!(output, "conversation {conversation_id} (type /reset to start over, /quit to exit)")?;

    let mut lines = input.lines();
    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read from input")?;
        let text = line.trim();

        match text {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                runtime.abandon(&conversation_id).await;
                writeln!(output, "negotiator> Starting over. What would you like to do?")?;
                continue;
            }
            _ => {}
        }

        summary.turns += 1;
        let outcome = match runtime.handle_utterance(&conversation_id, text).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let interface = error.into_interface(conversation_id.as_str());
                writeln!(output, "negotiator> {}", interface.user_message())?;
                continue;
            }
        };

        writeln!(output, "negotiator> {}", outcome.message)?;
        if outcome.kind == TurnKind::RetryLater {
            continue;
        }
        if let Some(handoff) = outcome.handoff {
            let rendered = serde_json::to_string_pretty(&handoff)
                .context("failed to serialize the handoff")?;
            writeln!(output, "{rendered}")?;
            summary.handoff = Some(handoff);
            break;
        }
    }

    Ok(summary)
}
