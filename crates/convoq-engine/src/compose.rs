//! Prompt assembly for the generation gateway.

use convoq_core::{Direction, Message, Snippet, WorkflowStep, Workspace};

/// Builds the generation prompt in a fixed order: workspace instructions,
/// active workflow step, grounded snippets with provenance, bounded recent
/// history, then the new incoming message.
pub fn compose_prompt(
    workspace: &Workspace,
    active_step: Option<&WorkflowStep>,
    snippets: &[Snippet],
    history: &[Message],
    incoming: &str,
) -> String {
    let mut prompt = String::new();

    let bot = workspace.bot_name.as_deref().unwrap_or("the assistant");
    prompt.push_str(&format!(
        "You are {}, answering a customer on behalf of {}.\n",
        bot, workspace.name
    ));
    if !workspace.prompt_instructions.is_empty() {
        prompt.push_str(&workspace.prompt_instructions);
        prompt.push('\n');
    }

    if let Some(step) = active_step {
        prompt.push_str(&format!("\nCurrent objective: {}\n", step.description));
    }

    if !snippets.is_empty() {
        prompt.push_str("\nRelevant knowledge:\n");
        for snippet in snippets {
            prompt.push_str(&format!("[{}] {}\n", snippet.provenance, snippet.content));
        }
    }

    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for message in history {
            let speaker = match message.direction {
                Direction::Incoming => "Customer",
                Direction::Outgoing => "Assistant",
            };
            prompt.push_str(&format!("{}: {}\n", speaker, message.content));
        }
    }

    prompt.push_str(&format!("\nCustomer: {}\nAssistant:", incoming));
    prompt
}
