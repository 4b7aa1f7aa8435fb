//! Prompt assembly for think steps.
//!
//! Layout: one system message (instructions plus any retrieved knowledge),
//! the user query, then every act/observe pair recorded so far as an
//! assistant tool call and its tool result. Failed think attempts are not
//! replayed.

use opsloop_core::{
    Message, MessageToolCall, Prompt, ReasoningStep, Snippet, StepPhase, ToolDefinition,
};
use opsloop_knowledge::format_context;

use crate::budget::LoopPolicy;

/// Operator instructions used when the configuration does not override them.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert MLOps Site Reliability Engineer managing Kubernetes clusters. \
Use the available tools to check cluster status and search the runbook knowledge base. \
If the user asks for 'prod' or 'production', use cluster_id='prod'. \
If the user asks for 'dev' or 'development', use cluster_id='dev'. \
Do not ask for clarification if the intent is reasonably clear; call the tool immediately. \
When you have enough information, answer clearly and concisely.";

/// Id linking an act step to its observation.
pub(crate) fn call_id(act_seq: u32) -> String {
    format!("call_{act_seq}")
}

pub(crate) fn system_message(policy: &LoopPolicy, snippets: &[Snippet]) -> Message {
    if snippets.is_empty() {
        return Message::system(policy.system_prompt.clone());
    }
    Message::system(format!(
        "{}\n\n## Relevant knowledge\n{}",
        policy.system_prompt,
        format_context(snippets, policy.max_context_length)
    ))
}

/// Build the prompt for the next think step.
pub fn build_prompt(
    policy: &LoopPolicy,
    tools: Vec<ToolDefinition>,
    query: &str,
    snippets: &[Snippet],
    history: &[ReasoningStep],
) -> Prompt {
    let mut messages = vec![system_message(policy, snippets), Message::user(query)];

    let mut open_call: Option<String> = None;
    for step in history {
        match (step.phase, &step.invocation) {
            (StepPhase::Act, Some(invocation)) => {
                let id = call_id(step.seq);
                messages.push(Message::assistant_tool_call(
                    step.output.clone(),
                    MessageToolCall {
                        id: id.clone(),
                        name: invocation.name.clone(),
                        arguments: invocation.arguments.to_string(),
                    },
                ));
                open_call = Some(id);
            }
            (StepPhase::Observe, _) => {
                if let Some(id) = open_call.take() {
                    messages.push(Message::tool_result(id, step.output.clone()));
                }
            }
            _ => {}
        }
    }

    let mut prompt = Prompt::new(messages, tools);
    prompt.temperature = policy.temperature;
    prompt.max_tokens = policy.max_tokens;
    prompt
}
