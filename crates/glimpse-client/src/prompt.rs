//! Prompt text sent to the model.

use glimpse_sandbox::COMPONENT_NAME;

use crate::generator::GenerationRequest;

/// Cap on the serialized sample embedded in a prompt.
pub const SAMPLE_LIMIT: usize = 4 * 1024;

/// System instructions shared by every request.
pub fn system_prompt() -> String {
    format!(
        "You write a single React function component named `{COMPONENT_NAME}` \
         that receives `{{ data }}` as its only prop and renders it.\n\
         Rules:\n\
         - Declare it as `function {COMPONENT_NAME}({{ data }}) {{ ... }}` and return JSX.\n\
         - No imports; React and its hooks are in scope.\n\
         - Do not use eval, Function, timers with string arguments, fetch, \
         XMLHttpRequest, WebSocket, cookies, localStorage, sessionStorage, \
         dangerouslySetInnerHTML, innerHTML or script/iframe/object/embed tags.\n\
         - Attach event handlers as function references, never as strings.\n\
         - Reply with the code only."
    )
}

/// The user turn for `request`.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let sample = serde_json::to_string_pretty(&request.sample_data)
        .unwrap_or_else(|_| request.sample_data.to_string());
    let sample = truncate(&sample, SAMPLE_LIMIT);

    let mut prompt = format!(
        "Endpoint: {}\n\nSample response:\n```json\n{}\n```\n",
        request.endpoint, sample
    );
    if let Some(instructions) = request.instructions.as_deref().map(str::trim) {
        if !instructions.is_empty() {
            prompt.push_str("\nAdditional instructions:\n");
            prompt.push_str(instructions);
            prompt.push('\n');
        }
    }
    prompt
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated)", &text[..end])
}
