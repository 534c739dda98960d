//! Request Builder: turns validated user input into a chat-completion request.

use serde::{Deserialize, Serialize};

use crate::analysis::models::SectionKind;
use crate::analysis::prompts::{ANALYSIS_PROMPT_TEMPLATE, ANALYSIS_SYSTEM_TEMPLATE};
use crate::errors::AppError;
use crate::llm_client::prompts::{ndjson_contract, render_template};
use crate::llm_client::{ChatCompletionRequest, ChatMessage, TEMPERATURE};

/// The two user inputs, trimmed and known to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisInputs {
    pub occupation: String,
    pub field_of_study: String,
}

impl AnalysisInputs {
    /// Trims both inputs and rejects blanks. Raised before any network call.
    pub fn new(occupation: &str, field_of_study: &str) -> Result<Self, AppError> {
        let occupation = occupation.trim();
        let field_of_study = field_of_study.trim();
        if occupation.is_empty() || field_of_study.is_empty() {
            return Err(AppError::Validation(
                "Enter both a target occupation and a current field of study, e.g. \
                 occupation = \"Product Manager\", field of study = \"Chinese Literature\"."
                    .to_string(),
            ));
        }
        Ok(Self {
            occupation: occupation.to_string(),
            field_of_study: field_of_study.to_string(),
        })
    }
}

/// The fixed system instruction carrying the NDJSON response contract.
pub fn system_prompt() -> String {
    let contract = ndjson_contract(SectionKind::ALL.iter().map(|k| k.as_str()));
    render_template(ANALYSIS_SYSTEM_TEMPLATE, &[("ndjson_contract", &contract)])
}

/// The user instruction embedding both inputs and the six-section schema.
pub fn user_prompt(inputs: &AnalysisInputs) -> String {
    render_template(
        ANALYSIS_PROMPT_TEMPLATE,
        &[
            ("occupation", &inputs.occupation),
            ("field_of_study", &inputs.field_of_study),
        ],
    )
}

/// Assembles the outbound request body.
pub fn build_chat_request(inputs: &AnalysisInputs, model: &str, stream: bool) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(system_prompt()),
            ChatMessage::user(user_prompt(inputs)),
        ],
        temperature: TEMPERATURE,
        stream,
    }
}
