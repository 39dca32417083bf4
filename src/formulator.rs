//! Response Formulator
//!
//! Turns ledger rows back into language in two passes. The summary pass is
//! grounded strictly in the supplied rows; the enrichment pass may add
//! cross-row observations and silently falls back to the summary on any
//! failure.

use std::sync::Arc;
use tracing::{info, warn};

use crate::command::Command;
use crate::model::{LanguageModel, Prompt};
use crate::session::{format_history, Turn};
use crate::Result;

const SUMMARIZE_PROMPT: &str = "You summarize ledger data for a motor repair technician. \
Answer the question in clear, natural language using only the rows provided. \
Amounts are in paise; report them in rupees (amount_minor_units / 100). \
Never mention a figure, customer or date that does not appear in the rows.";

const ENRICH_PROMPT: &str = "You are a proactive business advisor for a motor repair technician. \
Review the answer and add short, useful insights if the data supports them: repeat customers, \
trends, or practical suggestions. Do not change any figure. If there is nothing to add, \
return the answer unchanged.";

pub struct ResponseFormulator {
    model: Arc<dyn LanguageModel>,
}

impl ResponseFormulator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Stage A failure is returned; stage B failure falls back to stage A.
    pub async fn formulate(
        &self,
        question: &str,
        rows_json: &str,
        history: &[Turn],
    ) -> Result<Command> {
        let summary_system = format!(
            "{}\n\nQuestion: {}\nRows: {}",
            SUMMARIZE_PROMPT, question, rows_json
        );
        let summary = self
            .model
            .complete(&Prompt::text(summary_system, question))
            .await?;

        let enrich_system = format!(
            "{}\n\nQuestion: {}\nAnswer: {}\nConversation:\n{}",
            ENRICH_PROMPT,
            question,
            summary,
            format_history(history)
        );

        let answer = match self.model.complete(&Prompt::text(enrich_system, question)).await {
            Ok(enriched) if !enriched.trim().is_empty() => enriched,
            Ok(_) => {
                warn!("Enrichment returned nothing, using summary");
                summary
            }
            Err(e) => {
                warn!("Enrichment failed, using summary: {}", e);
                summary
            }
        };

        info!(chars = answer.len(), "Formulated answer");
        Ok(Command::Answer(answer))
    }
}
