//! Conversational replies for non-business utterances
//!
//! General chat and questions are answered directly by the model; personal
//! requests get a polite decline that steers back to the business.

use chrono::Local;
use std::sync::Arc;
use tracing::info;

use crate::classifier::Category;
use crate::command::Command;
use crate::model::{LanguageModel, Prompt};
use crate::session::{format_history, Turn};
use crate::Result;

const GENERAL_PROMPT: &str = "You are a helpful assistant for a motor repair technician in India. \
Have a natural conversation and answer general questions briefly and helpfully. \
Mention that you can also keep track of income, expenses and customers when it fits.";

const PERSONAL_PROMPT: &str = "You are a business assistant for a motor repair technician in India. \
The user asked for personal advice unrelated to the business. Politely decline in one or two \
sentences and offer help with recording income and expenses, customer history or reports instead.";

const GREETING_MARKERS: &[&str] = &["hello", "hi", "namaste", "good morning"];
const QUESTION_MARKERS: &[&str] = &["help", "what", "how"];

pub struct ConversationalResponder {
    model: Arc<dyn LanguageModel>,
}

impl ConversationalResponder {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn reply(&self, category: Category, utterance: &str, history: &[Turn]) -> Result<Command> {
        let base = match category {
            Category::Personal => PERSONAL_PROMPT,
            _ => GENERAL_PROMPT,
        };

        let mut system = format!("{}\n\nCurrent date: {}", base, Local::now().format("%Y-%m-%d"));
        if !history.is_empty() {
            system.push_str("\n\nConversation so far:\n");
            system.push_str(&format_history(history));
        }

        let answer = self.model.complete(&Prompt::text(system, utterance)).await?;

        let command = match category {
            Category::Personal => Command::PersonalResponse(answer),
            _ => tag_general_reply(utterance, answer),
        };

        info!(intent = command.intent(), "Conversational reply");
        Ok(command)
    }
}

/// Greeting if the reply greets, question if the user asked one, else general.
fn tag_general_reply(utterance: &str, answer: String) -> Command {
    let reply_lower = answer.to_lowercase();
    let reply_words: Vec<&str> = reply_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    let greets = GREETING_MARKERS.iter().any(|marker| {
        if marker.contains(' ') {
            reply_lower.contains(marker)
        } else {
            reply_words.contains(marker)
        }
    });

    let utterance_lower = utterance.to_lowercase();
    if greets {
        Command::Greeting(answer)
    } else if utterance.contains('?')
        || QUESTION_MARKERS
            .iter()
            .any(|marker| utterance_lower.contains(marker))
    {
        Command::Question(answer)
    } else {
        Command::GeneralResponse(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    #[test]
    fn test_reply_tagging() {
        assert_eq!(
            tag_general_reply("hey there", "Namaste! How can I help?".into()).intent(),
            "greeting"
        );
        assert_eq!(
            tag_general_reply("what is photosynthesis?", "Plants turn light into sugar.".into())
                .intent(),
            "question"
        );
        assert_eq!(
            tag_general_reply("nice weather", "It certainly is.".into()).intent(),
            "general_response"
        );
        // "this" must not read as a greeting
        assert_eq!(
            tag_general_reply("tell me about this", "This is a motor.".into()).intent(),
            "general_response"
        );
    }

    #[tokio::test]
    async fn test_personal_reply() {
        let model = Arc::new(
            ScriptedModel::new().respond("I can only help with your business records."),
        );
        let responder = ConversationalResponder::new(model.clone());

        let command = responder
            .reply(Category::Personal, "should I buy a car?", &[])
            .await
            .unwrap();

        assert_eq!(
            command,
            Command::PersonalResponse("I can only help with your business records.".into())
        );
        assert!(model.prompts()[0].system.contains("Politely decline"));
        assert!(!model.prompts()[0].json_output);
    }
}
