use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{
    CalculationDetails, CalculationStep, Tool, ToolContext, ToolError, ToolPayload, require_str,
};

pub(super) fn load(_ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    Ok(vec![Box::new(LetterCounterTool)])
}

/// Counts the letters in a piece of text
pub struct LetterCounterTool;

#[async_trait]
impl Tool for LetterCounterTool {
    fn name(&self) -> &str {
        "letter_counter"
    }

    fn description(&self) -> &str {
        "Count the letters in a text. Every alphabetic character counts as a letter; \
         digits, spaces and punctuation do not. Parameters: text (string). \
         Returns letters, vowels (a, e, i, o, u) and consonants."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The text to count letters in"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolPayload, ToolError> {
        let text = require_str(&args, "text")?;

        let letters = text.chars().filter(|c| c.is_alphabetic()).count();
        let vowels = text
            .chars()
            .filter(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u'))
            .count();
        let consonants = letters - vowels;

        Ok(ToolPayload::Calculation(CalculationDetails {
            calculation: "letter_count".to_string(),
            inputs: json!({ "text": text }),
            steps: vec![
                CalculationStep::new("letters", letters),
                CalculationStep::new("vowels", vowels),
                CalculationStep::new("consonants", consonants)
                    .with_formula("letters - vowels"),
            ],
            result: json!({
                "letters": letters,
                "vowels": vowels,
                "consonants": consonants,
            }),
        }))
    }
}
