//! Request/response types for the provider contract.

use serde::{Deserialize, Serialize};

/// A successful provider generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Provider that produced the content
    pub provider: String,
    /// Model used
    pub model: String,
    /// Raw generated text
    pub content: String,
}

/// Structured judgment the agent expects the LLM to return.
///
/// The wire contract is JSON:
/// `{"is_injection": bool, "confidence": float, "reasoning": str}`.
/// Any deviation is tolerated by the caller falling back to ALLOW.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionJudgment {
    pub is_injection: bool,
    pub confidence: f64,
    pub reasoning: String,
}

impl InjectionJudgment {
    /// Parse a judgment from raw model output.
    ///
    /// Tolerates surrounding prose and markdown code fences; returns `None`
    /// when no valid JSON object can be recovered.
    pub fn parse(content: &str) -> Option<Self> {
        let trimmed = content.trim();

        if let Ok(judgment) = serde_json::from_str::<Self>(trimmed) {
            return Some(judgment);
        }

        // Strip markdown fences: ```json ... ``` or ``` ... ```
        let unfenced = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .map(str::trim);
        if let Some(inner) = unfenced {
            if let Ok(judgment) = serde_json::from_str::<Self>(inner) {
                return Some(judgment);
            }
        }

        // Last resort: the first '{' .. last '}' window
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end > start {
            serde_json::from_str::<Self>(&trimmed[start..=end]).ok()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let judgment = InjectionJudgment::parse(
            r#"{"is_injection": true, "confidence": 0.92, "reasoning": "role override"}"#,
        )
        .unwrap();
        assert!(judgment.is_injection);
        assert!((judgment.confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "```json\n{\"is_injection\": false, \"confidence\": 0.4, \"reasoning\": \"benign\"}\n```";
        let judgment = InjectionJudgment::parse(content).unwrap();
        assert!(!judgment.is_injection);
    }

    #[test]
    fn test_parse_json_with_prose() {
        let content = "Here is my analysis: {\"is_injection\": true, \"confidence\": 0.8, \"reasoning\": \"delimiters\"} as requested.";
        let judgment = InjectionJudgment::parse(content).unwrap();
        assert!(judgment.is_injection);
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(InjectionJudgment::parse("I cannot determine that.").is_none());
        assert!(InjectionJudgment::parse("").is_none());
        assert!(InjectionJudgment::parse("{not json}").is_none());
    }
}
