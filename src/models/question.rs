//! Question and clarification DTOs

use crate::pipeline::ChartKind;
use serde::Deserialize;
use validator::Validate;

/// Request to ask a question
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[validate(length(min = 1, max = 500, message = "Question must be between 1 and 500 characters"))]
    pub question: String,
    /// Chart to draw from the result, inferred from the wording when absent
    #[serde(default)]
    pub chart: Option<ChartKind>,
}

/// Answer to a pending clarification: an option index or the wanted value
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyRequest {
    #[validate(length(min = 1, max = 200, message = "Choice must be between 1 and 200 characters"))]
    pub choice: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_request_validation() {
        let ok: AskRequest =
            serde_json::from_str(r#"{"question": "Qui a gagné à Cocody ?", "chart": "bar"}"#).unwrap();
        assert!(ok.validate().is_ok());
        assert_eq!(ok.chart, Some(ChartKind::Bar));

        let empty: AskRequest = serde_json::from_str(r#"{"question": ""}"#).unwrap();
        assert!(empty.validate().is_err());
        assert!(serde_json::from_str::<AskRequest>(r#"{"question": "x", "chart": "radar"}"#).is_err());
    }
}
