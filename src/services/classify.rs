//! Maps backend failures onto [`ErrorKind`]s.
//!
//! Status codes decide first. The configurable substring lists only come into
//! play where a backend reports its failure as free text (gateway error
//! bodies, error payloads inside a 200 response).

use serde_json::Value;

use crate::core::config::ClassifierConfig;
use crate::core::error::LlmError;

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    transient: Vec<String>,
    auth: Vec<String>,
    authorization: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from(&ClassifierConfig::default())
    }
}

impl From<&ClassifierConfig> for ErrorClassifier {
    fn from(config: &ClassifierConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        Self {
            transient: lower(&config.transient_patterns),
            auth: lower(&config.auth_patterns),
            authorization: lower(&config.authorization_patterns),
        }
    }
}

fn matches_any(haystack: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| haystack.contains(p.as_str()))
}

impl ErrorClassifier {
    /// Classifies a free-text failure description.
    pub fn classify_message(&self, message: &str) -> LlmError {
        let lower = message.to_lowercase();
        // authorization before auth: "not authorized" bodies often mention the token too
        if matches_any(&lower, &self.authorization) {
            LlmError::Authorization(message.to_string())
        } else if matches_any(&lower, &self.auth) {
            LlmError::Auth(message.to_string())
        } else if matches_any(&lower, &self.transient) {
            LlmError::Transient(message.to_string())
        } else {
            LlmError::Other(message.to_string())
        }
    }

    pub fn classify_status(&self, status: u16, body: &str) -> LlmError {
        let message = format!("HTTP {}: {}", status, body);
        match status {
            429 | 500 | 502 | 503 | 504 | 529 => LlmError::Transient(message),
            401 => LlmError::Auth(message),
            403 => match self.classify_message(body) {
                // expired gateway tokens come back as 403 with a token message
                LlmError::Auth(_) => LlmError::Auth(message),
                _ => LlmError::Authorization(message),
            },
            400 | 404 | 413 | 422 => match self.classify_message(body) {
                LlmError::Other(_) => LlmError::InvalidRequest {
                    status,
                    message: body.to_string(),
                },
                classified => classified,
            },
            _ => match self.classify_message(body) {
                LlmError::Other(_) => LlmError::Other(message),
                classified => classified,
            },
        }
    }

    pub fn classify_transport(&self, err: &reqwest::Error) -> LlmError {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            LlmError::Transient(err.to_string())
        } else {
            self.classify_message(&err.to_string())
        }
    }

    /// A JSON body that carries an explicit `error`/`Error` field, as an error.
    pub fn classify_error_payload(&self, value: &Value) -> Option<LlmError> {
        let error = value.get("error").or_else(|| value.get("Error"))?;
        if error.is_null() {
            return None;
        }
        let text = match error {
            Value::String(s) => s.clone(),
            Value::Object(map) => {
                let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
                let message = map.get("message").and_then(Value::as_str).unwrap_or_default();
                if kind.is_empty() && message.is_empty() {
                    error.to_string()
                } else {
                    format!("{} {}", kind, message).trim().to_string()
                }
            }
            other => other.to_string(),
        };
        Some(self.classify_message(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_status_codes() {
        let c = ErrorClassifier::default();
        assert_eq!(c.classify_status(429, "slow down").kind(), ErrorKind::Transient);
        assert_eq!(c.classify_status(529, "overloaded").kind(), ErrorKind::Transient);
        assert_eq!(c.classify_status(401, "bad key").kind(), ErrorKind::Auth);
        assert_eq!(
            c.classify_status(403, "User is not authorized to perform: bedrock:InvokeModel").kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            c.classify_status(403, "The security token included in the request is expired").kind(),
            ErrorKind::Auth
        );
        assert_eq!(c.classify_status(400, "bad model id").kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_messages_are_case_insensitive() {
        let c = ErrorClassifier::default();
        assert_eq!(c.classify_message("ThrottlingException: Rate exceeded").kind(), ErrorKind::Transient);
        assert_eq!(
            c.classify_message("Failed to process EventStream payload").kind(),
            ErrorKind::Transient
        );
        assert_eq!(c.classify_message("UnrecognizedClientException").kind(), ErrorKind::Auth);
        assert_eq!(c.classify_message("something odd").kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_error_payloads() {
        let c = ErrorClassifier::default();
        let err = c
            .classify_error_payload(&json!({"error": {"type": "overloaded_error", "message": "Overloaded"}}))
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Transient);

        let err = c.classify_error_payload(&json!({"Error": "ServiceUnavailableException"})).unwrap();
        assert_eq!(err.kind(), ErrorKind::Transient);

        assert!(c.classify_error_payload(&json!({"completion": "ok"})).is_none());
        assert!(c.classify_error_payload(&json!({"error": null, "completion": "ok"})).is_none());
    }

    #[test]
    fn test_custom_patterns() {
        let c = ErrorClassifier::from(&ClassifierConfig {
            transient_patterns: vec!["Try Later".to_string()],
            auth_patterns: vec![],
            authorization_patterns: vec![],
        });
        assert_eq!(c.classify_message("please try later").kind(), ErrorKind::Transient);
        assert_eq!(c.classify_message("throttling").kind(), ErrorKind::Fatal);
    }
}
