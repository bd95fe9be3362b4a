use std::future::Future;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

pub trait LlmProvider: Send + Sync {
    /// Send messages to the model and return the assistant text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    fn name(&self) -> &str;

    /// Ask for a JSON document matching the schema of `T` and deserialize it.
    ///
    /// The default implementation appends a system instruction carrying the JSON
    /// schema and parses the first JSON object found in the reply.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::StructuredParse` if the reply does not deserialize into `T`.
    fn chat_typed<T>(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<T, LlmError>> + Send
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
        Self: Sized,
    {
        async move {
            let schema = serde_json::to_string(&schemars::schema_for!(T))?;
            let mut prompt = messages.to_vec();
            prompt.push(Message::system(format!(
                "Respond with a single JSON object that conforms to this JSON schema. \
                 Do not add any prose.\n{schema}"
            )));
            let raw = self.chat(&prompt).await?;
            parse_structured(&raw)
        }
    }
}

/// Parse a structured reply, tolerating markdown code fences and surrounding prose.
///
/// # Errors
///
/// Returns `LlmError::StructuredParse` if no JSON object deserializes into `T`.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let candidate = extract_json_object(raw).unwrap_or(raw);
    serde_json::from_str::<T>(candidate).map_err(|e| LlmError::StructuredParse(e.to_string()))
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Sample {
        value: String,
    }

    #[test]
    fn role_as_str() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn parse_structured_plain_json() {
        let sample: Sample = parse_structured(r#"{"value":"x"}"#).unwrap();
        assert_eq!(sample.value, "x");
    }

    #[test]
    fn parse_structured_strips_code_fence() {
        let raw = "```json\n{\"value\": \"fenced\"}\n```";
        let sample: Sample = parse_structured(raw).unwrap();
        assert_eq!(sample.value, "fenced");
    }

    #[test]
    fn parse_structured_ignores_surrounding_prose() {
        let raw = "Sure! Here it is: {\"value\": \"inner\"} hope that helps";
        let sample: Sample = parse_structured(raw).unwrap();
        assert_eq!(sample.value, "inner");
    }

    #[test]
    fn parse_structured_rejects_garbage() {
        let err = parse_structured::<Sample>("no json here").unwrap_err();
        assert!(matches!(err, LlmError::StructuredParse(_)));
    }

    #[test]
    fn parse_structured_rejects_wrong_shape() {
        let err = parse_structured::<Sample>(r#"{"other": 1}"#).unwrap_err();
        assert!(matches!(err, LlmError::StructuredParse(_)));
    }

    struct Echo(String);

    impl LlmProvider for Echo {
        async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
            assert!(
                messages
                    .last()
                    .is_some_and(|m| m.role == Role::System && m.content.contains("schema"))
            );
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn chat_typed_default_appends_schema_instruction() {
        let provider = Echo(r#"{"value": "typed"}"#.into());
        let out: Sample = provider.chat_typed(&[Message::user("hi")]).await.unwrap();
        assert_eq!(
            out,
            Sample {
                value: "typed".into()
            }
        );
    }
}
