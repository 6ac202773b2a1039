use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{ExtractError, Result};
use crate::schema::Entity;

/// Prefix placed before the document text in the user message.
pub const USER_PREFIX: &str = "# Privacy Policy:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Read an instruction template once; the caller keeps it for the process lifetime.
pub fn load_template(path: impl AsRef<Path>) -> Result<Arc<str>> {
    let path = path.as_ref();
    let template = std::fs::read_to_string(path)
        .map_err(|e| ExtractError::Config(format!("cannot read prompt template {}: {e}", path.display())))?;

    if template.trim().is_empty() {
        return Err(ExtractError::Config(format!("prompt template {} is empty", path.display())));
    }
    Ok(Arc::from(template))
}

pub fn build_user_message(document_text: &str) -> Message {
    Message::user(format!("{USER_PREFIX}{document_text}"))
}

/// Pairs the fixed instruction template with a document.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    system_prompt: Arc<str>,
}

impl PromptAssembler {
    pub fn new(system_prompt: Arc<str>) -> Self {
        Self { system_prompt }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_template(path)?))
    }

    /// Exactly two messages: the template as system, the whole document as user.
    pub fn assemble(&self, document_text: &str) -> Vec<Message> {
        vec![
            Message::system(&*self.system_prompt),
            build_user_message(document_text),
        ]
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

/// A policy excerpt and the entities a correct extraction finds in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotExample {
    pub text: String,
    pub entities: Vec<Entity>,
}

/// System prompt for schema-free extraction: instructions, worked examples, then output rules.
pub fn build_few_shot_prompt(instructions: &str, examples: &[FewShotExample]) -> String {
    let mut prompt = String::from(instructions.trim_end());
    prompt.push_str("\n\n");

    for (i, example) in examples.iter().enumerate() {
        let answer = serde_json::json!({ "entities": example.entities });
        let answer = serde_json::to_string_pretty(&answer).unwrap_or_else(|_| answer.to_string());
        prompt.push_str(&format!(
            "## Example {}\n\nText:\n{}\n\nOutput:\n```json\n{}\n```\n\n",
            i + 1,
            example.text.trim(),
            answer
        ));
    }

    prompt.push_str(
        "Answer with a single ```json fenced block containing an object with an \"entities\" array. \
Every entity must have the string fields name, category, label, purpose, situation and subject.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_assemble_two_messages() {
        let assembler = PromptAssembler::new(Arc::from("Extract personal information."));
        let messages = assembler.assemble("用户需提供手机号码用于注册");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::system("Extract personal information."));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "# Privacy Policy:\n用户需提供手机号码用于注册");
    }

    #[test]
    fn test_document_is_not_truncated() {
        let assembler = PromptAssembler::new(Arc::from("sys"));
        let long_text = "x".repeat(35_999);
        let messages = assembler.assemble(&long_text);
        assert_eq!(messages[1].content.len(), USER_PREFIX.len() + long_text.len());
    }

    #[test]
    fn test_load_template_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "# Instructions\nList every datum.").unwrap();

        let assembler = PromptAssembler::from_file(file.path()).unwrap();
        assert_eq!(assembler.system_prompt(), "# Instructions\nList every datum.");
    }

    #[test]
    fn test_missing_or_empty_template_is_config_error() {
        let err = PromptAssembler::from_file("/nonexistent/prompt.md").unwrap_err();
        assert!(matches!(err, ExtractError::Config(_)));

        let file = tempfile::NamedTempFile::new().unwrap();
        let err = load_template(file.path()).unwrap_err();
        assert!(matches!(err, ExtractError::Config(_)));
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_few_shot_prompt_embeds_examples() {
        let example = FewShotExample {
            text: "我们收集您的手机号码".into(),
            entities: vec![Entity {
                name: "手机号码".into(),
                category: "个人基本资料".into(),
                label: "L4".into(),
                purpose: "账号注册登录".into(),
                situation: "注册时".into(),
                subject: "用户".into(),
            }],
        };

        let prompt = build_few_shot_prompt("Find personal data.\n", &[example]);
        assert!(prompt.starts_with("Find personal data.\n\n## Example 1"));
        assert!(prompt.contains("我们收集您的手机号码"));
        assert!(prompt.contains("\"name\": \"手机号码\""));
        assert!(prompt.ends_with("situation and subject."));
    }
}
