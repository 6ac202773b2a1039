use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

/// One piece of personal information a policy says is collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub category: String,
    pub label: String,
    pub purpose: String,
    pub situation: String,
    pub subject: String,
}

impl Entity {
    /// Sensitivity tier parsed from `label`, if it is one of the known tiers.
    pub fn sensitivity(&self) -> Option<SensitivityLabel> {
        self.label.parse().ok()
    }
}

/// Entities in the order the model produced them.
pub type ExtractionResult = Vec<Entity>;

/// Fields every entity object must carry as non-null strings.
pub const REQUIRED_FIELDS: [&str; 6] = ["name", "category", "label", "purpose", "situation", "subject"];

/// Schema name sent alongside the constraint.
pub const SCHEMA_NAME: &str = "policy_extraction_output";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensitivityLabel {
    L1,
    L2,
    L3,
    L4,
}

impl FromStr for SensitivityLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "L1" => Ok(SensitivityLabel::L1),
            "L2" => Ok(SensitivityLabel::L2),
            "L3" => Ok(SensitivityLabel::L3),
            "L4" => Ok(SensitivityLabel::L4),
            other => Err(format!("unknown sensitivity tier: {other}")),
        }
    }
}

impl fmt::Display for SensitivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tier = match self {
            SensitivityLabel::L1 => "L1",
            SensitivityLabel::L2 => "L2",
            SensitivityLabel::L3 => "L3",
            SensitivityLabel::L4 => "L4",
        };
        f.write_str(tier)
    }
}

/// The JSON Schema the model output must satisfy: `{"entities": [Entity, ...]}`.
pub fn extraction_schema() -> Value {
    let properties: serde_json::Map<String, Value> = REQUIRED_FIELDS
        .iter()
        .map(|field| (field.to_string(), json!({"type": "string"})))
        .collect();

    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": properties,
                    "required": REQUIRED_FIELDS,
                    "additionalProperties": false
                }
            }
        },
        "required": ["entities"],
        "additionalProperties": false
    })
}

/// `response_format` payload for an OpenAI-compatible chat completion.
pub fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": SCHEMA_NAME,
            "schema": extraction_schema()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_requires_all_fields() {
        let schema = extraction_schema();
        let item = &schema["properties"]["entities"]["items"];
        let required: Vec<&str> = item["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();

        assert_eq!(required, REQUIRED_FIELDS);
        assert_eq!(item["additionalProperties"], json!(false));
        assert_eq!(item["properties"]["label"]["type"], "string");
        assert_eq!(schema["required"], json!(["entities"]));
    }

    #[test]
    fn test_response_format_wraps_schema() {
        let format = response_format();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], SCHEMA_NAME);
        assert_eq!(format["json_schema"]["schema"], extraction_schema());
    }

    #[test]
    fn test_sensitivity_tiers() {
        let mut entity = Entity {
            name: "手机号码".into(),
            category: "身份信息".into(),
            label: "L4".into(),
            purpose: "注册".into(),
            situation: "注册时".into(),
            subject: "用户".into(),
        };
        assert_eq!(entity.sensitivity(), Some(SensitivityLabel::L4));

        entity.label = "high".into();
        assert_eq!(entity.sensitivity(), None);
        assert_eq!(SensitivityLabel::L2.to_string(), "L2");
    }
}
