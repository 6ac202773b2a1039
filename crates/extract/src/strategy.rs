use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::llm::{ChatRequest, ModelClient};
use crate::parser::ResponseParser;
use crate::prompt::{FewShotExample, Message, PromptAssembler, build_few_shot_prompt, build_user_message};
use crate::schema::{Entity, response_format};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Single call constrained by the JSON Schema.
    Schema,
    /// Schema-free call guided by worked examples.
    FewShot,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "schema" => Ok(StrategyKind::Schema),
            "few_shot" | "fewshot" => Ok(StrategyKind::FewShot),
            other => Err(format!("unknown extraction strategy: {other}")),
        }
    }
}

/// One way of turning policy text into entities with a model.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn extract(&self, client: &dyn ModelClient, text: &str) -> Result<Vec<Entity>>;
}

pub struct SchemaStrategy {
    assembler: PromptAssembler,
    parser: ResponseParser,
}

impl SchemaStrategy {
    pub fn new(assembler: PromptAssembler) -> Self {
        Self {
            assembler,
            parser: ResponseParser::new(),
        }
    }

    pub fn build_request(&self, text: &str) -> ChatRequest {
        ChatRequest::new(self.assembler.assemble(text)).with_response_format(response_format())
    }
}

#[async_trait]
impl ExtractionStrategy for SchemaStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Schema
    }

    async fn extract(&self, client: &dyn ModelClient, text: &str) -> Result<Vec<Entity>> {
        let output = client.invoke(self.build_request(text)).await?;
        info!(total_tokens = output.total_tokens, "Schema extraction call finished");
        self.parser.parse(output.reply.content())
    }
}

pub struct FewShotStrategy {
    system_prompt: Arc<str>,
    parser: ResponseParser,
}

impl FewShotStrategy {
    pub fn new(instructions: &str, examples: &[FewShotExample]) -> Self {
        Self {
            system_prompt: Arc::from(build_few_shot_prompt(instructions, examples)),
            parser: ResponseParser::new(),
        }
    }

    /// Instructions plus the built-in worked example.
    pub fn with_default_examples(instructions: &str) -> Self {
        Self::new(instructions, &default_examples())
    }

    pub fn build_request(&self, text: &str) -> ChatRequest {
        ChatRequest::new(vec![Message::system(&*self.system_prompt), build_user_message(text)])
    }
}

#[async_trait]
impl ExtractionStrategy for FewShotStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FewShot
    }

    async fn extract(&self, client: &dyn ModelClient, text: &str) -> Result<Vec<Entity>> {
        let output = client.invoke(self.build_request(text)).await?;
        info!(total_tokens = output.total_tokens, "Few-shot extraction call finished");
        let entities = self.parser.parse(output.reply.content())?;
        Ok(dedup_by_name(entities))
    }
}

/// One entity per name: first position wins, last value wins.
pub fn dedup_by_name(entities: Vec<Entity>) -> Vec<Entity> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Entity> = Vec::with_capacity(entities.len());

    for entity in entities {
        match positions.get(&entity.name) {
            Some(&pos) => unique[pos] = entity,
            None => {
                positions.insert(entity.name.clone(), unique.len());
                unique.push(entity);
            }
        }
    }
    unique
}

fn example_entity(name: &str, category: &str, label: &str, purpose: &str, situation: &str) -> Entity {
    Entity {
        name: name.to_string(),
        category: category.to_string(),
        label: label.to_string(),
        purpose: purpose.to_string(),
        situation: situation.to_string(),
        subject: "用户".to_string(),
    }
}

pub fn default_examples() -> Vec<FewShotExample> {
    let text = "\
1. 账号注册登录
为了注册账号以使用我们的基本业务功能，您至少需要提供手机号码，我们将通过向该手机号码发送短信验证码的方式来验证您的身份是否有效。
2. 信息浏览及搜索
当您浏览、点击、搜索、查看本产品内的房源、装修等信息时，我们会自动根据您的基本设备信息为您展示与您使用设备相适配的房源、装修等信息样式；\
在您浏览、点击、搜索、查看过程中，我们会收集您的使用情况（浏览、点击、搜索、查看记录），作为服务网络日志保存。\
如您未登录账号，我们会收集您的设备标识符（IDFA、IDFV、Android OAID、Android ID）来记录您的使用情况。";

    vec![FewShotExample {
        text: text.to_string(),
        entities: vec![
            example_entity("手机号码", "个人基本资料/个人基本资料", "L4", "账号注册登录", "发送短信验证码"),
            example_entity(
                "浏览、点击、搜索、查看记录",
                "个人标签信息/个人标签信息",
                "L3",
                "服务网络日志保存",
                "浏览、点击、搜索、查看本产品内的房源、装修等信息时",
            ),
            example_entity(
                "Android ID",
                "个人设备信息/可变更的唯一设备识别码",
                "L3",
                "展示与使用设备相适配的房源、装修等信息样式",
                "浏览、点击、搜索、查看本产品内的房源、装修等信息时",
            ),
        ],
    }]
}
