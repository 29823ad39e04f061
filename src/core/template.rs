use serde::{Deserialize, Serialize};

pub type TemplateId = u64;

/// Named prompt template. Exactly one template is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: TemplateId,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub active: bool,
}

impl PromptTemplate {
    pub fn new(id: TemplateId, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            content: content.into(),
            active: false,
        }
    }
}
