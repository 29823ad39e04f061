//! Prompt templates: a small Go-template-compatible engine plus the
//! assembler that feeds it conversation history.
//!
//! Supported syntax is what prompt templates in the wild use: field paths
//! (`.Text`, `$.Characters`), `{{if}}`/`{{else if}}`/`{{else}}`, `{{range}}`
//! with `{{else}}`, comments, trim markers, and the `not`, `and`, `or`,
//! `eq`, `ne` and `len` functions.

mod assemble;
mod lexer;
mod parser;
mod render;
mod value;

use thiserror::Error;

pub use assemble::{
    continuation_prompt, generation_prompt, AssemblyError, AssemblyMode, ConversationAssembler,
};
pub use value::{CharacterView, MessageView, PromptView, Value};

use crate::character::{Character, CharacterKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("template render error on line {line}: {message}")]
    Render { line: usize, message: String },
}

/// A parsed template, reusable across renders.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<parser::Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let items = lexer::lex(source)?;
        let nodes = parser::parse(items)?;
        Ok(Self { nodes })
    }

    /// Render against `view`. Either the whole output or an error; never a
    /// partial string.
    pub fn render(&self, view: &PromptView) -> Result<String, TemplateError> {
        let root = Value::from(view);
        let mut renderer = render::Renderer::new(&root);
        renderer.render_nodes(&self.nodes, &root)?;
        Ok(renderer.finish())
    }
}

pub fn render_prompt(source: &str, view: &PromptView) -> Result<String, TemplateError> {
    Template::parse(source)?.render(view)
}

/// Example conversation used to preview a template before saving it.
pub fn preview_view() -> PromptView {
    let user = Character::new(1, "User", CharacterKind::User, "A user");
    let assistant = Character::new(
        2,
        "Assistant",
        CharacterKind::Character,
        "A helpful AI assistant designed to help you test the program.",
    );
    PromptView {
        messages: vec![
            MessageView {
                text: "Hello".to_string(),
                generated: false,
                character_name: user.name.clone(),
            },
            MessageView {
                text: "How are you?".to_string(),
                generated: true,
                character_name: assistant.name.clone(),
            },
        ],
        characters: vec![
            CharacterView::from_character(&user, Some(&user.name)),
            CharacterView::from_character(&assistant, Some(&user.name)),
        ],
    }
}

pub fn preview_template(source: &str) -> Result<String, TemplateError> {
    render_prompt(source, &preview_view())
}
