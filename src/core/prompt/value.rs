use std::collections::BTreeMap;
use std::fmt;

use crate::character::{Character, CharacterId};

/// Data a template can see. Records carry their type name so a bad field
/// lookup can say where it looked.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Record(&'static str, BTreeMap<&'static str, Value>),
}

impl Value {
    /// Go template truthiness: false, zero, nil and empty values are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Record(_, _) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(name, _) => *name,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "<no value>"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Record(name, _) => write!(f, "{{{name}}}"),
        }
    }
}

/// One history entry as templates see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub text: String,
    pub generated: bool,
    pub character_name: String,
}

/// One participant as templates see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterView {
    pub id: CharacterId,
    pub name: String,
    pub description: String,
    pub kind: String,
    pub first_message: String,
}

impl CharacterView {
    pub fn from_character(character: &Character, user_name: Option<&str>) -> Self {
        Self {
            id: character.id,
            name: character.name.clone(),
            description: character.substituted_description(user_name),
            kind: character.kind.as_str().to_string(),
            first_message: character.first_message.clone().unwrap_or_default(),
        }
    }
}

/// Root object passed to prompt templates: `.Messages` and `.Characters`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptView {
    pub messages: Vec<MessageView>,
    pub characters: Vec<CharacterView>,
}

impl From<&MessageView> for Value {
    fn from(message: &MessageView) -> Self {
        Value::Record(
            "Message",
            BTreeMap::from([
                ("Text", Value::Str(message.text.clone())),
                ("Generated", Value::Bool(message.generated)),
                ("CharacterName", Value::Str(message.character_name.clone())),
            ]),
        )
    }
}

impl From<&CharacterView> for Value {
    fn from(character: &CharacterView) -> Self {
        Value::Record(
            "Character",
            BTreeMap::from([
                ("Id", Value::Int(character.id as i64)),
                ("Name", Value::Str(character.name.clone())),
                ("Description", Value::Str(character.description.clone())),
                ("Type", Value::Str(character.kind.clone())),
                ("FirstMessage", Value::Str(character.first_message.clone())),
            ]),
        )
    }
}

impl From<&PromptView> for Value {
    fn from(view: &PromptView) -> Self {
        Value::Record(
            "PromptData",
            BTreeMap::from([
                (
                    "Messages",
                    Value::List(view.messages.iter().map(Value::from).collect()),
                ),
                (
                    "Characters",
                    Value::List(view.characters.iter().map(Value::from).collect()),
                ),
            ]),
        )
    }
}
