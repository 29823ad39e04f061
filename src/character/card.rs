use serde::{Deserialize, Serialize};

pub type CharacterId = u64;

/// Who voices a character: the human at the keyboard or the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CharacterKind {
    User,
    Character,
}

impl CharacterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CharacterKind::User => "user",
            CharacterKind::Character => "character",
        }
    }

    pub fn is_user(self) -> bool {
        self == CharacterKind::User
    }
}

impl TryFrom<&str> for CharacterKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(CharacterKind::User),
            "character" => Ok(CharacterKind::Character),
            _ => Err(format!("invalid character type: {value}")),
        }
    }
}

impl TryFrom<String> for CharacterKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<CharacterKind> for String {
    fn from(value: CharacterKind) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CharacterKind,
    #[serde(default)]
    pub description: String,
    /// Greeting inserted when the character joins a new chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Character {
    pub fn new(
        id: CharacterId,
        name: impl Into<String>,
        kind: CharacterKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            description: description.into(),
            first_message: None,
            avatar: None,
        }
    }

    pub fn with_first_message(mut self, text: impl Into<String>) -> Self {
        self.first_message = Some(text.into());
        self
    }

    pub fn is_user(&self) -> bool {
        self.kind.is_user()
    }

    /// Description with `{{char}}` replaced by this character's name and
    /// `{{user}}` by `user_name` (or "User" when the chat has no user).
    pub fn substituted_description(&self, user_name: Option<&str>) -> String {
        apply_substitutions(&self.description, &self.name, user_name)
    }
}

pub fn apply_substitutions(text: &str, char_name: &str, user_name: Option<&str>) -> String {
    text.replace("{{char}}", char_name)
        .replace("{{user}}", user_name.unwrap_or("User"))
}
