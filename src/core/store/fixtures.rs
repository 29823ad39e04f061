use serde::Deserialize;

use super::StoreError;
use crate::character::{Character, CharacterId};
use crate::core::message::{ChatId, MessageId};
use crate::core::preset::GeneratePreset;
use crate::core::template::PromptTemplate;

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureChat {
    pub id: ChatId,
    pub characters: Vec<CharacterId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureMessage {
    pub id: MessageId,
    pub chat: ChatId,
    pub character: CharacterId,
    pub text: String,
    pub generated: bool,
}

/// Seed data for a fresh store.
#[derive(Debug, Clone, Deserialize)]
pub struct Fixtures {
    pub characters: Vec<Character>,
    pub chats: Vec<FixtureChat>,
    pub messages: Vec<FixtureMessage>,
    pub templates: Vec<PromptTemplate>,
    pub presets: Vec<GeneratePreset>,
}

pub fn load_fixtures() -> Result<Fixtures, StoreError> {
    const FIXTURES: &str = include_str!("../../builtins/fixtures.toml");
    Ok(toml::from_str(FIXTURES)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prompt::{preview_template, Template};

    #[test]
    fn fixtures_parse_with_expected_defaults() {
        let fixtures = load_fixtures().unwrap();

        assert_eq!(fixtures.characters.len(), 2);
        assert!(fixtures.characters[0].is_user());
        assert!(!fixtures.characters[1].is_user());

        let names: Vec<&str> = fixtures.templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            ["ChatML", "Llama3", "Phi3", "ChatML Roleplay", "Llama3 Roleplay"]
        );
        let active: Vec<_> = fixtures.templates.iter().filter(|t| t.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);

        assert_eq!(fixtures.presets.len(), 1);
        assert_eq!(fixtures.presets[0], GeneratePreset {
            id: 1,
            active: true,
            ..GeneratePreset::default()
        });
    }

    #[test]
    fn every_builtin_template_renders() {
        for template in load_fixtures().unwrap().templates {
            Template::parse(&template.content)
                .unwrap_or_else(|err| panic!("{} failed to parse: {err}", template.name));
            let preview = preview_template(&template.content).unwrap();
            assert!(preview.contains("Hello"), "{}: {preview}", template.name);
        }
    }

    #[test]
    fn roleplay_template_lists_characters() {
        let fixtures = load_fixtures().unwrap();
        let roleplay = fixtures
            .templates
            .iter()
            .find(|t| t.name == "Llama3 Roleplay")
            .unwrap();
        let preview = preview_template(&roleplay.content).unwrap();
        assert!(preview.contains("Assistant: A helpful AI assistant"));
        assert!(preview.contains("User: Hello<|eot_id|>"));
    }
}
