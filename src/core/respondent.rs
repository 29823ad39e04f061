use thiserror::Error;
use tracing::{debug, info};

use crate::api::{CompletionBackend, CompletionError, CompletionRequest, SamplingParams};
use crate::character::Character;

/// Upper bound on tokens the model may spend naming a speaker.
const SELECTION_TOKENS: i32 = 10;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("This chat has no characters the model can speak as")]
    NoCandidates,
    #[error("The model did not name any character in this chat (answered {output:?})")]
    NoRespondentSelected { output: String },
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Quote `name` as a GBNF string literal.
fn gbnf_literal(name: &str) -> String {
    let mut literal = String::with_capacity(name.len() + 2);
    literal.push('"');
    for ch in name.chars() {
        match ch {
            '"' => literal.push_str("\\\""),
            '\\' => literal.push_str("\\\\"),
            '\n' => literal.push_str("\\n"),
            _ => literal.push(ch),
        }
    }
    literal.push('"');
    literal
}

/// Grammar whose only sentences are the names of `candidates`.
pub fn respondent_grammar<'a>(candidates: impl IntoIterator<Item = &'a Character>) -> String {
    let names: Vec<String> = candidates
        .into_iter()
        .map(|character| gbnf_literal(&character.name))
        .collect();
    format!("root ::= ({})", names.join(" | "))
}

/// Model-voiced characters with a name the model can actually say.
fn is_candidate(character: &Character) -> bool {
    !character.is_user() && !character.name.trim().is_empty()
}

/// Pick the character whose name appears in `output`, in roster order.
/// Users and unnamed characters are never picked.
pub fn match_respondent<'a>(output: &str, roster: &'a [Character]) -> Option<&'a Character> {
    roster
        .iter()
        .filter(|character| is_candidate(character))
        .find(|character| output.contains(&character.name))
}

/// Asks the model which character should speak next.
pub struct RespondentSelector<'a> {
    backend: &'a dyn CompletionBackend,
}

impl<'a> RespondentSelector<'a> {
    pub fn new(backend: &'a dyn CompletionBackend) -> Self {
        Self { backend }
    }

    pub fn request(prompt: &str, candidates: &[&Character]) -> CompletionRequest {
        let mut request = CompletionRequest::new(prompt, SELECTION_TOKENS);
        request.cache_prompt = true;
        request.sampling = SamplingParams {
            temperature: Some(0.0),
            ..SamplingParams::default()
        };
        request.grammar = Some(respondent_grammar(candidates.iter().copied()));
        request
    }

    pub async fn select<'r>(
        &self,
        prompt: &str,
        roster: &'r [Character],
    ) -> Result<&'r Character, SelectionError> {
        let candidates: Vec<&Character> = roster
            .iter()
            .filter(|character| is_candidate(character))
            .collect();
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }

        let request = Self::request(prompt, &candidates);
        debug!(grammar = ?request.grammar, "Selecting respondent");
        let response = self.backend.complete(request).await?;

        match match_respondent(&response.content, roster) {
            Some(character) => {
                info!(character = %character.name, "Picked respondent");
                Ok(character)
            }
            None => Err(SelectionError::NoRespondentSelected {
                output: response.content,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CompletionClient;
    use crate::character::CharacterKind;
    use crate::utils::test_utils::{MockReply, MockServer};
    use serde_json::json;

    fn roster() -> Vec<Character> {
        vec![
            Character::new(1, "Alice", CharacterKind::User, "The human"),
            Character::new(2, "Bob", CharacterKind::Character, ""),
            Character::new(3, "Carol \"CJ\"", CharacterKind::Character, ""),
        ]
    }

    #[test]
    fn grammar_excludes_users_and_escapes_quotes() {
        let roster = roster();
        let candidates: Vec<&Character> = roster.iter().filter(|c| !c.is_user()).collect();
        assert_eq!(
            respondent_grammar(candidates),
            r#"root ::= ("Bob" | "Carol \"CJ\"")"#
        );
    }

    #[test]
    fn matching_never_picks_the_user() {
        let roster = roster();
        assert_eq!(match_respondent("Alice", &roster), None);
        assert_eq!(match_respondent("Alice and Bob", &roster).map(|c| c.id), Some(2));
        assert_eq!(match_respondent("Carol \"CJ\"", &roster).map(|c| c.id), Some(3));
    }

    #[test]
    fn first_match_in_roster_order_wins() {
        let roster = vec![
            Character::new(5, "Ann", CharacterKind::Character, ""),
            Character::new(6, "Anne", CharacterKind::Character, ""),
        ];
        assert_eq!(match_respondent("Anne", &roster).map(|c| c.id), Some(5));
    }

    #[test]
    fn unnamed_characters_never_match() {
        let roster = vec![
            Character::new(4, "", CharacterKind::Character, ""),
            Character::new(5, "  ", CharacterKind::Character, ""),
            Character::new(6, "Dana", CharacterKind::Character, ""),
        ];
        assert_eq!(match_respondent("Nobody here", &roster), None);
        assert_eq!(match_respondent("Dana", &roster).map(|c| c.id), Some(6));
    }

    #[tokio::test]
    async fn sends_short_deterministic_grammar_request() {
        let server = MockServer::start(vec![MockReply::ok_json(
            json!({"content": "Bob", "stop": true}),
        )])
        .await;
        let client = CompletionClient::new(server.base_url.clone());
        let roster = roster();

        let picked = RespondentSelector::new(&client)
            .select("User: hi\n", &roster)
            .await
            .unwrap();
        assert_eq!(picked.id, 2);

        let requests = server.requests().await;
        let body = requests[0].json();
        assert_eq!(body["n_predict"], 10);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["stream"], false);
        assert_eq!(body["cache_prompt"], true);
        assert_eq!(body["grammar"], r#"root ::= ("Bob" | "Carol \"CJ\"")"#);
    }

    #[tokio::test]
    async fn unmatched_output_is_an_explicit_error() {
        let server = MockServer::start(vec![MockReply::ok_json(
            json!({"content": "Nobody", "stop": true}),
        )])
        .await;
        let client = CompletionClient::new(server.base_url.clone());
        let roster = roster();

        let err = RespondentSelector::new(&client)
            .select("prompt", &roster)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SelectionError::NoRespondentSelected { ref output } if output == "Nobody"
        ));
    }

    #[tokio::test]
    async fn users_only_roster_has_no_candidates() {
        let client = CompletionClient::new("http://127.0.0.1:9");
        let roster = vec![Character::new(1, "Solo", CharacterKind::User, "")];
        let err = RespondentSelector::new(&client)
            .select("prompt", &roster)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectionError::NoCandidates));

        let roster = vec![Character::new(2, "", CharacterKind::Character, "")];
        let err = RespondentSelector::new(&client)
            .select("prompt", &roster)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectionError::NoCandidates));
    }
}
