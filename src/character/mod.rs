//! Chat participants.

pub mod card;

pub use card::{apply_substitutions, Character, CharacterId, CharacterKind};
