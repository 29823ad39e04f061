use serde::{Deserialize, Serialize};

use crate::api::{CompletionRequest, SamplingParams};

pub type PresetId = u64;

/// Named bundle of sampling parameters. Exactly one preset is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratePreset {
    pub id: PresetId,
    pub name: String,
    pub active: bool,
    /// Token budget for prompt plus reply; zero disables history fitting
    pub context: u32,
    pub max_tokens: i32,
    pub temperature: f32,
    /// Fixed RNG seed; `None` lets the server pick
    pub seed: Option<i64>,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    /// 1.0 disables tail-free sampling
    pub tfs_z: f32,
    /// 1.0 disables locally typical sampling
    pub typical_p: f32,
    pub repeat_penalty: f32,
    /// 0 disables, -1 means the whole context
    pub repeat_last_n: i32,
    pub penalize_nl: bool,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    /// 0 off, 1 Mirostat, 2 Mirostat 2.0
    pub mirostat: u8,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
}

impl Default for GeneratePreset {
    fn default() -> Self {
        Self {
            id: 0,
            name: "Default".to_string(),
            active: false,
            context: 4096,
            max_tokens: 64,
            temperature: 0.8,
            seed: None,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.05,
            tfs_z: 1.0,
            typical_p: 1.0,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            penalize_nl: false,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            mirostat: 0,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
        }
    }
}

impl GeneratePreset {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: Some(self.temperature),
            top_k: Some(self.top_k),
            top_p: Some(self.top_p),
            min_p: Some(self.min_p),
            tfs_z: Some(self.tfs_z),
            typical_p: Some(self.typical_p),
            repeat_penalty: Some(self.repeat_penalty),
            repeat_last_n: Some(self.repeat_last_n),
            penalize_nl: Some(self.penalize_nl),
            presence_penalty: Some(self.presence_penalty),
            frequency_penalty: Some(self.frequency_penalty),
            mirostat: Some(self.mirostat),
            mirostat_tau: Some(self.mirostat_tau),
            mirostat_eta: Some(self.mirostat_eta),
        }
    }

    /// Streaming request for `prompt` using every knob in this preset.
    pub fn request(&self, prompt: impl Into<String>) -> CompletionRequest {
        let mut request = CompletionRequest::new(prompt, self.max_tokens);
        request.stream = true;
        request.cache_prompt = true;
        request.sampling = self.sampling();
        request.seed = self.seed;
        request
    }

    /// Tokens the prompt may use so the reply still fits in `context`.
    pub fn prompt_budget(&self) -> Option<usize> {
        if self.context == 0 {
            return None;
        }
        let reserve = self.max_tokens.max(0) as u32;
        Some(self.context.saturating_sub(reserve) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_all_sampling_fields() {
        let preset = GeneratePreset {
            seed: Some(69),
            ..Default::default()
        };
        let request = preset.request("Hello");
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["prompt"], "Hello");
        assert_eq!(body["n_predict"], 64);
        assert_eq!(body["stream"], true);
        assert_eq!(body["cache_prompt"], true);
        assert_eq!(body["seed"], 69);
        for key in [
            "temperature",
            "top_k",
            "top_p",
            "min_p",
            "tfs_z",
            "typical_p",
            "repeat_penalty",
            "repeat_last_n",
            "penalize_nl",
            "presence_penalty",
            "frequency_penalty",
            "mirostat",
            "mirostat_tau",
            "mirostat_eta",
        ] {
            assert!(body.get(key).is_some(), "missing {key}");
        }
        assert!(body.get("grammar").is_none());
    }

    #[test]
    fn prompt_budget_reserves_reply_tokens() {
        let preset = GeneratePreset {
            context: 256,
            max_tokens: 50,
            ..Default::default()
        };
        assert_eq!(preset.prompt_budget(), Some(206));

        let unlimited = GeneratePreset {
            context: 0,
            ..Default::default()
        };
        assert_eq!(unlimited.prompt_budget(), None);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let preset: GeneratePreset = toml::from_str("id = 7\nname = \"Cold\"\ntemperature = 0.2").unwrap();
        assert_eq!(preset.id, 7);
        assert_eq!(preset.top_k, 40);
        assert!((preset.temperature - 0.2).abs() < f32::EPSILON);
    }
}
