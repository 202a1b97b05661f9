use std::env;

/// Generation settings for one installation. Built once at startup and passed
/// into the components that need it; there is no global settings singleton.
#[derive(Clone, Debug)]
pub struct Settings {
    pub gemini_api_key: Option<String>,
    pub default_model: String,
    pub default_tone: String,
    pub default_length: String,
    pub auto_save: String,
    pub enable_history: bool,
    pub rate_limit: i64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            default_model: non_empty_var("DEFAULT_MODEL").unwrap_or_else(|| "gemini".to_string()),
            default_tone: non_empty_var("DEFAULT_TONE")
                .unwrap_or_else(|| "professional".to_string()),
            default_length: non_empty_var("DEFAULT_LENGTH")
                .unwrap_or_else(|| "medium".to_string()),
            auto_save: non_empty_var("AUTO_SAVE").unwrap_or_else(|| "draft".to_string()),
            enable_history: env::var("ENABLE_HISTORY")
                .ok()
                .and_then(|value| value.parse::<bool>().ok())
                .unwrap_or(true),
            rate_limit: env::var("RATE_LIMIT")
                .ok()
                .and_then(|value| value.parse::<i64>().ok())
                .unwrap_or(crate::rate_limit::DEFAULT_DAILY_LIMIT),
        }
    }

    pub fn has_api_key(&self, provider: &str) -> bool {
        match provider {
            "gemini" => self.gemini_api_key.is_some(),
            // Pollinations needs no key.
            "pollinations" => true,
            _ => false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            default_model: "gemini".to_string(),
            default_tone: "professional".to_string(),
            default_length: "medium".to_string(),
            auto_save: "draft".to_string(),
            enable_history: true,
            rate_limit: crate::rate_limit::DEFAULT_DAILY_LIMIT,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_presence_is_checked_per_provider() {
        let mut settings = Settings::default();
        assert!(!settings.has_api_key("gemini"));
        // Pollinations is keyless and always available.
        assert!(settings.has_api_key("pollinations"));
        assert!(!settings.has_api_key("dalle"));

        settings.gemini_api_key = Some("key".to_string());
        assert!(settings.has_api_key("gemini"));
    }
}
