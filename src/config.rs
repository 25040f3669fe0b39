use crate::db::Database;

/// Per-1K-token prices for one model tier. This is configuration, not logic;
/// the accountant just multiplies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    pub fn cost(&self, input_tokens: i64, output_tokens: i64) -> f64 {
        input_tokens as f64 / 1000.0 * self.input_per_1k
            + output_tokens as f64 / 1000.0 * self.output_per_1k
    }

    /// Blended per-1K price used when attributing cache savings, where the
    /// input/output split of the avoided call is unknown.
    pub fn blended_per_1k(&self) -> f64 {
        (self.input_per_1k + self.output_per_1k) / 2.0
    }
}

/// Price table keyed by model identifier prefix.
pub fn pricing_for(model: &str) -> ModelPricing {
    if model.starts_with("gpt-4-turbo") || model.starts_with("gpt-4o") {
        ModelPricing {
            input_per_1k: 0.01,
            output_per_1k: 0.03,
        }
    } else if model.starts_with("gpt-4") {
        ModelPricing {
            input_per_1k: 0.03,
            output_per_1k: 0.06,
        }
    } else {
        // Unknown tier, price at the conservative end.
        ModelPricing {
            input_per_1k: 0.03,
            output_per_1k: 0.06,
        }
    }
}

pub const DEFAULT_MODEL: &str = "gpt-4-turbo-preview";
pub const DEFAULT_OCR_LANGUAGE: &str = "eng";

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub model: String,
    pub ocr_language: String,
}

impl Settings {
    /// Environment wins over the settings table so deployments can override a
    /// stored key without touching the database.
    pub fn load(db: &Database) -> Self {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| db.get_setting("openai_api_key").ok().flatten());
        let model = std::env::var("INVOX_MODEL")
            .ok()
            .or_else(|| db.get_setting("model").ok().flatten())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let ocr_language = std::env::var("INVOX_OCR_LANGUAGE")
            .ok()
            .or_else(|| db.get_setting("ocr_language").ok().flatten())
            .unwrap_or_else(|| DEFAULT_OCR_LANGUAGE.to_string());

        Settings {
            openai_api_key,
            model,
            ocr_language,
        }
    }
}
