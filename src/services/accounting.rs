use crate::config::ModelPricing;
use crate::models::UsageRecord;

/// Rough token estimate at ~4 characters per token. This is an approximation
/// for accounting and cache-savings reporting, not a tokenizer; never treat
/// the result as exact.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() as i64 + 3) / 4
}

/// Aggregate usage/savings figures, recomputed from the stored record set on
/// every call. There is no hidden running state to drift out of sync.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageStats {
    pub invoice_count: usize,
    pub average_input_tokens: f64,
    pub average_output_tokens: f64,
    pub average_total_tokens: f64,
    pub average_cost: f64,
    pub total_tokens_saved: i64,
    pub cache_cost_savings: f64,
    pub cache_hits: usize,
}

impl UsageStats {
    pub fn compute(records: &[UsageRecord], pricing: ModelPricing) -> Self {
        if records.is_empty() {
            return UsageStats::default();
        }

        let count = records.len() as f64;
        let total_input: i64 = records.iter().map(|r| r.input_tokens).sum();
        let total_output: i64 = records.iter().map(|r| r.output_tokens).sum();
        let total_cost: f64 = records.iter().map(|r| r.cost).sum();
        let total_saved: i64 = records.iter().map(|r| r.tokens_saved).sum();
        let cache_hits = records.iter().filter(|r| r.used_cache).count();

        UsageStats {
            invoice_count: records.len(),
            average_input_tokens: total_input as f64 / count,
            average_output_tokens: total_output as f64 / count,
            average_total_tokens: (total_input + total_output) as f64 / count,
            average_cost: total_cost / count,
            total_tokens_saved: total_saved,
            // Input/output split of an avoided call is unknown, so savings
            // are priced at the blended rate.
            cache_cost_savings: total_saved as f64 / 1000.0 * pricing.blended_per_1k(),
            cache_hits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> ModelPricing {
        ModelPricing {
            input_per_1k: 0.01,
            output_per_1k: 0.03,
        }
    }

    #[test]
    fn estimate_rounds_up_at_four_chars_per_token() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn stats_over_empty_record_set_are_zero() {
        assert_eq!(UsageStats::compute(&[], pricing()), UsageStats::default());
    }

    #[test]
    fn stats_average_and_attribute_savings() {
        let records = [
            UsageRecord {
                input_tokens: 1000,
                output_tokens: 500,
                cost: 0.025,
                tokens_saved: 0,
                used_cache: false,
            },
            UsageRecord {
                input_tokens: 0,
                output_tokens: 0,
                cost: 0.0,
                tokens_saved: 500,
                used_cache: true,
            },
        ];

        let stats = UsageStats::compute(&records, pricing());
        assert_eq!(stats.invoice_count, 2);
        assert_eq!(stats.cache_hits, 1);
        assert!((stats.average_input_tokens - 500.0).abs() < 1e-9);
        assert!((stats.average_output_tokens - 250.0).abs() < 1e-9);
        assert!((stats.average_total_tokens - 750.0).abs() < 1e-9);
        assert!((stats.average_cost - 0.0125).abs() < 1e-9);
        assert_eq!(stats.total_tokens_saved, 500);
        // 500 / 1000 * (0.01 + 0.03) / 2
        assert!((stats.cache_cost_savings - 0.01).abs() < 1e-9);
    }
}
