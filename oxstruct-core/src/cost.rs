//! Advisory cost estimation.
//!
//! A static price table keyed by model prefix. Estimates are printed at
//! dry-run and logged before execution; they never gate anything.

/// USD per million tokens (input, output), by model id prefix. Most specific
/// prefix first.
const PRICE_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("o1", 15.00, 60.00),
    ("o3-mini", 1.10, 4.40),
    ("o3", 2.00, 8.00),
    ("o4-mini", 1.10, 4.40),
];

#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub input_usd: f64,
    pub max_output_usd: f64,
}

impl CostEstimate {
    pub fn total_usd(&self) -> f64 {
        self.input_usd + self.max_output_usd
    }
}

/// Estimate request cost. `None` for models missing from the price table.
pub fn estimate(model: &str, prompt_tokens: usize, max_output_tokens: Option<u64>) -> Option<CostEstimate> {
    let (_, input_price, output_price) = PRICE_TABLE
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))?;

    let input_usd = prompt_tokens as f64 / 1_000_000.0 * input_price;
    let max_output_usd =
        max_output_tokens.unwrap_or(4_096) as f64 / 1_000_000.0 * output_price;
    Some(CostEstimate {
        input_usd,
        max_output_usd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_estimates() {
        let estimate = estimate("gpt-4o-2024-08-06", 1_000_000, Some(1_000_000)).unwrap();
        assert!((estimate.input_usd - 2.50).abs() < 1e-9);
        assert!((estimate.max_output_usd - 10.00).abs() < 1e-9);
        assert!((estimate.total_usd() - 12.50).abs() < 1e-9);
    }

    #[test]
    fn mini_resolves_before_base_prefix() {
        let estimate = estimate("gpt-4o-mini", 1_000_000, Some(0)).unwrap();
        assert!((estimate.input_usd - 0.15).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_has_no_estimate() {
        assert_eq!(estimate("experimental-llm", 1000, None), None);
    }

    #[test]
    fn default_output_allowance_applies() {
        let estimate = estimate("gpt-4o", 0, None).unwrap();
        assert!(estimate.max_output_usd > 0.0);
    }
}
