use serde_json::Value;

/// Estimate token count for text content.
/// Approximation: chars / 4.
pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Token count reported by a provider usage block.
///
/// Prefers `total`; otherwise sums input, output and cache traffic.
/// Returns `None` when the value carries no usable numbers.
pub fn token_count_from_usage(usage: &Value) -> Option<u64> {
    let usage = usage.as_object()?;
    if let Some(total) = usage.get("total").and_then(Value::as_f64) {
        return Some(total.max(0.0).floor() as u64);
    }
    let read = |key: &str| usage.get(key).and_then(Value::as_f64);
    let parts = ["input", "output", "cacheRead", "cacheWrite"].map(read);
    if parts.iter().all(Option::is_none) {
        return None;
    }
    let sum: f64 = parts.iter().flatten().sum();
    Some(sum.max(0.0).floor() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_token_estimation() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("hello world"), 3);
        assert_eq!(estimate_text_tokens("a".repeat(400).as_str()), 100);
    }

    #[test]
    fn usage_total_wins() {
        let usage = json!({"total": 120, "input": 1, "output": 2});
        assert_eq!(token_count_from_usage(&usage), Some(120));
    }

    #[test]
    fn usage_parts_are_summed() {
        let usage = json!({"input": 10, "output": 5, "cacheRead": 100, "cacheWrite": 3});
        assert_eq!(token_count_from_usage(&usage), Some(118));
    }

    #[test]
    fn usage_without_numbers() {
        assert_eq!(token_count_from_usage(&json!({})), None);
        assert_eq!(token_count_from_usage(&json!("n/a")), None);
    }
}
