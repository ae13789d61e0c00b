use crate::error::{EngineError, EngineResult};
use std::collections::BTreeMap;

/// Strategy parameters keyed by name; ordered so that formatting and sweep
/// output are stable across runs.
pub type StrategyParams = BTreeMap<String, f64>;

/// Build a parameter map from name/value pairs
pub fn params_from<const N: usize>(pairs: [(&str, f64); N]) -> StrategyParams {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Fail on any key outside `known`, so a misspelt name is not silently
/// replaced by its default.
pub fn check_known_params(params: &StrategyParams, known: &[&str]) -> EngineResult<()> {
    match params.keys().find(|key| !known.contains(&key.as_str())) {
        Some(key) => Err(EngineError::invalid(
            key,
            format!("unknown parameter (expected one of: {})", known.join(", ")),
        )),
        None => Ok(()),
    }
}

/// Extract a parameter as usize with a default value. Negative, non-finite
/// and fractional values are rejected.
pub fn get_param_usize(params: &StrategyParams, key: &str, default: usize) -> EngineResult<usize> {
    let Some(&value) = params.get(key) else {
        return Ok(default);
    };
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::invalid(key, "must be a non-negative integer"));
    }
    if value.fract() != 0.0 || value > usize::MAX as f64 {
        return Err(EngineError::invalid(key, format!("must be a whole number, got {}", value)));
    }
    Ok(value as usize)
}

fn finite(key: &str, value: f64) -> EngineResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::invalid(key, "must be a finite number"))
    }
}

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &StrategyParams, key: &str, default: f64) -> EngineResult<f64> {
    match params.get(key) {
        Some(&value) => finite(key, value),
        None => Ok(default),
    }
}

/// First parameter present among `keys`, used for aliased names
pub fn get_param_f64_any(params: &StrategyParams, keys: &[&str], default: f64) -> EngineResult<f64> {
    match keys.iter().find_map(|key| params.get(*key).map(|v| (*key, *v))) {
        Some((key, value)) => finite(key, value),
        None => Ok(default),
    }
}

fn format_value(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Render parameters as `key=value` pairs with trailing zeros trimmed
pub fn format_params(params: &StrategyParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, format_value(*v)))
        .collect::<Vec<String>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_params_with_defaults() {
        let params = params_from([("period", 20.0), ("mult", 2.5)]);
        assert_eq!(get_param_usize(&params, "period", 14), Ok(20));
        assert_eq!(get_param_usize(&params, "missing", 14), Ok(14));
        assert_eq!(get_param_f64(&params, "mult", 2.0), Ok(2.5));
        assert_eq!(get_param_f64_any(&params, &["entry_low", "mult"], 1.0), Ok(2.5));
        assert_eq!(get_param_f64_any(&params, &["entry_low"], 1.0), Ok(1.0));
    }

    #[test]
    fn rejects_values_that_would_need_correcting() {
        let params = params_from([
            ("negative", -5.0),
            ("fraction", 1.5),
            ("nan", f64::NAN),
            ("inf", f64::INFINITY),
        ]);
        for key in ["negative", "fraction", "nan", "inf"] {
            assert!(matches!(
                get_param_usize(&params, key, 7),
                Err(EngineError::InvalidParameter { name, .. }) if name == key
            ));
        }
        assert!(get_param_f64(&params, "nan", 1.0).is_err());
        assert!(get_param_f64_any(&params, &["missing", "inf"], 1.0).is_err());
        assert_eq!(get_param_f64(&params, "negative", 1.0), Ok(-5.0));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let params = params_from([("fast", 10.0), ("fsat", 10.0)]);
        let err = check_known_params(&params, &["fast", "slow"]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { ref name, .. } if name == "fsat"));
        assert!(check_known_params(&params_from([("slow", 1.0)]), &["fast", "slow"]).is_ok());
        assert!(check_known_params(&StrategyParams::new(), &[]).is_ok());
    }

    #[test]
    fn formats_params_in_key_order() {
        let params = params_from([("slow", 200.0), ("fast", 50.0), ("mult", 2.50)]);
        assert_eq!(format_params(&params), "fast=50, mult=2.5, slow=200");
    }
}
