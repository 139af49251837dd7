//! Post-hoc precision bias on a structured reply.
//!
//! This is a coarse threshold rule, not a recalibration. A positive bias
//! flips a positive prediction to negative when the bias exceeds 0.8, or 0.3
//! when the reply itself carries a dialogue field. A negative bias applies the
//! mirror rule to negative predictions. Everything else passes through.

use serde_json::Value;
use tracing::debug;

pub const COMMAND_FLAG: &str = "has_command";

const STRONG_BIAS: f64 = 0.8;
const DIALOGUE_BIAS: f64 = 0.3;
const DIALOGUE_KEYS: [&str; 2] = ["dialogue", "dialog"];

pub fn apply_precision_bias(content: &str, bias: f64) -> String {
    if bias == 0.0 || content.is_empty() {
        return content.to_string();
    }

    let mut value: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            debug!("Precision bias skipped, reply is not JSON: {}", e);
            return content.to_string();
        }
    };

    let Some(obj) = value.as_object_mut() else {
        return content.to_string();
    };
    let Some(flag) = obj.get(COMMAND_FLAG).and_then(Value::as_bool) else {
        return content.to_string();
    };

    let threshold = if DIALOGUE_KEYS.iter().any(|k| obj.contains_key(*k)) {
        DIALOGUE_BIAS
    } else {
        STRONG_BIAS
    };

    let flipped = if bias > 0.0 && flag && bias > threshold {
        debug!(bias, "Precision bias flipped command to non-command");
        false
    } else if bias < 0.0 && !flag && -bias > threshold {
        debug!(bias, "Precision bias flipped non-command to command");
        true
    } else {
        return content.to_string();
    };

    obj.insert(COMMAND_FLAG.to_string(), Value::Bool(flipped));
    serde_json::to_string(&value).unwrap_or_else(|_| content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(content: &str) -> Option<bool> {
        serde_json::from_str::<Value>(content)
            .ok()
            .and_then(|v| v.get(COMMAND_FLAG).and_then(Value::as_bool))
    }

    #[test]
    fn test_zero_bias_is_identity() {
        let reply = r#"{"has_command": true}"#;
        assert_eq!(apply_precision_bias(reply, 0.0), reply);
    }

    #[test]
    fn test_strong_positive_bias_flips_positive() {
        let out = apply_precision_bias(r#"{"has_command": true}"#, 0.81);
        assert_eq!(flag(&out), Some(false));
    }

    #[test]
    fn test_moderate_positive_bias_is_a_step_not_a_slope() {
        // 0.5 sits between the two thresholds: no flip without dialogue context.
        let out = apply_precision_bias(r#"{"has_command": true}"#, 0.5);
        assert_eq!(flag(&out), Some(true));
        let out = apply_precision_bias(r#"{"has_command": true}"#, 0.8);
        assert_eq!(flag(&out), Some(true));
    }

    #[test]
    fn test_dialogue_context_lowers_threshold() {
        let reply = r#"{"dialog": [{"speaker": "A", "content": "开灯"}], "has_command": true}"#;
        assert_eq!(flag(&apply_precision_bias(reply, 0.31)), Some(false));
        assert_eq!(flag(&apply_precision_bias(reply, 0.3)), Some(true));
    }

    #[test]
    fn test_positive_bias_leaves_negatives_alone() {
        let reply = r#"{"has_command": false}"#;
        assert_eq!(apply_precision_bias(reply, 0.95), reply);
    }

    #[test]
    fn test_negative_bias_is_symmetric() {
        assert_eq!(
            flag(&apply_precision_bias(r#"{"has_command": false}"#, -0.9)),
            Some(true)
        );
        assert_eq!(
            flag(&apply_precision_bias(r#"{"has_command": false}"#, -0.5)),
            Some(false)
        );
        let reply = r#"{"dialogue": [], "has_command": false}"#;
        assert_eq!(flag(&apply_precision_bias(reply, -0.4)), Some(true));
        assert_eq!(
            apply_precision_bias(r#"{"has_command": true}"#, -0.9),
            r#"{"has_command": true}"#
        );
    }

    #[test]
    fn test_non_structured_reply_passes_through() {
        assert_eq!(apply_precision_bias("yes, a command", 0.9), "yes, a command");
        assert_eq!(apply_precision_bias("[true]", 0.9), "[true]");
        assert_eq!(
            apply_precision_bias(r#"{"has_command": "yes"}"#, 0.9),
            r#"{"has_command": "yes"}"#
        );
    }
}
