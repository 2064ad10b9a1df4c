//! Per-field refinements checked after the type check.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl ValidationRule {
    pub fn is_empty(&self) -> bool {
        *self == ValidationRule::default()
    }

    /// First violated rule, as a message. Null values pass; nullability is
    /// checked by the field.
    pub fn check(&self, v: &Value) -> Option<String> {
        if v.is_null() {
            return None;
        }
        if let Some(format) = &self.format {
            if let Some(msg) = check_format(v, format) {
                return Some(msg);
            }
        }
        if let Some(s) = v.as_str() {
            let len = s.chars().count();
            if let Some(max) = self.max_length {
                if len > max as usize {
                    return Some(format!("must be at most {} characters", max));
                }
            }
            if let Some(min) = self.min_length {
                if len < min as usize {
                    return Some(format!("must be at least {} characters", min));
                }
            }
            if let Some(pattern) = &self.pattern {
                match Regex::new(pattern) {
                    Ok(re) if re.is_match(s) => {}
                    Ok(_) => return Some("does not match required pattern".to_string()),
                    Err(_) => return Some(format!("invalid pattern {}", pattern)),
                }
            }
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|a| value_eq(v, a)) {
                return Some(format!(
                    "must be one of: {:?}",
                    allowed.iter().take(5).collect::<Vec<_>>()
                ));
            }
        }
        if let Some(n) = v.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    return Some(format!("must be at least {}", min));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Some(format!("must be at most {}", max));
                }
            }
        }
        None
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn check_format(v: &Value, format: &str) -> Option<String> {
    let s = v.as_str()?;
    match format.to_lowercase().as_str() {
        "email" => {
            let ok = s.len() >= 3
                && s.split_once('@').is_some_and(|(user, host)| !user.is_empty() && !host.is_empty());
            (!ok).then(|| "must be a valid email".to_string())
        }
        "uuid" => uuid::Uuid::parse_str(s)
            .is_err()
            .then(|| "must be a valid UUID".to_string()),
        "url" => {
            let ok = (s.starts_with("http://") || s.starts_with("https://")) && s.len() > 8;
            (!ok).then(|| "must be a valid URL".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(ValidationRule { max_length: Some(3), ..Default::default() }, json!("abcd"), false)]
    #[case(ValidationRule { max_length: Some(3), ..Default::default() }, json!("héé"), true)]
    #[case(ValidationRule { min_length: Some(2), ..Default::default() }, json!("a"), false)]
    #[case(ValidationRule { format: Some("email".into()), ..Default::default() }, json!("a@b.c"), true)]
    #[case(ValidationRule { format: Some("email".into()), ..Default::default() }, json!("@b"), false)]
    #[case(ValidationRule { format: Some("uuid".into()), ..Default::default() }, json!("nope"), false)]
    #[case(ValidationRule { pattern: Some("^[a-z-]+$".into()), ..Default::default() }, json!("my-slug"), true)]
    #[case(ValidationRule { pattern: Some("^[a-z-]+$".into()), ..Default::default() }, json!("My Slug"), false)]
    #[case(ValidationRule { allowed: Some(vec![json!(1), json!(2)]), ..Default::default() }, json!(2.0), true)]
    #[case(ValidationRule { minimum: Some(0.0), maximum: Some(5.0), ..Default::default() }, json!(6), false)]
    #[case(ValidationRule { minimum: Some(0.0), ..Default::default() }, Value::Null, true)]
    fn rules(#[case] rule: ValidationRule, #[case] value: Value, #[case] ok: bool) {
        assert_eq!(rule.check(&value).is_none(), ok);
    }
}
