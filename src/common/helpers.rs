// Helper functions for safe logging

use serde_json::Value;

/// JSON keys whose values never reach the logs
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "access_token",
    "accessToken",
    "refresh_token",
    "refreshToken",
    "code",
    "code_verifier",
    "handoff",
];

/// Masks email addresses for safe logging
/// Prevents sensitive data exposure while preserving debugging utility
///
/// # Example
/// ```ignore
/// let masked = safe_email_log("user@example.com");
/// // Returns: "u***@example.com"
/// ```
pub fn safe_email_log(email: &str) -> String {
    if email.chars().count() > 3 {
        let parts: Vec<&str> = email.split('@').collect();
        match (parts.len(), parts[0].chars().next()) {
            (2, Some(first)) => format!("{}***@{}", first, parts[1]),
            _ => "***@***.***".to_string(),
        }
    } else {
        "***@***.***".to_string()
    }
}

/// Masks tokens for safe logging
/// Shows only first and last 4 characters
///
/// # Example
/// ```ignore
/// let masked = safe_token_log("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9");
/// // Returns: "eyJh...VCJ9"
/// ```
pub fn safe_token_log(token: &str) -> String {
    if token.len() > 8 && token.is_ascii() {
        format!("{}...{}", &token[..4], &token[token.len() - 4..])
    } else {
        "***".to_string()
    }
}

/// Replaces the values of sensitive keys anywhere in a JSON document
pub fn mask_sensitive_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if SENSITIVE_KEYS.contains(&key.as_str()) {
                    *v = Value::String("***".to_string());
                } else {
                    mask_sensitive_json(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_sensitive_json),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_email_log() {
        assert_eq!(safe_email_log("user@example.com"), "u***@example.com");
        assert_eq!(safe_email_log("a@b"), "***@***.***");
        assert_eq!(safe_email_log("not-an-email"), "***@***.***");
    }

    #[test]
    fn test_safe_email_log_multibyte_local_part() {
        assert_eq!(safe_email_log("é@example.com"), "é***@example.com");
        assert_eq!(safe_email_log("Ωmega@example.com"), "Ω***@example.com");
        assert_eq!(safe_email_log("@example.com"), "***@***.***");
    }

    #[test]
    fn test_safe_token_log() {
        assert_eq!(safe_token_log("abcdefghijklmnop"), "abcd...mnop");
        assert_eq!(safe_token_log("short"), "***");
    }

    #[test]
    fn test_mask_sensitive_json_nested() {
        let mut body = json!({
            "username": "alice",
            "password": "hunter22",
            "user": { "token": "eyJ...", "id": 1 },
            "items": [{ "refresh_token": "RT1" }]
        });
        mask_sensitive_json(&mut body);

        assert_eq!(body["username"], "alice");
        assert_eq!(body["password"], "***");
        assert_eq!(body["user"]["token"], "***");
        assert_eq!(body["user"]["id"], 1);
        assert_eq!(body["items"][0]["refresh_token"], "***");
    }
}
