// src/auth/validators.rs

use super::models::{LoginRequest, RegisterRequest};
use crate::common::{ValidationResult, Validator};

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 32;
pub const PASSWORD_MIN: usize = 8;

pub struct CredentialsValidator;

impl Validator<RegisterRequest> for CredentialsValidator {
    fn validate(&self, data: &RegisterRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        let username = data.username.trim();
        if username.len() < USERNAME_MIN || username.len() > USERNAME_MAX {
            result.add_error("username", "Username must be 3 to 32 characters");
        } else if !is_valid_username(username) {
            result.add_error(
                "username",
                "Username may only contain letters, digits, '_', '.' and '-'",
            );
        }

        if data.password.chars().count() < PASSWORD_MIN {
            result.add_error("password", "Password must be at least 8 characters");
        }

        if let Some(email) = data.email.as_deref().map(str::trim) {
            if !email.is_empty() && !is_plausible_email(email) {
                result.add_error("email", "Email address is invalid");
            }
        }

        result
    }
}

impl Validator<LoginRequest> for CredentialsValidator {
    fn validate(&self, data: &LoginRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        if data.username.trim().is_empty() {
            result.add_error("username", "Username is required");
        }
        if data.password.is_empty() {
            result.add_error("password", "Password is required");
        }

        result
    }
}

fn is_valid_username(username: &str) -> bool {
    username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}
