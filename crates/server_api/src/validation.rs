use serde_json::Value;
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode, FieldErrors},
    protocol::UserPayload,
};
use storage::Storage;

const NAME_MAX_CHARS: usize = 255;
const EMAIL_TAKEN: &str = "The email has already been taken.";

/// A user payload that passed every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidUser {
    pub name: String,
    pub email: String,
    pub is_active: bool,
}

/// Checks `payload` against the user rules.
///
/// `name`: required string of at most 255 characters. `email`: required,
/// well-formed and not used by another user (`except` is the user being
/// updated). `is_active`: required boolean (`true`, `false`, `1`, `0`, `"1"`,
/// `"0"`). Strings are trimmed and empty strings count as missing.
pub async fn validate_user(
    storage: &Storage,
    payload: &UserPayload,
    except: Option<UserId>,
) -> Result<ValidUser, ApiError> {
    let mut errors = FieldErrors::new();

    let name = match present(payload.name.as_ref()) {
        None => fail(&mut errors, "name", "The name field is required."),
        Some(Value::String(name)) if name.trim().chars().count() > NAME_MAX_CHARS => fail(
            &mut errors,
            "name",
            format!("The name field must not be greater than {NAME_MAX_CHARS} characters."),
        ),
        Some(Value::String(name)) => Some(name.trim().to_string()),
        Some(_) => fail(&mut errors, "name", "The name field must be a string."),
    };

    let email = match present(payload.email.as_ref()) {
        None => fail(&mut errors, "email", "The email field is required."),
        Some(Value::String(email)) if is_valid_email(email.trim()) => Some(email.trim().to_string()),
        Some(_) => fail(
            &mut errors,
            "email",
            "The email field must be a valid email address.",
        ),
    };

    let is_active = match present(payload.is_active.as_ref()) {
        None => fail(&mut errors, "is_active", "The is_active field is required."),
        Some(value) => match as_boolean(value) {
            Some(flag) => Some(flag),
            None => fail(
                &mut errors,
                "is_active",
                "The is_active field must be true or false.",
            ),
        },
    };

    if let Some(email) = email.as_deref() {
        let taken = storage
            .email_taken(email, except)
            .await
            .map_err(|err| ApiError::new(ErrorCode::Internal, err.to_string()))?;
        if taken {
            fail::<()>(&mut errors, "email", EMAIL_TAKEN);
        }
    }

    match (name, email, is_active) {
        (Some(name), Some(email), Some(is_active)) if errors.is_empty() => Ok(ValidUser {
            name,
            email,
            is_active,
        }),
        _ => Err(ApiError::validation(errors)),
    }
}

pub(crate) fn email_taken_error() -> FieldErrors {
    FieldErrors::from([("email".to_string(), vec![EMAIL_TAKEN.to_string()])])
}

fn fail<T>(errors: &mut FieldErrors, field: &str, message: impl Into<String>) -> Option<T> {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.into());
    None
}

fn present(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(value) => Some(value),
    }
}

fn as_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
        && !email.chars().any(char::is_whitespace)
}
