//! Request validation.
//!
//! Request bodies derive [`Validate`] for the rules that hold on every write.
//! Fields that are only mandatory on creation are listed by the handler and
//! checked by [`validate_with`]. Failures are reported as field errors in the
//! JSON envelope, one per field, ordered by field name.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    error::{AppError, AppResult, FieldError},
    models::Choice,
};

/// 3-30 letters, digits, `_` or `-`.
pub static USERNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,30}$").expect("Invalid regex"));

pub fn validate_username(value: &str) -> Result<(), ValidationError> {
    if USERNAME_REGEX.is_match(value) {
        return Ok(());
    }
    let mut err = ValidationError::new("pattern");
    err.message = Some("must be 3-30 letters, numbers, '_' or '-'".into());
    Err(err)
}

/// Present fields must carry more than whitespace.
pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

pub fn choice<C: Choice>(value: &str) -> Result<(), ValidationError> {
    if C::parse(value).is_some() {
        return Ok(());
    }
    let mut err = ValidationError::new("choice");
    err.add_param("values".into(), &C::VALUES.join(", "));
    Err(err)
}

/// Whether an optional text field holds something other than whitespace.
pub fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.trim().is_empty())
}

pub fn validate(request: &impl Validate) -> AppResult<()> {
    validate_with(request, &[])
}

/// Runs the derived rules, then flags every `(field, present)` pair that is
/// not present as required.
pub fn validate_with(request: &impl Validate, required: &[(&'static str, bool)]) -> AppResult<()> {
    let mut errors = request.validate().err().unwrap_or_else(ValidationErrors::new);
    for &(field, present) in required {
        if !present {
            errors.add(field, ValidationError::new("required"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(field_errors(&errors)))
    }
}

pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = errors
        .field_errors()
        .into_iter()
        .filter_map(|(field, errs)| {
            let field = camel_case(&field);
            let error = errs.iter().min_by_key(|e| precedence(&e.code))?;
            Some(FieldError {
                message: describe(&field, error),
                field: field.into(),
            })
        })
        .collect::<Vec<_>>();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

/// A missing field hides whatever else is wrong with it.
fn precedence(code: &str) -> u8 {
    match code {
        "required" => 0,
        "blank" => 1,
        _ => 2,
    }
}

fn describe(field: &str, error: &ValidationError) -> String {
    let min = param(error, "min");
    let max = param(error, "max");

    match &*error.code {
        "required" => format!("{field} is required"),
        "blank" => format!("{field} cannot be empty"),
        "email" => format!("{field} must be a valid email address"),
        "choice" => format!(
            "{field} must be one of: {}",
            param(error, "values").unwrap_or_default()
        ),
        "length" => match (min, max) {
            (Some(min), Some(max)) => format!("{field} must be {min}-{max} characters"),
            (None, Some(max)) => format!("{field} cannot exceed {max} characters"),
            (Some(min), None) => format!("{field} must be at least {min} characters"),
            (None, None) => format!("{field} has an invalid length"),
        },
        "range" => match (min, max) {
            (Some(min), Some(max)) => format!("{field} must be between {min} and {max}"),
            (Some(min), None) => format!("{field} must be at least {min}"),
            (None, Some(max)) => format!("{field} must be at most {max}"),
            (None, None) => format!("{field} is out of range"),
        },
        _ => match &error.message {
            Some(message) => format!("{field} {message}"),
            None => format!("{field} is invalid"),
        },
    }
}

fn param(error: &ValidationError, name: &str) -> Option<String> {
    error.params.get(name).map(|value| match value {
        Value::String(s) => s.clone(),
        // range bounds may arrive as floats
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    })
}

/// `max_participants` is reported as `maxParticipants`.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
