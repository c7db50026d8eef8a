use crate::shared::errors::AppError;

pub struct Validator;

impl Validator {
    pub fn validate_job_id(id: &str) -> Result<(), AppError> {
        if id.trim().is_empty() {
            return Err(AppError::InvalidInput("Job id cannot be empty".to_string()));
        }
        if id.len() > 255 {
            return Err(AppError::InvalidInput(
                "Job id too long (max 255 characters)".to_string(),
            ));
        }
        if id.chars().any(char::is_control) {
            return Err(AppError::InvalidInput(
                "Job id cannot contain control characters".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_positive(name: &str, value: u32) -> Result<(), AppError> {
        if value == 0 {
            return Err(AppError::InvalidInput(format!(
                "{} must be greater than zero",
                name
            )));
        }
        Ok(())
    }

    pub fn validate_base_url(name: &str, url: &str) -> Result<(), AppError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidInput(format!("{} cannot be empty", name)));
        }
        let allowed = ["http://", "https://", "ws://", "wss://"];
        if !allowed.iter().any(|scheme| trimmed.starts_with(scheme)) {
            return Err(AppError::InvalidInput(format!(
                "{} must start with http(s):// or ws(s)://, got '{}'",
                name, trimmed
            )));
        }
        Ok(())
    }
}
