use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const CLIENT_NAME_MAX_LEN: usize = 100;
pub const CLIENT_PHONE_MAX_LEN: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub i64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// Writable client fields, shared by creation and update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDraft {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl ClientDraft {
    /// Trims every field, turns blank optionals into `None`, then validates.
    pub fn normalized(self) -> Result<Self, DomainError> {
        let draft = Self {
            name: self.name.trim().to_owned(),
            email: self.email.trim().to_owned(),
            phone: self.phone.trim().to_owned(),
            address: non_blank(self.address),
            notes: non_blank(self.notes),
            created_by: non_blank(self.created_by),
        };
        draft.validate()?;
        Ok(draft)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name", "client name is required"));
        }
        if self.name.chars().count() > CLIENT_NAME_MAX_LEN {
            return Err(DomainError::validation(
                "name",
                format!("client name must be at most {CLIENT_NAME_MAX_LEN} characters"),
            ));
        }

        validate_email(&self.email)?;

        if self.phone.chars().count() > CLIENT_PHONE_MAX_LEN {
            return Err(DomainError::validation(
                "phone",
                format!("phone number must be at most {CLIENT_PHONE_MAX_LEN} characters"),
            ));
        }

        Ok(())
    }
}

fn validate_email(email: &str) -> Result<(), DomainError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(DomainError::validation("email", "email is required"));
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(DomainError::validation("email", format!("`{email}` is not a valid email address"))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}
