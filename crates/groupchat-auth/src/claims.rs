//! Token payload.

use groupchat_core::{AuthError, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JWT claims carried by a chat credential.
///
/// `user_id` is kept as a raw JSON value: some issuers encode it as a float
/// (`3.0`), which is accepted as long as it is a whole non-negative number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Optional login name, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Claims {
    /// Claims for `user_id` expiring at `exp`.
    pub fn new(user_id: UserId, exp: i64) -> Self {
        Self {
            user_id: Some(Value::from(user_id.get())),
            exp,
            username: None,
        }
    }

    /// Extract the numeric user id.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn user_id(&self) -> Result<UserId, AuthError> {
        let value = self.user_id.as_ref().ok_or(AuthError::InvalidUserId)?;
        if let Some(id) = value.as_i64() {
            return if id >= 0 {
                Ok(UserId::new(id))
            } else {
                Err(AuthError::InvalidUserId)
            };
        }
        match value.as_f64() {
            Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= i64::MAX as f64 => {
                Ok(UserId::new(f as i64))
            }
            _ => Err(AuthError::InvalidUserId),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(user_id: Value) -> Claims {
        Claims {
            user_id: Some(user_id),
            exp: 0,
            username: None,
        }
    }

    #[test]
    fn integer_user_id() {
        assert_eq!(claims(json!(42)).user_id().unwrap(), UserId::new(42));
    }

    #[test]
    fn whole_float_user_id() {
        assert_eq!(claims(json!(42.0)).user_id().unwrap(), UserId::new(42));
    }

    #[test]
    fn fractional_and_string_user_ids_rejected() {
        assert_eq!(claims(json!(4.5)).user_id(), Err(AuthError::InvalidUserId));
        assert_eq!(claims(json!("42")).user_id(), Err(AuthError::InvalidUserId));
        assert_eq!(claims(json!(-1)).user_id(), Err(AuthError::InvalidUserId));
    }

    #[test]
    fn missing_user_id_rejected() {
        let c: Claims = serde_json::from_value(json!({"exp": 10})).unwrap();
        assert_eq!(c.user_id(), Err(AuthError::InvalidUserId));
    }
}
