//! Request and response payloads for the `auth/*` and `user` endpoints.

use serde::{Deserialize, Serialize};

use super::User;

/// Body of `POST auth/login`. `login` accepts either a username or an e-mail.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
    pub device_name: String,
}

/// Body of `POST auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub device_name: String,
}

/// `data` member of a successful login/register response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthData {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// `data` member of `auth/forgot-password` and `auth/resend-otp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgotPasswordData {
    #[serde(default)]
    pub token: Option<String>,
    /// Lifetime of the OTP in seconds.
    #[serde(default)]
    pub expires_in: i64,
}

/// `data` member of `auth/verify-otp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtpVerifyData {
    #[serde(default)]
    pub reset_token: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of `POST auth/reset-password`.
#[derive(Debug, Clone, Serialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub token: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Body of `PUT user`. Unset fields are left untouched by the server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.full_name.is_none()
            && self.bio.is_none()
            && self.website_url.is_none()
            && self.github_url.is_none()
            && self.twitter_url.is_none()
    }

    /// Set a field by its wire name. Returns false for unknown fields.
    pub fn set(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "username" => &mut self.username,
            "email" => &mut self.email,
            "full_name" => &mut self.full_name,
            "bio" => &mut self.bio,
            "website_url" => &mut self.website_url,
            "github_url" => &mut self.github_url,
            "twitter_url" => &mut self.twitter_url,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// Body of `PUT user/password`.
#[derive(Debug, Clone, Serialize)]
pub struct PasswordUpdate {
    pub current_password: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Pending password-reset state kept between the OTP steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordReset {
    pub email: String,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_update_skips_unset_fields() {
        let mut update = ProfileUpdate::default();
        assert!(update.is_empty());
        assert!(update.set("bio", "Rustacean".to_string()));
        assert!(!update.set("is_admin", "true".to_string()));

        let json = serde_json::to_value(&update).expect("Failed to serialize profile update");
        assert_eq!(json, serde_json::json!({"bio": "Rustacean"}));
    }

    #[test]
    fn test_parse_auth_data() {
        let json = r#"{"user":{"id":"1","username":"ada","email":"ada@example.test"},"token":"t0k","token_type":"Bearer"}"#;
        let data: AuthData = serde_json::from_str(json).expect("Failed to parse auth data JSON");
        assert_eq!(data.token.as_deref(), Some("t0k"));
        assert_eq!(data.user.map(|u| u.username), Some("ada".to_string()));
    }
}
