//! Typed methods for the service's REST endpoints.
//!
//! Most endpoints answer with an `Envelope`; `success: false` is treated as a
//! server error even when it arrives with a 2xx status. Methods that change
//! the signed-in state update the `CredentialStore` themselves.

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

use super::client::ApiClient;
use super::request::ApiRequest;
use super::ApiError;
use crate::auth::{Credential, CredentialError};
use crate::models::{
    AuthData, Envelope, ErrorResponse, ForgotPasswordData, LoginRequest, MessageResponse,
    OtpVerifyData, PasswordReset, PasswordUpdate, ProfileUpdate, RegisterRequest,
    ResetPasswordRequest, Snippet, User,
};

impl ApiClient {
    // ========================================================================
    // Authentication
    // ========================================================================

    /// Sign in with a username or e-mail. Stores the issued credential.
    pub async fn login(&self, login: &str, password: &str, device_name: &str) -> Result<User, ApiError> {
        let body = LoginRequest {
            login: login.to_string(),
            password: password.to_string(),
            device_name: device_name.to_string(),
        };
        let data: AuthData = self
            .enveloped(ApiRequest::post("auth/login").json(&body)?)
            .await?;
        self.sign_in(data)
    }

    /// Create an account. The server signs the new user in right away.
    pub async fn register(&self, request: &RegisterRequest) -> Result<User, ApiError> {
        let data: AuthData = self
            .enveloped(ApiRequest::post("auth/register").json(request)?)
            .await?;
        self.sign_in(data)
    }

    /// Revoke this device's token. The local credential is cleared even if
    /// the server call fails.
    pub async fn logout(&self) -> Result<MessageResponse, ApiError> {
        self.sign_out("auth/logout", "Logged out successfully").await
    }

    /// Revoke every token for the account, then clear locally.
    pub async fn logout_all(&self) -> Result<MessageResponse, ApiError> {
        self.sign_out("auth/logout-all", "Logged out from all devices").await
    }

    // ========================================================================
    // Password reset
    // ========================================================================

    /// Ask for a reset OTP by e-mail; remembers the returned reset token.
    pub async fn forgot_password(&self, email: &str) -> Result<ForgotPasswordData, ApiError> {
        let data: ForgotPasswordData = self
            .enveloped(ApiRequest::post("auth/forgot-password").json(&json!({ "email": email }))?)
            .await?;
        self.remember_reset(email, data.token.as_deref())?;
        Ok(data)
    }

    /// Check the OTP. On success the verified reset token replaces the
    /// pending one.
    pub async fn verify_otp(&self, email: &str, otp: &str, token: &str) -> Result<OtpVerifyData, ApiError> {
        let body = json!({ "email": email, "otp": otp, "token": token });
        let data: OtpVerifyData = self
            .enveloped(ApiRequest::post("auth/verify-otp").json(&body)?)
            .await?;
        let email = data.email.as_deref().unwrap_or(email);
        self.remember_reset(email, data.reset_token.as_deref())?;
        Ok(data)
    }

    pub async fn resend_otp(&self, email: &str, token: &str) -> Result<ForgotPasswordData, ApiError> {
        let body = json!({ "email": email, "token": token });
        let data: ForgotPasswordData = self
            .enveloped(ApiRequest::post("auth/resend-otp").json(&body)?)
            .await?;
        self.remember_reset(email, data.token.as_deref())?;
        Ok(data)
    }

    /// Set a new password with a verified reset token. Clears the pending
    /// reset state on success.
    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<MessageResponse, ApiError> {
        let response = self
            .acknowledged(ApiRequest::post("auth/reset-password").json(request)?)
            .await?;
        store(self.credentials().clear_password_reset())?;
        Ok(response)
    }

    // ========================================================================
    // Profile
    // ========================================================================

    /// Fetch the signed-in user and refresh the copy kept with the credential.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        let user: User = self.enveloped(ApiRequest::get("user")).await?;
        store(self.credentials().update_user(user.clone()))?;
        Ok(user)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        if update.is_empty() {
            return Err(ApiError::InvalidRequest("profile update has no fields".to_string()));
        }
        let user: User = self
            .enveloped(ApiRequest::put("user").json(update)?)
            .await?;
        store(self.credentials().update_user(user.clone()))?;
        Ok(user)
    }

    pub async fn update_password(&self, update: &PasswordUpdate) -> Result<MessageResponse, ApiError> {
        self.acknowledged(ApiRequest::put("user/password").json(update)?)
            .await
    }

    /// Permanently delete the account, then sign out locally.
    pub async fn delete_account(&self, password: &str) -> Result<MessageResponse, ApiError> {
        let response = self
            .acknowledged(ApiRequest::delete("user").json(&json!({ "password": password }))?)
            .await?;
        store(self.credentials().clear_all())?;
        info!("Account deleted");
        Ok(response)
    }

    // ========================================================================
    // Snippets
    // ========================================================================

    pub async fn snippet(&self, id: i64) -> Result<Snippet, ApiError> {
        self.get(&format!("snippets/{}", id)).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Send and unwrap an enveloped response, requiring `data`.
    async fn enveloped<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path().to_string();
        self.envelope::<T>(request)
            .await?
            .data
            .ok_or_else(|| ApiError::Decode {
                context: format!("response to '{}' has no data", path),
                source: None,
            })
    }

    /// Send a request whose response only acknowledges the action.
    async fn acknowledged(&self, request: ApiRequest) -> Result<MessageResponse, ApiError> {
        let envelope = self.envelope::<serde_json::Value>(request).await?;
        Ok(MessageResponse {
            success: envelope.success,
            message: envelope.message,
        })
    }

    async fn envelope<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<Envelope<T>, ApiError> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let body = response.text();

        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| ApiError::decode(e, &body))?;
        if envelope.success {
            return Ok(envelope);
        }

        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .and_then(|e| e.first_error().map(str::to_string))
            .or(envelope.message);
        Err(ApiError::ServerError { status, message, body })
    }

    fn sign_in(&self, data: AuthData) -> Result<User, ApiError> {
        let (Some(token), Some(user)) = (data.token, data.user) else {
            return Err(ApiError::Decode {
                context: "authentication response is missing the token or user".to_string(),
                source: None,
            });
        };

        let mut credential = Credential::new(token).with_user(user.clone());
        if let Some(token_type) = data.token_type.filter(|t| !t.trim().is_empty()) {
            credential.token_type = token_type;
        }
        store(self.credentials().save(&credential))?;
        info!(user = %user.username, "Signed in");
        Ok(user)
    }

    async fn sign_out(&self, path: &str, fallback: &str) -> Result<MessageResponse, ApiError> {
        let outcome = self.acknowledged(ApiRequest::post(path)).await;
        store(self.credentials().clear())?;

        match outcome {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(path, error = %e, "Server logout failed, signed out locally");
                Ok(MessageResponse::ok(fallback))
            }
        }
    }

    fn remember_reset(&self, email: &str, token: Option<&str>) -> Result<(), ApiError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        store(self.credentials().save_password_reset(&PasswordReset {
            email: email.to_string(),
            token: token.to_string(),
        }))
    }
}

fn store<T>(result: Result<T, CredentialError>) -> Result<T, ApiError> {
    result.map_err(ApiError::unknown)
}
