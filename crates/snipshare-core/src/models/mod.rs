//! Data models for the snippet-sharing API.
//!
//! This module contains the JSON shapes exchanged with the server:
//!
//! - `User`: The account profile returned by auth and profile endpoints
//! - `Snippet`: A shared code snippet
//! - Auth payloads: `AuthData`, `LoginRequest`, `RegisterRequest`, password reset types
//! - Response wrappers: `Envelope`, `MessageResponse`, `ErrorResponse`

pub mod auth;
pub mod response;
pub mod snippet;
pub mod user;

pub use auth::{
    AuthData, ForgotPasswordData, LoginRequest, OtpVerifyData, PasswordReset, PasswordUpdate,
    ProfileUpdate, RegisterRequest, ResetPasswordRequest,
};
pub use response::{Envelope, ErrorResponse, MessageResponse};
pub use snippet::Snippet;
pub use user::User;
