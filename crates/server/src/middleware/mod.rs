pub mod auth;

pub use auth::{
    require_api_key, ApiKeyAuth, ApiKeyConfig, AuthConfig, AuthContext, AuthRejection, AuthRequest,
    AuthResult, AuthVerdict,
};
