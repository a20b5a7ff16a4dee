pub mod api_key;
pub mod refresh_token;
pub mod user;

pub use api_key::{ApiKey, ApiKeyUpdate};
pub use refresh_token::RefreshToken;
pub use user::User;
