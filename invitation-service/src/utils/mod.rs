pub mod token;
pub mod validation;

pub use token::{generate_raw_token, hash_token, token_preview, TOKEN_PREVIEW_LEN};
pub use validation::{normalize_email, ValidatedJson};
