//! Access token command

use crate::auth::JwtAuth;
use crate::config::Config;
use crate::error::Result;

/// Print a signed access token for `user_id`
///
/// # Arguments
///
/// * `config` - Loaded configuration supplying the auth settings
/// * `user_id` - User the token authenticates as
///
/// # Errors
///
/// Returns an error if the token cannot be signed
pub fn issue_token(config: &Config, user_id: i64) -> Result<()> {
    let token = JwtAuth::new(&config.auth).issue(user_id)?;
    tracing::info!(
        "Issued access token for user {} (valid {}s)",
        user_id,
        config.auth.token_ttl_secs
    );
    println!("{}", token);
    Ok(())
}
