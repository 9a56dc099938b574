use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One cleartext password for every tenant. The login's database name picks
/// the tenant, so the user name is not consulted.
#[derive(Debug)]
pub struct SharedPassword {
    secret: Vec<u8>,
}

impl SharedPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            secret: password.into().into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.secret.clone()))
    }
}
