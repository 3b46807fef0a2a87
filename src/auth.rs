use std::collections::HashSet;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::Role;

/// Shared-password check for every login.
#[derive(Debug)]
pub struct ParkdAuthSource {
    password: String,
}

impl ParkdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ParkdAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Who may connect, and which login names act as administrators.
#[derive(Debug, Clone)]
pub struct Access {
    pub password: String,
    admins: HashSet<String>,
}

impl Access {
    pub fn new(password: String, admins: impl IntoIterator<Item = String>) -> Self {
        Self {
            password,
            admins: admins.into_iter().collect(),
        }
    }

    pub fn role_for(&self, username: &str) -> Role {
        if self.admins.contains(username) {
            Role::Admin
        } else {
            Role::User
        }
    }
}
