//! In-memory collaborators for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::UserStore;
use super::repo_types::{NewUser, Role, User};
use crate::email::Mailer;
use crate::error::StoreFault;

pub fn user_with_password(email: &str, password_hash: &str) -> User {
    User {
        id: Uuid::new_v4(),
        name: "Test User".into(),
        email: email.into(),
        password_hash: password_hash.into(),
        role: Role::User,
        password_changed_at: None,
        password_reset_token: None,
        password_reset_expires: None,
        active: true,
        created_at: OffsetDateTime::now_utc(),
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn seeded(users: Vec<User>) -> Self {
        Self {
            users: Mutex::new(users),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == id)
            .cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreFault> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email && u.active)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreFault> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == id && u.active)
            .cloned())
    }

    async fn find_by_reset_token(
        &self,
        token_digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreFault> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| {
                u.active
                    && u.password_reset_token.as_deref() == Some(token_digest)
                    && u.password_reset_expires.map(|e| e >= now).unwrap_or(false)
            })
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreFault> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == new_user.email) {
            return Err(StoreFault::Duplicate {
                value: new_user.email,
            });
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: Role::User,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_digest: Option<&str>,
        expires: Option<OffsetDateTime>,
    ) -> Result<(), StoreFault> {
        let mut users = self.users.lock().unwrap();
        if let Some(u) = users.iter_mut().find(|u| u.id == id) {
            u.password_reset_token = token_digest.map(|t| t.to_string());
            u.password_reset_expires = expires;
        }
        Ok(())
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<(), StoreFault> {
        let mut users = self.users.lock().unwrap();
        if let Some(u) = users.iter_mut().find(|u| u.id == id) {
            u.password_hash = password_hash.to_string();
            u.password_changed_at = Some(changed_at);
            u.password_reset_token = None;
            u.password_reset_expires = None;
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, StoreFault> {
        let mut users = self.users.lock().unwrap();
        if let Some(e) = email {
            if users.iter().any(|u| u.email == e && u.id != id) {
                return Err(StoreFault::Duplicate {
                    value: e.to_string(),
                });
            }
        }
        let u = users
            .iter_mut()
            .find(|u| u.id == id)
            .expect("user present in fake store");
        if let Some(n) = name {
            u.name = n.to_string();
        }
        if let Some(e) = email {
            u.email = e.to_string();
        }
        Ok(u.clone())
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StoreFault> {
        let mut users = self.users.lock().unwrap();
        if let Some(u) = users.iter_mut().find(|u| u.id == id) {
            u.active = false;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, StoreFault> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.active)
            .cloned()
            .collect())
    }
}

/// Records every send; flips to failure mode via [`RecordingMailer::failing`].
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_welcome(&self, _user: &User, url: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("mail provider unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push(("welcome".into(), url.into()));
        Ok(())
    }

    async fn send_password_reset(&self, _user: &User, url: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("mail provider unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push(("password_reset".into(), url.into()));
        Ok(())
    }
}
