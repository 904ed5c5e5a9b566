use crate::core::error::{ServiceError, ServiceResult};
use crate::core::model::{User, UserId};
use crate::core::repository::UserRepository;
use crate::entity_cache::{EntityCache, keys};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 100;

fn validate_name(name: &str) -> ServiceResult<&str> {
    let name = name.trim();
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(ServiceError::invalid_argument(format!(
            "name must be between {MIN_NAME_LEN} and {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name)
}

fn validate_email(email: &str) -> ServiceResult<&str> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(' ')
        }
        None => false,
    };
    if !valid {
        return Err(ServiceError::invalid_argument(format!(
            "invalid email address: {email}"
        )));
    }
    Ok(email)
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
    cache: Arc<EntityCache>,
    ttl: Duration,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>, cache: Arc<EntityCache>, ttl: Duration) -> Self {
        Self { users, cache, ttl }
    }

    pub async fn create_user(&self, name: &str, email: &str) -> ServiceResult<User> {
        let name = validate_name(name)?;
        let email = validate_email(email)?;
        // Checked again by the repository under its writer lock
        if let Some(existing) = self.users.get_by_email(email).await? {
            return Err(ServiceError::conflict(format!(
                "email {} is already registered to user {}",
                existing.email, existing.id
            )));
        }
        let user = self.users.create(name, email).await?;
        info!("Created user {} <{}>", user.id, user.email);
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> ServiceResult<User> {
        self.cache
            .get_or_load(&keys::user(id), self.ttl, || async {
                Ok(self.users.get_by_id(id).await?)
            })
            .await
    }

    /// Only a user may rename themself.
    pub async fn rename_user(
        &self,
        id: UserId,
        acting_user: UserId,
        name: &str,
    ) -> ServiceResult<User> {
        let mut user = self.users.get_by_id(id).await?;
        if id != acting_user {
            return Err(ServiceError::forbidden(format!(
                "user {acting_user} cannot rename user {id}"
            )));
        }
        user.name = validate_name(name)?.to_string();
        let user = self.users.update(&user).await?;
        self.cache.invalidate(&[keys::user(id)]).await?;
        Ok(user)
    }
}
