use async_trait::async_trait;

use super::models::{Contact, User, UserPhoto};
use crate::database::Pool;
use crate::error::AppError;

/// Where users, their photos and their contacts are kept.
///
/// Passwords reach the store already hashed.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, email: &str, username: &str, password_hash: &str) -> Result<i64, AppError>;

    async fn get_user_by_email(&self, email: &str, password_hash: &str) -> Result<Option<User>, AppError>;

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    async fn get_user_photos_by_user_id(&self, user_id: i64) -> Result<Vec<String>, AppError>;

    async fn get_contacts_by_user_id(&self, user_id: i64) -> Result<Vec<Contact>, AppError>;

    async fn get_users(&self) -> Result<Vec<Contact>, AppError>;

    async fn create_contact(&self, user_id: i64, contact_id: i64) -> Result<(), AppError>;
}

#[async_trait]
impl UserStore for Pool {
    async fn create_user(&self, email: &str, username: &str, password_hash: &str) -> Result<i64, AppError> {
        let mut conn = self.connect().await?;
        let user = User::create(&mut *conn, email, username, password_hash).await?;
        Ok(user.id)
    }

    async fn get_user_by_email(&self, email: &str, password_hash: &str) -> Result<Option<User>, AppError> {
        let mut conn = self.connect().await?;
        User::login(&mut *conn, email, password_hash).await
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let mut conn = self.connect().await?;
        User::get_by_id(&mut *conn, id).await
    }

    async fn get_user_photos_by_user_id(&self, user_id: i64) -> Result<Vec<String>, AppError> {
        let mut conn = self.connect().await?;
        UserPhoto::urls_by_user(&mut *conn, user_id).await
    }

    async fn get_contacts_by_user_id(&self, user_id: i64) -> Result<Vec<Contact>, AppError> {
        let mut conn = self.connect().await?;
        Contact::get_by_user(&mut *conn, user_id).await
    }

    async fn get_users(&self) -> Result<Vec<Contact>, AppError> {
        let mut conn = self.connect().await?;
        Contact::all(&mut *conn).await
    }

    async fn create_contact(&self, user_id: i64, contact_id: i64) -> Result<(), AppError> {
        let mut conn = self.connect().await?;
        Contact::add(&mut *conn, user_id, contact_id).await
    }
}
