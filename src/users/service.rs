use async_trait::async_trait;
use serde::Serialize;

use super::models::{Contact, User};
use super::store::UserStore;
use crate::auth::{Auth, AuthError};
use crate::error::AppError;
use crate::validators::{ValidationFailed, EMAIL, PASSWORD, USERNAME};

/// A user with the photo list and contact list attached.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub image_urls: Vec<String>,
    pub contacts: Vec<Contact>,
}

#[async_trait]
pub trait Users: Send + Sync {
    async fn create_user(&self, email: &str, username: &str, password: &str) -> Result<i64, AppError>;

    /// A wrong e-mail and a wrong password fail the same way.
    async fn get_user_by_email(&self, email: &str, password: &str) -> Result<UserProfile, AppError>;

    async fn get_user_by_id(&self, id: i64) -> Result<UserProfile, AppError>;

    async fn issue_token(&self, email: &str, password: &str) -> Result<String, AppError>;

    fn validate_token(&self, token: &str) -> Result<i64, AuthError>;

    async fn get_users(&self) -> Result<Vec<Contact>, AppError>;

    async fn create_contact(&self, user_id: i64, contact_id: i64) -> Result<(), AppError>;
}

pub struct UserService<S> {
    store: S,
    auth: Auth,
}

impl<S: UserStore> UserService<S> {
    pub fn new(store: S, auth: Auth) -> UserService<S> {
        UserService { store, auth }
    }

    async fn with_related(&self, user: User) -> Result<UserProfile, AppError> {
        let image_urls = self.store.get_user_photos_by_user_id(user.id).await?;
        let contacts = self.store.get_contacts_by_user_id(user.id).await?;
        Ok(UserProfile {
            user,
            image_urls,
            contacts,
        })
    }

    async fn find(&self, email: &str, password: &str) -> Result<Option<User>, AppError> {
        let email = email.trim().to_ascii_lowercase();
        let password = self.auth.hash_password(password);
        self.store.get_user_by_email(&email, &password).await
    }
}

#[async_trait]
impl<S: UserStore> Users for UserService<S> {
    async fn create_user(&self, email: &str, username: &str, password: &str) -> Result<i64, AppError> {
        let email = email.trim().to_ascii_lowercase();
        let username = username.trim();
        EMAIL.run(&email)?;
        USERNAME.run(username)?;
        PASSWORD.run(password)?;

        let password = self.auth.hash_password(password);
        let id = self.store.create_user(&email, username, &password).await?;
        log::debug!("user {} was created", id);
        Ok(id)
    }

    async fn get_user_by_email(&self, email: &str, password: &str) -> Result<UserProfile, AppError> {
        let user = self.find(email, password).await?.ok_or(AppError::NotFound("user"))?;
        self.with_related(user).await
    }

    async fn get_user_by_id(&self, id: i64) -> Result<UserProfile, AppError> {
        let user = self.store.get_user_by_id(id).await?.ok_or(AppError::NotFound("user"))?;
        self.with_related(user).await
    }

    async fn issue_token(&self, email: &str, password: &str) -> Result<String, AppError> {
        let user = self.find(email, password).await?.ok_or(AuthError::InvalidCredentials)?;
        Ok(self.auth.sign(user.id)?)
    }

    fn validate_token(&self, token: &str) -> Result<i64, AuthError> {
        self.auth.validate(token)
    }

    async fn get_users(&self) -> Result<Vec<Contact>, AppError> {
        self.store.get_users().await
    }

    async fn create_contact(&self, user_id: i64, contact_id: i64) -> Result<(), AppError> {
        if user_id == contact_id {
            return Err(ValidationFailed("A user cannot be their own contact.").into());
        }
        self.store.create_contact(user_id, contact_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        users: Mutex<Vec<User>>,
        contacts: Mutex<Vec<(i64, i64)>>,
        photos: Mutex<Vec<(i64, String)>>,
    }

    impl MemoryStore {
        fn contact(&self, id: i64) -> Option<Contact> {
            self.users.lock().unwrap().iter().find(|u| u.id == id).map(|u| Contact {
                id: u.id,
                username: u.username.clone(),
                email: u.email.clone(),
            })
        }
    }

    #[async_trait]
    impl UserStore for MemoryStore {
        async fn create_user(&self, email: &str, username: &str, password_hash: &str) -> Result<i64, AppError> {
            let mut users = self.users.lock().unwrap();
            if users.iter().any(|u| u.email == email) {
                return Err(AppError::AlreadyExists("user"));
            }
            let id = users.len() as i64 + 1;
            users.push(User {
                id,
                email: email.to_string(),
                username: username.to_string(),
                password: password_hash.to_string(),
                joined: Utc::now().naive_utc(),
            });
            Ok(id)
        }

        async fn get_user_by_email(&self, email: &str, password_hash: &str) -> Result<Option<User>, AppError> {
            let users = self.users.lock().unwrap();
            Ok(users
                .iter()
                .find(|u| u.email == email && u.password == password_hash)
                .cloned())
        }

        async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
            Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
        }

        async fn get_user_photos_by_user_id(&self, user_id: i64) -> Result<Vec<String>, AppError> {
            let photos = self.photos.lock().unwrap();
            Ok(photos.iter().filter(|(id, _)| *id == user_id).map(|(_, url)| url.clone()).collect())
        }

        async fn get_contacts_by_user_id(&self, user_id: i64) -> Result<Vec<Contact>, AppError> {
            let ids: Vec<i64> = self
                .contacts
                .lock()
                .unwrap()
                .iter()
                .filter(|(user, _)| *user == user_id)
                .map(|(_, contact)| *contact)
                .collect();
            Ok(ids.into_iter().filter_map(|id| self.contact(id)).collect())
        }

        async fn get_users(&self) -> Result<Vec<Contact>, AppError> {
            let ids: Vec<i64> = self.users.lock().unwrap().iter().map(|u| u.id).collect();
            Ok(ids.into_iter().filter_map(|id| self.contact(id)).collect())
        }

        async fn create_contact(&self, user_id: i64, contact_id: i64) -> Result<(), AppError> {
            let mut contacts = self.contacts.lock().unwrap();
            for pair in [(user_id, contact_id), (contact_id, user_id)] {
                if !contacts.contains(&pair) {
                    contacts.push(pair);
                }
            }
            Ok(())
        }
    }

    fn service() -> UserService<MemoryStore> {
        let auth = Auth::new("secret", "salt", Duration::hours(12));
        UserService::new(MemoryStore::default(), auth)
    }

    #[tokio::test]
    async fn password_is_stored_hashed() {
        let service = service();
        let id = service
            .create_user("Homura@Messenger.test", "homura", "MadokaMadoka")
            .await
            .unwrap();
        let stored = service.store.get_user_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.email, "homura@messenger.test");
        assert_ne!(stored.password, "MadokaMadoka");
        assert_eq!(stored.password, service.auth.hash_password("MadokaMadoka"));
    }

    #[tokio::test]
    async fn registration_is_validated() {
        let service = service();
        let short = service.create_user("homura@messenger.test", "homura", "short").await;
        assert!(matches!(short, Err(AppError::ValidationFail(_))));
        let email = service.create_user("homura", "homura", "MadokaMadoka").await;
        assert!(matches!(email, Err(AppError::ValidationFail(_))));
        assert!(service.store.users.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn issued_token_names_the_stored_user() {
        let service = service();
        service.create_user("first@messenger.test", "first", "password1").await.unwrap();
        let id = service.create_user("second@messenger.test", "second", "password2").await.unwrap();
        let token = service.issue_token("second@messenger.test", "password2").await.unwrap();
        assert_eq!(service.validate_token(&token).unwrap(), id);
    }

    #[tokio::test]
    async fn bad_credentials() {
        let service = service();
        service.create_user("homura@messenger.test", "homura", "MadokaMadoka").await.unwrap();

        let token = service.issue_token("homura@messenger.test", "wrong password").await;
        assert!(matches!(token, Err(AppError::Unauthenticated(AuthError::InvalidCredentials))));

        let wrong_password = service.get_user_by_email("homura@messenger.test", "wrong password").await;
        let wrong_email = service.get_user_by_email("madoka@messenger.test", "MadokaMadoka").await;
        assert_eq!(wrong_password.unwrap_err().to_string(), wrong_email.unwrap_err().to_string());
    }

    #[tokio::test]
    async fn profile_is_enriched() {
        let service = service();
        let homura = service.create_user("homura@messenger.test", "homura", "MadokaMadoka").await.unwrap();
        let madoka = service.create_user("madoka@messenger.test", "madoka", "HomuraHomura").await.unwrap();
        service
            .store
            .photos
            .lock()
            .unwrap()
            .push((homura, "/photos/homura.png".to_string()));
        service.create_contact(homura, madoka).await.unwrap();

        let profile = service.get_user_by_email("homura@messenger.test", "MadokaMadoka").await.unwrap();
        assert_eq!(profile.user.id, homura);
        assert_eq!(profile.image_urls, vec!["/photos/homura.png"]);
        assert_eq!(profile.contacts.len(), 1);
        assert_eq!(profile.contacts[0].id, madoka);

        let profile = service.get_user_by_id(madoka).await.unwrap();
        assert_eq!(profile.contacts[0].id, homura);
        assert!(profile.image_urls.is_empty());

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["username"], "madoka");
        assert!(json.get("password").is_none());

        assert!(matches!(service.get_user_by_id(404).await, Err(AppError::NotFound("user"))));
        assert_eq!(service.get_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn self_contact_is_rejected() {
        let service = service();
        let id = service.create_user("homura@messenger.test", "homura", "MadokaMadoka").await.unwrap();
        let result = service.create_contact(id, id).await;
        assert!(matches!(result, Err(AppError::ValidationFail(_))));
        assert!(service.store.contacts.lock().unwrap().is_empty());
    }
}
