use chrono::naive::NaiveDateTime;
use postgres_types::FromSql;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use crate::database::Querist;
use crate::error::{AppError, StorageContext};

#[derive(Debug, Serialize, Deserialize, FromSql, Clone)]
#[serde(rename_all = "camelCase")]
#[postgres(name = "users")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    #[serde(skip)]
    pub password: String,
    #[serde(with = "crate::date_format")]
    pub joined: NaiveDateTime,
}

impl User {
    /// `password` must already be hashed.
    pub async fn create<T: Querist>(db: &mut T, email: &str, username: &str, password: &str) -> Result<User, AppError> {
        let row = db
            .query_one(include_str!("sql/create.sql"), &[&email, &username, &password])
            .await
            .context("creating a user")?;
        Ok(row.ok_or(AppError::AlreadyExists("user"))?.get(0))
    }

    pub async fn get_by_id<T: Querist>(db: &mut T, id: i64) -> Result<Option<User>, AppError> {
        let row = db
            .query_one(include_str!("sql/get_by_id.sql"), &[&id])
            .await
            .context("fetching a user by id")?;
        Ok(row.map(|row| row.get(0)))
    }

    pub async fn login<T: Querist>(db: &mut T, email: &str, password: &str) -> Result<Option<User>, AppError> {
        let row = db
            .query_one(include_str!("sql/login.sql"), &[&email, &password])
            .await
            .context("fetching a user by credentials")?;
        Ok(row.map(|row| row.get(0)))
    }
}

/// The public face of a user, as listed in contact lists and the user directory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: i64,
    pub username: String,
    pub email: String,
}

impl Contact {
    fn from_row(row: Row) -> Contact {
        Contact {
            id: row.get(0),
            username: row.get(1),
            email: row.get(2),
        }
    }

    pub async fn all<T: Querist>(db: &mut T) -> Result<Vec<Contact>, AppError> {
        let rows = db
            .query(include_str!("sql/all_contacts.sql"), &[])
            .await
            .context("listing users")?;
        Ok(rows.into_iter().map(Contact::from_row).collect())
    }

    pub async fn get_by_user<T: Querist>(db: &mut T, user_id: i64) -> Result<Vec<Contact>, AppError> {
        let rows = db
            .query(include_str!("sql/contacts_of_user.sql"), &[&user_id])
            .await
            .context("fetching contacts")?;
        Ok(rows.into_iter().map(Contact::from_row).collect())
    }

    /// Records the contact in both directions; adding an existing pair is a no-op.
    pub async fn add<T: Querist>(db: &mut T, user_id: i64, contact_id: i64) -> Result<(), AppError> {
        db.execute(include_str!("sql/add_contact.sql"), &[&user_id, &contact_id])
            .await
            .context("creating a contact")?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, FromSql, Clone)]
#[serde(rename_all = "camelCase")]
#[postgres(name = "user_photos")]
pub struct UserPhoto {
    pub id: i64,
    pub user_id: i64,
    pub url_path: String,
}

impl UserPhoto {
    #[cfg(test)]
    pub async fn create<T: Querist>(db: &mut T, user_id: i64, url_path: &str) -> Result<UserPhoto, AppError> {
        let row = db
            .query_one(include_str!("sql/add_photo.sql"), &[&user_id, &url_path])
            .await
            .context("adding a user photo")?;
        row.map(|row| row.get(0))
            .ok_or_else(|| unexpected!("the database returned empty result"))
    }

    pub async fn urls_by_user<T: Querist>(db: &mut T, user_id: i64) -> Result<Vec<String>, AppError> {
        let rows = db
            .query(include_str!("sql/photo_urls.sql"), &[&user_id])
            .await
            .context("fetching user photos")?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}

#[cfg(test)]
pub async fn create_test_user<T: Querist>(db: &mut T, username: &str) -> User {
    let email = format!("{}@messenger.test", username);
    User::create(db, &email, username, "0123456789abcdef").await.unwrap()
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database at DATABASE_URL"]
async fn user_test() -> Result<(), AppError> {
    use crate::database::test_client;

    let mut client = test_client().await;
    let mut trans = client.transaction().await?;
    let db = &mut trans;
    let email = "homura@messenger.test";
    let username = "homura";
    let password = "5f4dcc3b5aa765d61d8327deb882cf99";
    let new_user = User::create(db, email, username, password).await?;
    let user = User::get_by_id(db, new_user.id).await?.unwrap();
    assert_eq!(user.email, email);
    assert_eq!(user.password, password);

    let user = User::login(db, email, password).await?.unwrap();
    assert_eq!(user.id, new_user.id);
    assert!(User::login(db, email, "wrong").await?.is_none());
    assert!(User::login(db, "madoka@messenger.test", password).await?.is_none());

    let duplicate = User::create(db, email, "homura2", password).await;
    assert!(matches!(duplicate, Err(AppError::AlreadyExists("user"))));

    UserPhoto::create(db, user.id, "/photos/homura-1.png").await?;
    UserPhoto::create(db, user.id, "/photos/homura-2.png").await?;
    let urls = UserPhoto::urls_by_user(db, user.id).await?;
    assert_eq!(urls, vec!["/photos/homura-1.png", "/photos/homura-2.png"]);

    let all = Contact::all(db).await?;
    assert!(all.iter().any(|contact| contact.id == user.id && contact.username == username));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database at DATABASE_URL"]
async fn contact_test() -> Result<(), AppError> {
    use crate::database::test_client;

    let mut client = test_client().await;
    let mut trans = client.transaction().await?;
    let db = &mut trans;
    let alice = create_test_user(db, "contact_alice").await;
    let bob = create_test_user(db, "contact_bob").await;
    let carol = create_test_user(db, "contact_carol").await;

    Contact::add(db, alice.id, bob.id).await?;
    // adding the same pair again, from either side, changes nothing
    Contact::add(db, alice.id, bob.id).await?;
    Contact::add(db, bob.id, alice.id).await?;

    let of_alice = Contact::get_by_user(db, alice.id).await?;
    assert_eq!(of_alice.len(), 1);
    assert_eq!(of_alice[0].id, bob.id);
    let of_bob = Contact::get_by_user(db, bob.id).await?;
    assert_eq!(of_bob.len(), 1);
    assert_eq!(of_bob[0].id, alice.id);
    assert!(Contact::get_by_user(db, carol.id).await?.is_empty());
    Ok(())
}
