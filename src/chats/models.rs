use std::fmt;
use std::str::FromStr;

use chrono::naive::{NaiveDate, NaiveDateTime};
use postgres_types::FromSql;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use crate::database::Querist;
use crate::error::{AppError, StorageContext};
use crate::messages::Message;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Public,
    Private,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Public => "public",
            ChatKind::Private => "private",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<ChatKind, String> {
        match s {
            "public" => Ok(ChatKind::Public),
            "private" => Ok(ChatKind::Private),
            other => Err(format!("unknown chat type: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
}

impl Chat {
    fn from_row(row: Row) -> Result<Chat, AppError> {
        let type_name: String = row.get(1);
        let kind = type_name.parse().map_err(|e: String| unexpected!(e))?;
        Ok(Chat { id: row.get(0), kind })
    }

    pub async fn create<T: Querist>(db: &mut T, kind: ChatKind) -> Result<Chat, AppError> {
        let row = db
            .query_one(include_str!("sql/create_chat.sql"), &[&kind.as_str()])
            .await
            .context("creating a chat")?;
        Chat::from_row(row.ok_or_else(|| unexpected!("the database returned empty result"))?)
    }

    pub async fn get_by_id<T: Querist>(db: &mut T, id: i64) -> Result<Option<Chat>, AppError> {
        let row = db
            .query_one(include_str!("sql/get_chat.sql"), &[&id])
            .await
            .context("fetching a chat")?;
        row.map(Chat::from_row).transpose()
    }

    /// Active members of a chat and both participants of a private chat may post.
    pub async fn can_post<T: Querist>(db: &mut T, user_id: i64, chat_id: i64) -> Result<bool, AppError> {
        let row = db
            .query_one(include_str!("sql/can_post.sql"), &[&user_id, &chat_id])
            .await
            .context("checking chat permissions")?;
        Ok(row.map(|row| row.get(0)).unwrap_or(false))
    }
}

#[derive(Debug, Serialize, Deserialize, FromSql, Clone)]
#[serde(rename_all = "camelCase")]
#[postgres(name = "public_chats")]
pub struct PublicChat {
    pub id: i64,
    pub name: String,
    pub creation_date: NaiveDate,
    pub creator_user_id: i64,
    pub chat_id: i64,
}

/// A public chat as listed for one of its members.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: i64,
    pub chat_id: i64,
    pub name: String,
    pub creation_date: NaiveDate,
    pub creator_id: i64,
    pub creator_username: String,
    pub messages: Vec<Message>,
}

impl PublicChat {
    pub async fn create<T: Querist>(db: &mut T, chat_id: i64, creator_id: i64, name: &str) -> Result<PublicChat, AppError> {
        let row = db
            .query_one(include_str!("sql/create_public_chat.sql"), &[&name, &creator_id, &chat_id])
            .await
            .context("creating a public chat")?;
        row.map(|row| row.get(0))
            .ok_or_else(|| unexpected!("the database returned empty result"))
    }

    /// Creates the chat, its public chat row and the creator's membership.
    /// Run it inside a transaction.
    pub async fn open<T: Querist>(db: &mut T, creator_id: i64, name: &str) -> Result<(PublicChat, ChatMember), AppError> {
        let chat = Chat::create(db, ChatKind::Public).await?;
        let public = PublicChat::create(db, chat.id, creator_id, name).await?;
        let member = ChatMember::add_user(db, creator_id, chat.id).await?;
        Ok((public, member))
    }

    /// Every public chat the user has ever joined, listed once each.
    pub async fn get_by_user<T: Querist>(db: &mut T, user_id: i64) -> Result<Vec<ConversationSummary>, AppError> {
        let rows = db
            .query(include_str!("sql/public_chats_of_user.sql"), &[&user_id])
            .await
            .context("fetching public chats of a user")?;
        let summaries = rows
            .into_iter()
            .map(|row| ConversationSummary {
                id: row.get(0),
                name: row.get(1),
                creation_date: row.get(2),
                creator_id: row.get(3),
                creator_username: row.get(4),
                chat_id: row.get(5),
                messages: Vec::new(),
            })
            .collect();
        Ok(summaries)
    }
}

#[derive(Debug, Serialize, Deserialize, FromSql, Clone)]
#[serde(rename_all = "camelCase")]
#[postgres(name = "private_chats")]
pub struct PrivateChat {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
    pub chat_id: i64,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: i64,
    pub chat_id: i64,
    pub user1_id: i64,
    pub user1_username: String,
    pub user2_id: i64,
    pub user2_username: String,
}

impl PrivateChat {
    pub async fn create<T: Querist>(db: &mut T, chat_id: i64, user1_id: i64, user2_id: i64) -> Result<PrivateChat, AppError> {
        let row = db
            .query_one(include_str!("sql/create_private_chat.sql"), &[&user1_id, &user2_id, &chat_id])
            .await
            .context("creating a private chat")?;
        row.map(|row| row.get(0))
            .ok_or_else(|| unexpected!("the database returned empty result"))
    }

    /// Private chats have no membership rows; the two user columns are the participants.
    pub async fn open<T: Querist>(db: &mut T, user1_id: i64, user2_id: i64) -> Result<PrivateChat, AppError> {
        let chat = Chat::create(db, ChatKind::Private).await?;
        PrivateChat::create(db, chat.id, user1_id, user2_id).await
    }

    pub async fn get_by_user<T: Querist>(db: &mut T, user_id: i64) -> Result<Vec<ChatSummary>, AppError> {
        let rows = db
            .query(include_str!("sql/private_chats_of_user.sql"), &[&user_id])
            .await
            .context("fetching private chats of a user")?;
        let summaries = rows
            .into_iter()
            .map(|row| ChatSummary {
                id: row.get(0),
                user1_id: row.get(1),
                user1_username: row.get(2),
                user2_id: row.get(3),
                user2_username: row.get(4),
                chat_id: row.get(5),
            })
            .collect();
        Ok(summaries)
    }
}

#[derive(Debug, Serialize, Deserialize, FromSql, Clone)]
#[serde(rename_all = "camelCase")]
#[postgres(name = "chat_members")]
pub struct ChatMember {
    pub id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    #[serde(with = "crate::date_format")]
    pub join_date: NaiveDateTime,
    #[serde(with = "crate::date_format::option")]
    pub leave_date: Option<NaiveDateTime>,
}

impl ChatMember {
    pub async fn add_user<T: Querist>(db: &mut T, user_id: i64, chat_id: i64) -> Result<ChatMember, AppError> {
        let row = db
            .query_one(include_str!("sql/add_member.sql"), &[&user_id, &chat_id])
            .await
            .context("adding a chat member")?;
        Ok(row.ok_or(AppError::AlreadyExists("chat member"))?.get(0))
    }

    pub async fn leave<T: Querist>(db: &mut T, user_id: i64, chat_id: i64) -> Result<ChatMember, AppError> {
        let row = db
            .query_one(include_str!("sql/leave.sql"), &[&user_id, &chat_id])
            .await
            .context("leaving a chat")?;
        Ok(row.ok_or(AppError::NotFound("chat member"))?.get(0))
    }

    #[cfg(test)]
    pub async fn get_active<T: Querist>(db: &mut T, user_id: i64, chat_id: i64) -> Result<Option<ChatMember>, AppError> {
        let row = db
            .query_one(include_str!("sql/get_active_member.sql"), &[&user_id, &chat_id])
            .await
            .context("fetching a chat member")?;
        Ok(row.map(|row| row.get(0)))
    }

    pub async fn get_by_chat<T: Querist>(db: &mut T, chat_id: i64) -> Result<Vec<ChatMember>, AppError> {
        let rows = db
            .query(include_str!("sql/members_of_chat.sql"), &[&chat_id])
            .await
            .context("fetching chat members")?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}

#[derive(Debug, Serialize, Deserialize, FromSql, Clone)]
#[serde(rename_all = "camelCase")]
#[postgres(name = "chat_photos")]
pub struct ChatPhoto {
    pub id: i64,
    pub url_path: String,
    pub chat_id: i64,
}

impl ChatPhoto {
    pub async fn create<T: Querist>(db: &mut T, chat_id: i64, url_path: &str) -> Result<ChatPhoto, AppError> {
        let row = db
            .query_one(include_str!("sql/add_photo.sql"), &[&url_path, &chat_id])
            .await
            .context("adding a chat photo")?;
        row.map(|row| row.get(0))
            .ok_or_else(|| unexpected!("the database returned empty result"))
    }

    pub async fn get_by_chat<T: Querist>(db: &mut T, chat_id: i64) -> Result<Vec<ChatPhoto>, AppError> {
        let rows = db
            .query(include_str!("sql/photos_of_chat.sql"), &[&chat_id])
            .await
            .context("fetching chat photos")?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}

#[derive(Debug, Serialize, Deserialize, FromSql, Clone)]
#[serde(rename_all = "camelCase")]
#[postgres(name = "attachments")]
pub struct Attachment {
    pub id: i64,
    pub chat_id: i64,
    pub photo_id: i64,
}

impl Attachment {
    /// The photo has to belong to the same chat.
    pub async fn create<T: Querist>(db: &mut T, chat_id: i64, photo_id: i64) -> Result<Attachment, AppError> {
        let row = db
            .query_one(include_str!("sql/attach_photo.sql"), &[&chat_id, &photo_id])
            .await
            .context("attaching a photo")?;
        Ok(row.ok_or(AppError::NotFound("photo"))?.get(0))
    }
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database at DATABASE_URL"]
async fn chat_test() -> Result<(), AppError> {
    use crate::database::test_client;
    use crate::users::create_test_user;

    let mut client = test_client().await;
    let mut trans = client.transaction().await?;
    let db = &mut trans;
    let user = create_test_user(db, "chat_creator").await;

    let chat = Chat::create(db, ChatKind::Public).await?;
    assert_eq!(chat.kind, ChatKind::Public);
    let fetched = Chat::get_by_id(db, chat.id).await?.unwrap();
    assert_eq!(fetched, chat);
    assert!(Chat::get_by_id(db, -1).await?.is_none());

    let public = PublicChat::create(db, chat.id, user.id, "Walpurgis").await?;
    assert_eq!(public.chat_id, chat.id);
    assert!(!Chat::can_post(db, user.id, chat.id).await?);
    ChatMember::add_user(db, user.id, chat.id).await?;
    assert!(Chat::can_post(db, user.id, chat.id).await?);

    let photo = ChatPhoto::create(db, chat.id, "/photos/walpurgis.png").await?;
    let photos = ChatPhoto::get_by_chat(db, chat.id).await?;
    assert_eq!(photos.len(), 1);
    let attachment = Attachment::create(db, chat.id, photo.id).await?;
    assert_eq!(attachment.photo_id, photo.id);

    let other = Chat::create(db, ChatKind::Private).await?;
    let foreign = Attachment::create(db, other.id, photo.id).await;
    assert!(matches!(foreign, Err(AppError::NotFound("photo"))));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database at DATABASE_URL"]
async fn member_test() -> Result<(), AppError> {
    use crate::database::test_client;
    use crate::users::create_test_user;

    let mut client = test_client().await;
    let mut trans = client.transaction().await?;
    let db = &mut trans;
    let user = create_test_user(db, "member_user").await;
    let chat = Chat::create(db, ChatKind::Public).await?;

    let member = ChatMember::add_user(db, user.id, chat.id).await?;
    assert!(member.leave_date.is_none());
    let twice = ChatMember::add_user(db, user.id, chat.id).await;
    assert!(matches!(twice, Err(AppError::AlreadyExists("chat member"))));

    let left = ChatMember::leave(db, user.id, chat.id).await?;
    assert_eq!(left.id, member.id);
    assert!(left.leave_date.is_some());
    assert!(ChatMember::get_active(db, user.id, chat.id).await?.is_none());
    assert!(ChatMember::get_by_chat(db, chat.id).await?.is_empty());
    let again = ChatMember::leave(db, user.id, chat.id).await;
    assert!(matches!(again, Err(AppError::NotFound("chat member"))));

    let rejoined = ChatMember::add_user(db, user.id, chat.id).await?;
    assert_ne!(rejoined.id, member.id);
    assert_eq!(ChatMember::get_by_chat(db, chat.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database at DATABASE_URL"]
async fn conversation_test() -> Result<(), AppError> {
    use crate::database::test_client;
    use crate::users::create_test_user;

    let mut client = test_client().await;
    let mut trans = client.transaction().await?;
    let db = &mut trans;
    let homura = create_test_user(db, "conversation_homura").await;
    let madoka = create_test_user(db, "conversation_madoka").await;
    let sayaka = create_test_user(db, "conversation_sayaka").await;

    let (public, creator) = PublicChat::open(db, homura.id, "Mitakihara").await?;
    assert_eq!(creator.user_id, homura.id);
    let members = ChatMember::get_by_chat(db, public.chat_id).await?;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, homura.id);

    let (other, _) = PublicChat::open(db, sayaka.id, "Kamihama").await?;
    ChatMember::add_user(db, madoka.id, public.chat_id).await?;
    ChatMember::leave(db, madoka.id, public.chat_id).await?;
    ChatMember::add_user(db, madoka.id, public.chat_id).await?;

    // rejoining leaves two membership rows, the chat is still listed once
    let of_madoka = PublicChat::get_by_user(db, madoka.id).await?;
    assert_eq!(of_madoka.len(), 1);
    assert_eq!(of_madoka[0].chat_id, public.chat_id);
    assert_eq!(of_madoka[0].creator_id, homura.id);
    assert_eq!(of_madoka[0].creator_username, homura.username);
    assert!(of_madoka[0].messages.is_empty());
    let of_sayaka = PublicChat::get_by_user(db, sayaka.id).await?;
    assert_eq!(of_sayaka.len(), 1);
    assert_eq!(of_sayaka[0].chat_id, other.chat_id);

    let private = PrivateChat::open(db, homura.id, madoka.id).await?;
    assert!(ChatMember::get_by_chat(db, private.chat_id).await?.is_empty());
    assert_eq!(Chat::get_by_id(db, private.chat_id).await?.unwrap().kind, ChatKind::Private);
    assert!(Chat::can_post(db, madoka.id, private.chat_id).await?);
    assert!(!Chat::can_post(db, sayaka.id, private.chat_id).await?);

    for user in [&homura, &madoka] {
        let chats = PrivateChat::get_by_user(db, user.id).await?;
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].user1_username, homura.username);
        assert_eq!(chats[0].user2_username, madoka.username);
    }
    assert!(PrivateChat::get_by_user(db, sayaka.id).await?.is_empty());
    Ok(())
}

#[test]
fn chat_kind_test() {
    assert_eq!("public".parse::<ChatKind>(), Ok(ChatKind::Public));
    assert_eq!("private".parse::<ChatKind>(), Ok(ChatKind::Private));
    assert!("group".parse::<ChatKind>().is_err());
    assert_eq!(ChatKind::Private.to_string(), "private");
    assert_eq!(serde_json::to_value(ChatKind::Public).unwrap(), "public");
}
