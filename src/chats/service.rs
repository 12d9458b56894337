use async_trait::async_trait;
use tokio_postgres::error::SqlState;

use super::models::{Attachment, Chat, ChatKind, ChatMember, ChatPhoto, ChatSummary, ConversationSummary, PrivateChat, PublicChat};
use crate::database::Pool;
use crate::error::{AppError, StorageContext};
use crate::messages::Message;
use crate::utils::merge_blank;
use crate::validators::{ValidationFailed, CHAT_NAME};

#[async_trait]
pub trait Chats: Send + Sync {
    async fn create_chat(&self, kind: ChatKind) -> Result<i64, AppError>;

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, AppError>;

    /// The creator becomes the first member.
    async fn create_public_chat(&self, creator_id: i64, name: &str) -> Result<i64, AppError>;

    async fn create_private_chat(&self, user1_id: i64, user2_id: i64) -> Result<i64, AppError>;

    async fn create_chat_member(&self, user_id: i64, chat_id: i64) -> Result<ChatMember, AppError>;

    async fn leave_chat(&self, user_id: i64, chat_id: i64) -> Result<ChatMember, AppError>;

    async fn get_chat_members(&self, chat_id: i64) -> Result<Vec<ChatMember>, AppError>;

    async fn get_user_public_chats(&self, user_id: i64) -> Result<Vec<ConversationSummary>, AppError>;

    async fn get_user_private_chats(&self, user_id: i64) -> Result<Vec<ChatSummary>, AppError>;

    async fn get_chat_messages(&self, chat_id: i64) -> Result<Vec<Message>, AppError>;

    async fn can_post(&self, user_id: i64, chat_id: i64) -> Result<bool, AppError>;

    async fn create_message(&self, user_id: i64, chat_id: i64, content: &str) -> Result<Message, AppError>;

    async fn add_chat_photo(&self, chat_id: i64, url_path: &str) -> Result<ChatPhoto, AppError>;

    async fn get_chat_photos(&self, chat_id: i64) -> Result<Vec<ChatPhoto>, AppError>;

    async fn attach_photo(&self, chat_id: i64, photo_id: i64) -> Result<Attachment, AppError>;
}

// Chat ids are checked before writing, so a broken foreign key here names a user.
fn missing_user(e: AppError) -> AppError {
    let foreign_key = matches!(
        &e,
        AppError::Storage { source, .. } if source.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION)
    );
    if foreign_key {
        AppError::NotFound("user")
    } else {
        e
    }
}

pub struct ChatService {
    pool: Pool,
}

impl ChatService {
    pub fn new(pool: Pool) -> ChatService {
        ChatService { pool }
    }
}

#[async_trait]
impl Chats for ChatService {
    async fn create_chat(&self, kind: ChatKind) -> Result<i64, AppError> {
        let mut conn = self.pool.connect().await?;
        let chat = Chat::create(&mut *conn, kind).await?;
        Ok(chat.id)
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, AppError> {
        let mut conn = self.pool.connect().await?;
        Chat::get_by_id(&mut *conn, chat_id).await?.ok_or(AppError::NotFound("chat"))
    }

    async fn create_public_chat(&self, creator_id: i64, name: &str) -> Result<i64, AppError> {
        let name = merge_blank(name);
        CHAT_NAME.run(&name)?;

        let mut conn = self.pool.connect().await?;
        let mut trans = conn.transaction().await?;
        let (public, _) = PublicChat::open(&mut trans, creator_id, &name)
            .await
            .map_err(missing_user)?;
        trans.commit().await.context("committing a public chat")?;
        log::info!("user {} created the public chat {} ({})", creator_id, public.chat_id, public.name);
        Ok(public.chat_id)
    }

    async fn create_private_chat(&self, user1_id: i64, user2_id: i64) -> Result<i64, AppError> {
        if user1_id == user2_id {
            return Err(ValidationFailed("A private chat needs two different users.").into());
        }
        let mut conn = self.pool.connect().await?;
        let mut trans = conn.transaction().await?;
        let private = PrivateChat::open(&mut trans, user1_id, user2_id)
            .await
            .map_err(missing_user)?;
        trans.commit().await.context("committing a private chat")?;
        log::info!("private chat {} was opened between {} and {}", private.chat_id, user1_id, user2_id);
        Ok(private.chat_id)
    }

    async fn create_chat_member(&self, user_id: i64, chat_id: i64) -> Result<ChatMember, AppError> {
        let mut conn = self.pool.connect().await?;
        let db = &mut *conn;
        let chat = Chat::get_by_id(db, chat_id).await?.ok_or(AppError::NotFound("chat"))?;
        if chat.kind == ChatKind::Private {
            return Err(AppError::NoPermission);
        }
        ChatMember::add_user(db, user_id, chat_id).await.map_err(missing_user)
    }

    async fn leave_chat(&self, user_id: i64, chat_id: i64) -> Result<ChatMember, AppError> {
        let mut conn = self.pool.connect().await?;
        ChatMember::leave(&mut *conn, user_id, chat_id).await
    }

    async fn get_chat_members(&self, chat_id: i64) -> Result<Vec<ChatMember>, AppError> {
        let mut conn = self.pool.connect().await?;
        ChatMember::get_by_chat(&mut *conn, chat_id).await
    }

    async fn get_user_public_chats(&self, user_id: i64) -> Result<Vec<ConversationSummary>, AppError> {
        let mut conn = self.pool.connect().await?;
        PublicChat::get_by_user(&mut *conn, user_id).await
    }

    async fn get_user_private_chats(&self, user_id: i64) -> Result<Vec<ChatSummary>, AppError> {
        let mut conn = self.pool.connect().await?;
        PrivateChat::get_by_user(&mut *conn, user_id).await
    }

    async fn get_chat_messages(&self, chat_id: i64) -> Result<Vec<Message>, AppError> {
        let mut conn = self.pool.connect().await?;
        Message::get_by_chat(&mut *conn, chat_id).await
    }

    async fn can_post(&self, user_id: i64, chat_id: i64) -> Result<bool, AppError> {
        let mut conn = self.pool.connect().await?;
        Chat::can_post(&mut *conn, user_id, chat_id).await
    }

    async fn create_message(&self, user_id: i64, chat_id: i64, content: &str) -> Result<Message, AppError> {
        let mut conn = self.pool.connect().await?;
        let db = &mut *conn;
        Chat::get_by_id(db, chat_id).await?.ok_or(AppError::NotFound("chat"))?;
        if !Chat::can_post(db, user_id, chat_id).await? {
            return Err(AppError::NoPermission);
        }
        Message::create(db, user_id, chat_id, content).await
    }

    async fn add_chat_photo(&self, chat_id: i64, url_path: &str) -> Result<ChatPhoto, AppError> {
        let url_path = url_path.trim();
        if url_path.is_empty() {
            return Err(ValidationFailed("Photo path shall not be empty.").into());
        }
        let mut conn = self.pool.connect().await?;
        let db = &mut *conn;
        Chat::get_by_id(db, chat_id).await?.ok_or(AppError::NotFound("chat"))?;
        ChatPhoto::create(db, chat_id, url_path).await
    }

    async fn get_chat_photos(&self, chat_id: i64) -> Result<Vec<ChatPhoto>, AppError> {
        let mut conn = self.pool.connect().await?;
        ChatPhoto::get_by_chat(&mut *conn, chat_id).await
    }

    async fn attach_photo(&self, chat_id: i64, photo_id: i64) -> Result<Attachment, AppError> {
        let mut conn = self.pool.connect().await?;
        Attachment::create(&mut *conn, chat_id, photo_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{test_pool, PostgresFactory, Querist};
    use crate::users::create_test_user;
    use std::time::{SystemTime, UNIX_EPOCH};

    async fn committed_user(pool: &Pool, name: &str) -> i64 {
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let mut conn = pool.connect().await.unwrap();
        create_test_user(&mut *conn, &format!("{}_{}", name, stamp)).await.id
    }

    #[tokio::test]
    async fn invalid_chats_are_rejected_before_connecting() {
        // no connection is opened up front, and none is needed to reject these
        let factory = PostgresFactory::new("postgres://localhost/unused").unwrap();
        let service = ChatService::new(Pool::with_num(0, factory).await.unwrap());

        let with_oneself = service.create_private_chat(7, 7).await;
        assert!(matches!(with_oneself, Err(AppError::ValidationFail(_))));
        let blank_name = service.create_public_chat(7, " \n\t ").await;
        assert!(matches!(blank_name, Err(AppError::ValidationFail(_))));
        let no_path = service.add_chat_photo(7, "  ").await;
        assert!(matches!(no_path, Err(AppError::ValidationFail(_))));
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database at DATABASE_URL"]
    async fn failed_chat_creation_leaves_no_chat_row() {
        let pool = test_pool().await;
        let service = ChatService::new(pool.clone());
        let user = committed_user(&pool, "service_lonely").await;
        let mut conn = pool.connect().await.unwrap();
        let row = conn.query_one("SELECT coalesce(max(id), 0) FROM chats", &[]).await.unwrap();
        let before: i64 = row.unwrap().get(0);

        let public = service.create_public_chat(-1, "Nowhere").await;
        assert!(matches!(public, Err(AppError::NotFound("user"))));
        let private = service.create_private_chat(user, -1).await;
        assert!(matches!(private, Err(AppError::NotFound("user"))));

        let orphans = conn
            .query_one(
                "SELECT count(*) FROM chats c \
                 WHERE c.id > $1 \
                   AND NOT EXISTS(SELECT 1 FROM public_chats p WHERE p.chat_id = c.id) \
                   AND NOT EXISTS(SELECT 1 FROM private_chats p WHERE p.chat_id = c.id)",
                &[&before],
            )
            .await
            .unwrap();
        assert_eq!(orphans.unwrap().get::<_, i64>(0), 0);
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database at DATABASE_URL"]
    async fn chat_service_permissions() -> Result<(), AppError> {
        let pool = test_pool().await;
        let service = ChatService::new(pool.clone());
        let homura = committed_user(&pool, "service_homura").await;
        let madoka = committed_user(&pool, "service_madoka").await;
        let sayaka = committed_user(&pool, "service_sayaka").await;

        let public = service.create_public_chat(homura, "Mitakihara").await?;
        let members = service.get_chat_members(public).await?;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, homura);
        assert_eq!(service.get_chat(public).await?.kind, ChatKind::Public);

        let private = service.create_private_chat(homura, madoka).await?;
        assert!(service.get_chat_members(private).await?.is_empty());
        let join_private = service.create_chat_member(sayaka, private).await;
        assert!(matches!(join_private, Err(AppError::NoPermission)));

        let outsider = service.create_message(sayaka, public, "hello").await;
        assert!(matches!(outsider, Err(AppError::NoPermission)));
        let outsider = service.create_message(sayaka, private, "hello").await;
        assert!(matches!(outsider, Err(AppError::NoPermission)));
        service.create_message(madoka, private, "hello").await?;

        service.create_chat_member(sayaka, public).await?;
        let twice = service.create_chat_member(sayaka, public).await;
        assert!(matches!(twice, Err(AppError::AlreadyExists("chat member"))));
        let message = service.create_message(sayaka, public, "hello").await?;
        let messages = service.get_chat_messages(public).await?;
        assert_eq!(messages.last().map(|message| message.id), Some(message.id));

        service.leave_chat(sayaka, public).await?;
        let after_leaving = service.create_message(sayaka, public, "again").await;
        assert!(matches!(after_leaving, Err(AppError::NoPermission)));

        let no_user = service.create_chat_member(-1, public).await;
        assert!(matches!(no_user, Err(AppError::NotFound("user"))));
        let no_chat = service.create_chat_member(sayaka, -1).await;
        assert!(matches!(no_chat, Err(AppError::NotFound("chat"))));
        Ok(())
    }
}
