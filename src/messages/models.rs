use chrono::naive::NaiveDateTime;
use postgres_types::FromSql;
use serde::{Deserialize, Serialize};

use crate::database::Querist;
use crate::error::{AppError, StorageContext};
use crate::validators::MESSAGE;

#[derive(Debug, Serialize, Deserialize, FromSql, Clone)]
#[serde(rename_all = "camelCase")]
#[postgres(name = "messages")]
pub struct Message {
    pub id: i64,
    pub content: String,
    pub user_id: i64,
    pub chat_id: i64,
    #[serde(with = "crate::date_format")]
    pub send_time: NaiveDateTime,
}

impl Message {
    /// Callers check that the sender may post to the chat.
    pub async fn create<T: Querist>(db: &mut T, user_id: i64, chat_id: i64, content: &str) -> Result<Message, AppError> {
        MESSAGE.run(content)?;
        let row = db
            .query_one(include_str!("sql/create.sql"), &[&content, &user_id, &chat_id])
            .await
            .context("creating a message")?;
        row.map(|row| row.get(0))
            .ok_or_else(|| unexpected!("the database returned empty result"))
    }

    /// Oldest first; messages sent at the same instant keep insertion order.
    pub async fn get_by_chat<T: Querist>(db: &mut T, chat_id: i64) -> Result<Vec<Message>, AppError> {
        let rows = db
            .query(include_str!("sql/get_by_chat.sql"), &[&chat_id])
            .await
            .context("fetching chat messages")?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database at DATABASE_URL"]
async fn message_test() -> Result<(), AppError> {
    use crate::chats::{Chat, ChatKind};
    use crate::database::test_client;
    use crate::users::create_test_user;

    let mut client = test_client().await;
    let mut trans = client.transaction().await?;
    let db = &mut trans;
    let user = create_test_user(db, "message_sender").await;
    let chat = Chat::create(db, ChatKind::Public).await?;
    let other_chat = Chat::create(db, ChatKind::Public).await?;

    let first = Message::create(db, user.id, chat.id, "hello, world").await?;
    let second = Message::create(db, user.id, chat.id, "hello again").await?;
    Message::create(db, user.id, other_chat.id, "somewhere else").await?;

    let messages = Message::get_by_chat(db, chat.id).await?;
    let ids: Vec<i64> = messages.iter().map(|message| message.id).collect();
    // same transaction, same send_time: the id breaks the tie
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(messages.iter().all(|message| message.chat_id == chat.id));

    let empty = Message::create(db, user.id, chat.id, "   ").await;
    assert!(matches!(empty, Err(AppError::ValidationFail(_))));
    Ok(())
}
