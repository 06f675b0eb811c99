// 文件持久化对话仓储实现
//
// 使用 JSON 文件存储对话聚合（含完整消息历史）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::modules::chat::domain::{Chat, ChatId};
use crate::modules::chat::ports::{ChatRepository, RepositoryError};

const CHATS_FILE_NAME: &str = "chats.json";

/// 持久化数据结构
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ChatStore {
    chats: BTreeMap<ChatId, Chat>,
}

/// 文件持久化对话仓储
///
/// 写锁覆盖整个“写文件 + 替换内存”过程。修改先作用在副本上，
/// 文件写入成功后才替换内存状态；写入失败或 future 被丢弃时内存保持原样
pub struct FileChatRepository {
    store: RwLock<ChatStore>,
    file_path: PathBuf,
}

impl FileChatRepository {
    /// 创建新的文件对话仓储
    ///
    /// # Arguments
    /// * `data_dir` - 数据目录路径
    pub async fn new(data_dir: PathBuf) -> Result<Self, RepositoryError> {
        let file_path = data_dir.join(CHATS_FILE_NAME);

        fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        let store = match fs::read_to_string(&file_path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| RepositoryError::SerializationError(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ChatStore::default(),
            Err(e) => return Err(RepositoryError::DatabaseError(e.to_string())),
        };

        debug!(
            "Loaded {} chats from {}",
            store.chats.len(),
            file_path.display()
        );

        Ok(Self {
            store: RwLock::new(store),
            file_path,
        })
    }

    /// 将数据持久化到文件（先写临时文件再重命名）
    async fn persist(&self, store: &ChatStore) -> Result<(), RepositoryError> {
        let content = serde_json::to_string_pretty(store)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;

        let tmp_path = self.file_path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;
        fs::rename(&tmp_path, &self.file_path)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ChatRepository for FileChatRepository {
    async fn find_by_id(&self, id: &ChatId) -> Result<Chat, RepositoryError> {
        let store = self.store.read().await;
        store
            .chats
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("chat {}", id)))
    }

    async fn create(&self, chat: &Chat) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if store.chats.contains_key(chat.id()) {
            return Err(RepositoryError::Conflict(format!(
                "chat {} already exists",
                chat.id()
            )));
        }

        let mut candidate = store.clone();
        candidate.chats.insert(chat.id().clone(), chat.clone());
        if let Err(e) = self.persist(&candidate).await {
            warn!("Failed to persist new chat {}: {}", chat.id(), e);
            return Err(e);
        }

        *store = candidate;
        Ok(())
    }

    async fn update(&self, chat: &Chat) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if !store.chats.contains_key(chat.id()) {
            return Err(RepositoryError::NotFound(format!("chat {}", chat.id())));
        }

        let mut candidate = store.clone();
        candidate.chats.insert(chat.id().clone(), chat.clone());
        if let Err(e) = self.persist(&candidate).await {
            warn!("Failed to persist chat {}: {}", chat.id(), e);
            return Err(e);
        }

        *store = candidate;
        Ok(())
    }
}
