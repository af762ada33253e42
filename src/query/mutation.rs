//! Writes that keep the cache honest.
//!
//! Every successful write drops the cached entries of the written entity
//! family. Mounted façades additionally see the change through their feeds.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use talentgrid_types::{Application, ApplicationStatus, FeedPost, Message};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::backend::{DataSource, FetchError};
use crate::cache::{EntityKind, QueryCache};
use crate::clock::Clock;

use super::QueryContext;

#[derive(Clone)]
pub struct MutationService {
    cache: Arc<QueryCache>,
    source: Arc<dyn DataSource>,
    clock: Arc<dyn Clock>,
}

impl MutationService {
    pub fn new(ctx: &QueryContext) -> Self {
        Self {
            cache: Arc::clone(&ctx.cache),
            source: Arc::clone(&ctx.source),
            clock: Arc::clone(&ctx.clock),
        }
    }

    #[instrument(skip(self, row), fields(entity = %entity))]
    pub async fn insert(&self, entity: EntityKind, row: Value) -> Result<Value, FetchError> {
        let written = self.source.insert(entity.table(), row).await?;
        let removed = self.cache.invalidate_entity(entity);
        info!(removed, "Row inserted");
        Ok(written)
    }

    #[instrument(skip(self, patch), fields(entity = %entity, id = %id))]
    pub async fn update(
        &self,
        entity: EntityKind,
        id: Uuid,
        patch: Value,
    ) -> Result<Value, FetchError> {
        let written = self.source.update(entity.table(), id, patch).await?;
        let removed = self.cache.invalidate_entity(entity);
        info!(removed, "Row updated");
        Ok(written)
    }

    pub async fn apply_to_offer(
        &self,
        candidate_id: Uuid,
        offer_id: Uuid,
    ) -> Result<Application, FetchError> {
        let row = Application {
            id: Uuid::new_v4(),
            offer_id,
            candidate_id,
            status: ApplicationStatus::Pending,
            created_at: self.clock.now(),
        };
        self.insert_typed(EntityKind::Applications, &row).await
    }

    pub async fn set_application_status(
        &self,
        application_id: Uuid,
        status: ApplicationStatus,
    ) -> Result<Application, FetchError> {
        let written = self
            .update(
                EntityKind::Applications,
                application_id,
                json!({ "status": status }),
            )
            .await?;
        Ok(serde_json::from_value(written)?)
    }

    pub async fn send_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: impl Into<String>,
    ) -> Result<Message, FetchError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(FetchError::InvalidInput("message content is empty".into()));
        }
        let row = Message {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content,
            read: false,
            created_at: self.clock.now(),
        };
        self.insert_typed(EntityKind::Messages, &row).await
    }

    pub async fn publish_post(
        &self,
        author_id: Uuid,
        content: impl Into<String>,
        industry: Option<String>,
    ) -> Result<FeedPost, FetchError> {
        let row = FeedPost {
            id: Uuid::new_v4(),
            author_id,
            content: content.into(),
            industry,
            likes_count: 0,
            comments_count: 0,
            reposts_count: 0,
            created_at: self.clock.now(),
        };
        self.insert_typed(EntityKind::Feed, &row).await
    }

    async fn insert_typed<T>(&self, entity: EntityKind, row: &T) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
    {
        let written = self.insert(entity, serde_json::to_value(row)?).await?;
        Ok(serde_json::from_value(written)?)
    }
}
