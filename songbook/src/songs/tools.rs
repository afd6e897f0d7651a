use std::sync::Arc;

use async_trait::async_trait;

use super::Song;
use crate::context::MigrationContext;
use crate::errors::SongResult;
use crate::registry::SongRegistry;

pub const ATTACHMENT_URL_INDEX: &str = "tools.attachment_url_index";

/// Trigram index speeding up attachment lookups by URL.
pub struct AttachmentUrlIndex;

#[async_trait]
impl Song for AttachmentUrlIndex {
    fn name(&self) -> &str {
        ATTACHMENT_URL_INDEX
    }

    fn description(&self) -> &str {
        "Create the pg_trgm index on ir_attachment.url"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        if ctx.catalog().ensure_attachment_url_index().await? {
            ctx.log_line("ir_attachment_url_trgm_index is present");
        } else {
            ctx.log_line("pg_trgm is not available, attachment url index skipped");
        }
        Ok(())
    }
}

pub fn register(registry: &mut SongRegistry) {
    registry.register(Arc::new(AttachmentUrlIndex));
}
