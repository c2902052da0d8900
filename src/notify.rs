use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::attendance::WARNING_THRESHOLD;
use crate::config::NotifierConfig;
use crate::service::WarningNotice;

/// Delivers approved warning notices.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, notice: &WarningNotice) -> anyhow::Result<()>;
}

/// Writes each message as a text file into an outbox directory, where a mail relay
/// picks it up.
pub struct OutboxNotifier {
    dir: PathBuf,
    sender: String,
}

impl OutboxNotifier {
    pub fn new(config: &NotifierConfig) -> Self {
        Self {
            dir: config.outbox_dir.clone(),
            sender: config.sender.clone(),
        }
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn dispatch(&self, notice: &WarningNotice) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create outbox {}", self.dir.display()))?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = self.dir.join(format!("{stamp}-{}.txt", notice.email_id));
        tokio::fs::write(&path, compose(&self.sender, notice))
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!(email_id = %notice.email_id, path = %path.display(), "warning queued");
        Ok(())
    }
}

pub fn compose(sender: &str, notice: &WarningNotice) -> String {
    format!(
        "From: {sender}\n\
         To: {to}\n\
         Subject: Low attendance warning\n\
         \n\
         Dear {name},\n\
         \n\
         Your attendance is {pct:.2}% ({attended} of {days} working days), which is below \
         the required {threshold:.0}%.\n\
         Please contact the course office if you have a medical reason for your absences.\n",
        to = notice.email_id,
        name = notice.student_name,
        pct = notice.attendance_percentage,
        attended = notice.classes_attended,
        days = notice.working_days_total,
        threshold = WARNING_THRESHOLD,
    )
}
