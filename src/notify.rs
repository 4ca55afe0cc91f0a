use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Alert,
}

/// Discrete event for the notification-banner boundary. `duration_ms` of
/// `None` means the banner is persistent until dismissed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub duration_ms: Option<u64>,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: &str, message: String) -> Self {
        Notification {
            title: title.to_string(),
            message,
            kind,
            duration_ms: None,
        }
    }

    pub fn info(title: &str, message: String) -> Self {
        Notification::new(NotificationKind::Info, title, message)
    }

    pub fn success(title: &str, message: String) -> Self {
        Notification::new(NotificationKind::Success, title, message)
    }

    pub fn alert(title: &str, message: String) -> Self {
        Notification::new(NotificationKind::Alert, title, message)
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

pub type NotificationSender = mpsc::UnboundedSender<Notification>;

pub fn channel() -> (NotificationSender, mpsc::UnboundedReceiver<Notification>) {
    mpsc::unbounded_channel()
}

/// Stand-in for the banner UI: logs every notification until the sender side
/// is dropped.
pub fn spawn_logger(mut rx: mpsc::UnboundedReceiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            match notification.kind {
                NotificationKind::Alert => {
                    log::warn!("[{}] {}", notification.title, notification.message)
                }
                _ => log::info!("[{}] {}", notification.title, notification.message),
            }
        }
    })
}
