//! Push notification display and click routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::NotificationConfig;

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

/// Optional fields a push message may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub url: String,
    pub date_of_arrival: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickOutcome {
    pub close: bool,
    pub open_url: Option<String>,
}

pub struct NotificationRelay {
    config: NotificationConfig,
}

impl NotificationRelay {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    /// Build the notification for a push message. JSON payloads override
    /// the defaults field by field; any other payload becomes the body.
    pub fn on_push(&self, payload: Option<&[u8]>) -> Notification {
        let parsed = match payload {
            None | Some([]) => PushPayload::default(),
            Some(bytes) => serde_json::from_slice::<PushPayload>(bytes).unwrap_or_else(|_| {
                debug!("Push payload is not JSON, using it as body text");
                PushPayload {
                    body: Some(String::from_utf8_lossy(bytes).into_owned()),
                    ..PushPayload::default()
                }
            }),
        };

        Notification {
            title: parsed.title.unwrap_or_else(|| self.config.default_title.clone()),
            body: parsed.body.unwrap_or_else(|| self.config.default_body.clone()),
            icon: self.config.icon.clone(),
            badge: self.config.badge.clone(),
            vibrate: self.config.vibrate.clone(),
            data: NotificationData {
                url: parsed.url.unwrap_or_else(|| self.config.default_url.clone()),
                date_of_arrival: Utc::now(),
            },
            actions: vec![
                NotificationAction {
                    action: ACTION_VIEW.to_string(),
                    title: "View Details".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
        }
    }

    /// Route a click. The notification always closes; `view` and a plain
    /// body click open the notification's URL.
    pub fn on_click(&self, action: Option<&str>, data: Option<&NotificationData>) -> ClickOutcome {
        let target = || {
            data.map(|d| d.url.clone())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "/".to_string())
        };
        let open_url = match action {
            Some(ACTION_VIEW) | None | Some("") => Some(target()),
            Some(ACTION_DISMISS) => None,
            Some(other) => {
                debug!(action = other, "Ignoring unknown notification action");
                None
            }
        };
        ClickOutcome {
            close: true,
            open_url,
        }
    }
}
