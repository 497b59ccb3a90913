//! Tiered facility notifications and operational alerts.

mod channel;
mod dispatcher;
mod message;

pub use channel::{
    ChannelBindings, LoggingNotificationChannel, NotificationChannel, NotificationPayload,
};
#[cfg(test)]
pub use channel::MockNotificationChannel;
pub use dispatcher::{notification_id, DispatchFailure, DispatchReport, NotificationDispatcher};
pub use message::{facility_notification, failure_alert, success_summary, SuccessSummary};
