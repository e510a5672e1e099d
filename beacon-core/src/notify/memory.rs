//! In-memory notifier that records every call

use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::{ChannelPoster, DirectMessenger, EmailSender, ExternalCommenter};

/// One notification capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    DirectMessage,
    ChannelPost,
    ExternalComment,
    Email,
}

/// A call captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub capability: Capability,
    /// Handle, channel, URL or email address
    pub target: String,
    /// Email subject; `None` for the other capabilities
    pub subject: Option<String>,
    pub text: String,
}

/// Records every call and fails the capabilities it was told to fail.
///
/// Failed calls are recorded too, so tests can assert on attempts.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: Mutex<HashSet<Capability>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `capability` fail
    pub fn fail(&self, capability: Capability) {
        self.failing.lock().unwrap().insert(capability);
    }

    /// Snapshot of all calls so far, in order
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    /// Calls made to one capability
    pub fn sent_via(&self, capability: Capability) -> Vec<SentNotification> {
        self.sent()
            .into_iter()
            .filter(|n| n.capability == capability)
            .collect()
    }

    fn record(
        &self,
        capability: Capability,
        target: &str,
        subject: Option<&str>,
        text: &str,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(SentNotification {
            capability,
            target: target.to_string(),
            subject: subject.map(str::to_string),
            text: text.to_string(),
        });

        if self.failing.lock().unwrap().contains(&capability) {
            return Err(Error::Notification(format!(
                "{:?} failed for {}",
                capability, target
            )));
        }
        Ok(())
    }
}

impl DirectMessenger for RecordingNotifier {
    fn send_direct_message(&self, handle: &str, text: &str) -> Result<()> {
        self.record(Capability::DirectMessage, handle, None, text)
    }
}

impl ChannelPoster for RecordingNotifier {
    fn post_to_channel(&self, channel: &str, text: &str) -> Result<()> {
        self.record(Capability::ChannelPost, channel, None, text)
    }
}

impl ExternalCommenter for RecordingNotifier {
    fn comment_on_external_item(&self, url: &str, text: &str) -> Result<()> {
        self.record(Capability::ExternalComment, url, None, text)
    }
}

impl EmailSender for RecordingNotifier {
    fn send_email(&self, to: &str, subject: &str, _html: &str, text: &str) -> Result<()> {
        self.record(Capability::Email, to, Some(subject), text)
    }
}
