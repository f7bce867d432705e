//! Automatic replies for application message handlers

use crate::hub_proxy::HubProxy;
use async_trait::async_trait;
use samp_core::{Message, Response, Result, Struct};
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether a handler receives notifications or calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Notification,
    Call,
}

/// A message delivered to a client callback
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub private_key: String,
    pub sender_id: String,
    /// Present for calls, absent for notifications
    pub msg_id: Option<String>,
    pub message: Message,
}

impl ReceivedMessage {
    pub fn notification(private_key: impl Into<String>, sender_id: impl Into<String>, message: Message) -> Self {
        Self {
            private_key: private_key.into(),
            sender_id: sender_id.into(),
            msg_id: None,
            message,
        }
    }

    pub fn call(
        private_key: impl Into<String>,
        sender_id: impl Into<String>,
        msg_id: impl Into<String>,
        message: Message,
    ) -> Self {
        Self {
            msg_id: Some(msg_id.into()),
            ..Self::notification(private_key, sender_id, message)
        }
    }
}

/// Application callback for received messages
///
/// `Ok` carries the result map for a call reply, `Err` the error text.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, received: &ReceivedMessage) -> std::result::Result<Option<Struct>, String>;
}

/// Sends replies back to the hub
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_reply(&self, private_key: &str, msg_id: &str, response: Response) -> Result<()>;
}

#[async_trait]
impl ReplySender for HubProxy {
    async fn send_reply(&self, private_key: &str, msg_id: &str, response: Response) -> Result<()> {
        self.reply(private_key, msg_id, response).await
    }
}

#[async_trait]
impl<T: ReplySender + ?Sized> ReplySender for Arc<T> {
    async fn send_reply(&self, private_key: &str, msg_id: &str, response: Response) -> Result<()> {
        (**self).send_reply(private_key, msg_id, response).await
    }
}

/// Handler wrapper that replies to calls on the handler's behalf
pub struct AutoReply<H, S> {
    handler: H,
    sender: S,
    kind: HandlerKind,
}

impl<H, S> AutoReply<H, S> {
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }
}

/// Wrap `handler` so that calls are answered through `sender`
pub fn with_auto_reply<H, S>(handler: H, sender: S, kind: HandlerKind) -> AutoReply<H, S>
where
    H: MessageHandler,
    S: ReplySender,
{
    AutoReply {
        handler,
        sender,
        kind,
    }
}

#[async_trait]
impl<H, S> MessageHandler for AutoReply<H, S>
where
    H: MessageHandler,
    S: ReplySender,
{
    async fn handle(&self, received: &ReceivedMessage) -> std::result::Result<Option<Struct>, String> {
        let outcome = self.handler.handle(received).await;

        let msg_id = match (self.kind, &received.msg_id) {
            (HandlerKind::Call, Some(msg_id)) => msg_id,
            _ => return outcome,
        };

        let response = match &outcome {
            Ok(result) => Response::ok(result.clone().unwrap_or_default()),
            Err(errortxt) => Response::error(errortxt.clone()),
        };
        debug!(
            "Replying {} to {} from {}",
            response.status, msg_id, received.sender_id
        );
        if let Err(e) = self
            .sender
            .send_reply(&received.private_key, msg_id, response)
            .await
        {
            warn!("Failed to send reply to {}: {}", msg_id, e);
        }

        outcome
    }
}
