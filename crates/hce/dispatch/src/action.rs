//! Side effects requested by the dispatch state machines.

use std::fmt;
use std::time::Duration;

use hce_types::{Aid, Category, HandlerRef};
use serde::{Deserialize, Serialize};

use crate::event::{BindPurpose, ChannelId};
use crate::polling::PollingFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationReason {
    /// The field went away.
    LinkLoss,
    /// Another AID was selected in the same session.
    Deselected,
}

impl fmt::Display for DeactivationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeactivationReason::LinkLoss => f.write_str("link-loss"),
            DeactivationReason::Deselected => f.write_str("deselected"),
        }
    }
}

/// Message delivered to a handler over its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum HandlerMessage {
    Command {
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
    Deactivated { reason: DeactivationReason },
    PollingFrames { frames: Vec<PollingFrame> },
}

/// What the caller must do after an event was handled.
///
/// Actions are ordered; executing them in order reproduces the transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DispatchAction {
    /// Send a response frame to the reader.
    Reply {
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
    Bind {
        handler: HandlerRef,
        purpose: BindPurpose,
    },
    Unbind {
        handler: HandlerRef,
        purpose: BindPurpose,
    },
    Send {
        channel: ChannelId,
        handler: HandlerRef,
        message: HandlerMessage,
    },
    /// Ask the user to unlock and tap again.
    PromptUnlock {
        handler: HandlerRef,
        category: Category,
    },
    /// Ask the user to pick among several handlers.
    PromptDisambiguation {
        candidates: Vec<HandlerRef>,
        failed: Option<HandlerRef>,
        category: Category,
    },
    /// A reader selected an AID nobody registered.
    ReportUnroutableAid { aid: Aid },
    /// Let the next transaction through while in observe mode.
    AllowOneTransaction,
    ArmFieldOffTimer { delay: Duration },
    CancelFieldOffTimer,
}

impl DispatchAction {
    pub fn reply(data: impl Into<Vec<u8>>) -> Self {
        DispatchAction::Reply { data: data.into() }
    }

    pub fn command(channel: ChannelId, handler: HandlerRef, data: impl Into<Vec<u8>>) -> Self {
        DispatchAction::Send {
            channel,
            handler,
            message: HandlerMessage::Command { data: data.into() },
        }
    }

    pub fn deactivate(channel: ChannelId, handler: HandlerRef, reason: DeactivationReason) -> Self {
        DispatchAction::Send {
            channel,
            handler,
            message: HandlerMessage::Deactivated { reason },
        }
    }
}
