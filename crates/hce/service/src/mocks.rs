//! Mock collaborators for testing.

use std::sync::Arc;

use hce_dispatch::{BindPurpose, ChannelId, DeviceState, HandlerMessage};
use hce_types::{Aid, Category, HandlerRef};
use parking_lot::Mutex;

use crate::collaborators::{
    DeviceStateProvider, DisambiguationUi, EngineListener, HandlerTransport, ReaderLink,
};
use crate::service::Collaborators;

/// A call received by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Bind(HandlerRef, BindPurpose),
    Unbind(HandlerRef, BindPurpose),
    Send(ChannelId, HandlerRef, HandlerMessage),
}

/// Records every transport call in order.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn sent_to(&self, handler: &HandlerRef) -> Vec<HandlerMessage> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Send(_, h, message) if h == handler => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn binds(&self) -> Vec<(HandlerRef, BindPurpose)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Bind(h, purpose) => Some((h.clone(), *purpose)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl HandlerTransport for RecordingTransport {
    fn bind(&self, handler: &HandlerRef, purpose: BindPurpose) {
        self.calls
            .lock()
            .push(TransportCall::Bind(handler.clone(), purpose));
    }

    fn unbind(&self, handler: &HandlerRef, purpose: BindPurpose) {
        self.calls
            .lock()
            .push(TransportCall::Unbind(handler.clone(), purpose));
    }

    fn send(&self, channel: ChannelId, handler: &HandlerRef, message: &HandlerMessage) {
        self.calls
            .lock()
            .push(TransportCall::Send(channel, handler.clone(), message.clone()));
    }
}

/// Records frames sent to the reader.
#[derive(Debug, Default)]
pub struct RecordingReader {
    replies: Mutex<Vec<Vec<u8>>>,
    allowed: Mutex<usize>,
}

impl RecordingReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies(&self) -> Vec<Vec<u8>> {
        self.replies.lock().clone()
    }

    pub fn last_reply(&self) -> Option<Vec<u8>> {
        self.replies.lock().last().cloned()
    }

    pub fn allowed_transactions(&self) -> usize {
        *self.allowed.lock()
    }
}

impl ReaderLink for RecordingReader {
    fn send_to_reader(&self, data: &[u8]) {
        self.replies.lock().push(data.to_vec());
    }

    fn allow_one_transaction(&self) {
        *self.allowed.lock() += 1;
    }
}

/// A prompt shown through [`RecordingUi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Disambiguation {
        candidates: Vec<HandlerRef>,
        failed: Option<HandlerRef>,
        category: Category,
    },
    Unlock {
        handler: HandlerRef,
        category: Category,
    },
}

#[derive(Debug, Default)]
pub struct RecordingUi {
    prompts: Mutex<Vec<Prompt>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().clone()
    }
}

impl DisambiguationUi for RecordingUi {
    fn prompt(&self, candidates: &[HandlerRef], failed: Option<&HandlerRef>, category: Category) {
        self.prompts.lock().push(Prompt::Disambiguation {
            candidates: candidates.to_vec(),
            failed: failed.cloned(),
            category,
        });
    }

    fn prompt_unlock(&self, handler: &HandlerRef, category: Category) {
        self.prompts.lock().push(Prompt::Unlock {
            handler: handler.clone(),
            category,
        });
    }
}

/// Device state that tests can flip.
#[derive(Debug, Default)]
pub struct FixedDeviceState {
    state: Mutex<DeviceState>,
}

impl FixedDeviceState {
    pub fn new(state: DeviceState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set(&self, state: DeviceState) {
        *self.state.lock() = state;
    }
}

impl DeviceStateProvider for FixedDeviceState {
    fn device_state(&self) -> DeviceState {
        *self.state.lock()
    }
}

#[derive(Debug, Default)]
pub struct RecordingListener {
    overflows: Mutex<Vec<(usize, usize)>>,
    unroutable: Mutex<Vec<Aid>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overflows(&self) -> Vec<(usize, usize)> {
        self.overflows.lock().clone()
    }

    pub fn unroutable(&self) -> Vec<Aid> {
        self.unroutable.lock().clone()
    }
}

impl EngineListener for RecordingListener {
    fn on_routing_overflow(&self, required: usize, capacity: usize) {
        self.overflows.lock().push((required, capacity));
    }

    fn on_unroutable_aid(&self, aid: &Aid) {
        self.unroutable.lock().push(aid.clone());
    }
}

/// Every recording collaborator, kept so tests can inspect them.
#[derive(Clone, Default)]
pub struct MockCollaborators {
    pub transport: Arc<RecordingTransport>,
    pub reader: Arc<RecordingReader>,
    pub ui: Arc<RecordingUi>,
    pub device: Arc<FixedDeviceState>,
    pub listener: Arc<RecordingListener>,
}

impl MockCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transport: self.transport.clone(),
            reader: self.reader.clone(),
            ui: self.ui.clone(),
            device: self.device.clone(),
            listener: self.listener.clone(),
        }
    }
}
