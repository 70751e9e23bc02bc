//! Talkback request bookkeeping.

use std::collections::BTreeMap;

use tracing::{debug, info};

use livecast_ipc::{TalkbackRequest, TalkbackState};
use livecast_transport::ControlMessage;

use crate::error::EngineError;
use crate::EngineResult;

/// What happened to an inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Added to the pending set; report it to the caller.
    Queued,

    /// Talkback is disabled; answer with the decline message.
    AutoDeclined(ControlMessage),

    /// Same id as a request that is still pending.
    Duplicate,
}

/// Pending requests and the active session of one broadcast.
///
/// Requests that arrive while a session is active stay pending and never
/// interrupt it. Ids are unique only among pending requests.
#[derive(Debug, Default)]
pub struct TalkbackChannel {
    enabled: bool,
    pending: BTreeMap<u32, TalkbackRequest>,
    active: Option<u32>,
}

impl TalkbackChannel {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn state(&self) -> TalkbackState {
        if self.active.is_some() {
            TalkbackState::Active
        } else if !self.pending.is_empty() {
            TalkbackState::Pending
        } else {
            TalkbackState::Idle
        }
    }

    pub fn active(&self) -> Option<u32> {
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Pending requests in id order.
    pub fn pending(&self) -> Vec<TalkbackRequest> {
        self.pending.values().cloned().collect()
    }

    pub fn on_request(&mut self, request: TalkbackRequest) -> RequestOutcome {
        if !self.enabled {
            debug!(talkback_id = request.talkback_id, "Talkback disabled, declining");
            return RequestOutcome::AutoDeclined(ControlMessage::TalkbackDecline {
                talkback_id: request.talkback_id,
            });
        }
        if self.pending.contains_key(&request.talkback_id) {
            return RequestOutcome::Duplicate;
        }
        info!(
            talkback_id = request.talkback_id,
            caller = %request.caller,
            queued_behind_active = self.active.is_some(),
            "Talkback requested"
        );
        self.pending.insert(request.talkback_id, request);
        RequestOutcome::Queued
    }

    /// Accept a pending request. Only one session can be active.
    pub fn accept(&mut self, talkback_id: u32) -> EngineResult<ControlMessage> {
        if !self.pending.contains_key(&talkback_id) {
            return Err(EngineError::UnknownTalkbackId(talkback_id));
        }
        if self.active.is_some() {
            return Err(EngineError::InvalidState {
                operation: "accept talkback",
                state: "talkback active",
            });
        }
        self.pending.remove(&talkback_id);
        self.active = Some(talkback_id);
        info!(talkback_id, "Talkback accepted");
        Ok(ControlMessage::TalkbackAccept { talkback_id })
    }

    pub fn decline(&mut self, talkback_id: u32) -> EngineResult<ControlMessage> {
        if self.pending.remove(&talkback_id).is_none() {
            return Err(EngineError::UnknownTalkbackId(talkback_id));
        }
        info!(talkback_id, "Talkback declined");
        Ok(ControlMessage::TalkbackDecline { talkback_id })
    }

    /// End the active session, returning its id and the message to send.
    pub fn end(&mut self) -> EngineResult<(u32, ControlMessage)> {
        let talkback_id = self.active.take().ok_or(EngineError::InvalidState {
            operation: "end talkback",
            state: "no talkback active",
        })?;
        info!(talkback_id, "Talkback ended");
        Ok((talkback_id, ControlMessage::TalkbackEnd { talkback_id }))
    }

    /// The server ended a session or withdrew a request. Returns true if
    /// the active session ended.
    pub fn on_remote_end(&mut self, talkback_id: u32) -> bool {
        if self.active == Some(talkback_id) {
            self.active = None;
            info!(talkback_id, "Talkback ended by server");
            return true;
        }
        if self.pending.remove(&talkback_id).is_some() {
            debug!(talkback_id, "Talkback request withdrawn");
        }
        false
    }

    /// Drop everything at the end of a broadcast, returning the active id.
    pub fn clear(&mut self) -> Option<u32> {
        self.pending.clear();
        self.active.take()
    }
}
