//! One send or receive attempt driven by the host event loop
//!
//! A [`TransferSession`] owns at most one live handle, a [`Transmitter`] or a
//! [`Receiver`], and advances only when the host calls [`TransferSession::tick`].
//! Handle callbacks never touch session state directly: they queue events
//! tagged with the generation of the handle that produced them, and the session
//! drains the queue on its own schedule. Tearing a handle down bumps the
//! generation, so anything it queued afterwards is ignored.

use crate::config::SessionConfig;
use crate::error::AudioModemError;
use crate::level::LevelMonitor;
use crate::payload::TransferPayload;
use crate::platform::{AudioPlatform, CapabilityStatus, CaptureSupport, PlatformError};
use crate::profile::require_profile;
use crate::receiver::Receiver;
use crate::transmitter::Transmitter;
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Sending,
    Receiving,
    Done,
    Error,
}

impl TransferState {
    /// A handle is live in these states.
    pub fn is_active(&self) -> bool {
        matches!(self, TransferState::Sending | TransferState::Receiving)
    }
}

/// Failures as the user should see them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Invalid transfer: {0}")]
    Validation(String),

    /// The device cannot do this right now. `use_fallback` means it never
    /// will, and the receive role belongs on the external page.
    #[error("{message}")]
    Capability { message: String, use_fallback: bool },

    #[error("Transfer failed, please try again ({0})")]
    Runtime(String),

    #[error("Token claim rejected: {0}")]
    ClaimRejected(String),

    #[error("Another transfer is already running")]
    Busy,
}

impl From<AudioModemError> for TransferError {
    fn from(error: AudioModemError) -> Self {
        match error {
            AudioModemError::Platform(platform) => {
                let use_fallback = matches!(platform, PlatformError::CaptureUnsupported(_));
                match platform {
                    PlatformError::Device(reason) => TransferError::Runtime(reason),
                    other => TransferError::Capability {
                        message: other.to_string(),
                        use_fallback,
                    },
                }
            }
            AudioModemError::UnknownProfile(name) => TransferError::Capability {
                message: format!("Audio codec not ready: profile '{}' is not registered", name),
                use_fallback: false,
            },
            AudioModemError::InvalidPayload(reason) => TransferError::Validation(reason),
            e @ AudioModemError::PayloadTooLarge { .. } => TransferError::Validation(e.to_string()),
            other => TransferError::Runtime(other.to_string()),
        }
    }
}

/// Why the host refused a claim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("{0}")]
    Rejected(String),

    #[error("Claim service unavailable: {0}")]
    Unavailable(String),
}

/// Services the session needs from the application around it.
pub trait HostBridge {
    /// Claim a received token for the current user. Called at most once per
    /// received payload unless the user retries.
    fn claim(&mut self, token_id: &str) -> Result<(), ClaimError>;

    /// Hand a URL to the surrounding browser.
    fn open_external(&mut self, url: &Url);
}

/// Status line shown next to the transfer controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Transmitting,
    Transmitted,
    Listening,
    TokenReceived,
    TimeExpired,
    Failed(TransferError),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => Ok(()),
            SessionStatus::Transmitting => write!(f, "transfer in progress…"),
            SessionStatus::Transmitted => write!(f, "transfer complete"),
            SessionStatus::Listening => write!(f, "waiting for token…"),
            SessionStatus::TokenReceived => write!(f, "token received"),
            SessionStatus::TimeExpired => write!(f, "time expired"),
            SessionStatus::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// What happened since the host last looked.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Sent(TransferPayload),
    Received(TransferPayload),
    Claimed(String),
    TimedOut,
    Cancelled,
    Failed(TransferError),
    FallbackOpened(Url),
}

enum HandleEvent {
    Finished,
    Failed(TransferError),
    Frame(TransferPayload),
}

type Inbox = Rc<RefCell<Vec<(u64, HandleEvent)>>>;

enum ActiveHandle {
    Transmit(Transmitter),
    Receive { receiver: Receiver, deadline: Instant },
}

pub struct TransferSession {
    config: SessionConfig,
    platform: Box<dyn AudioPlatform>,
    bridge: Box<dyn HostBridge>,
    state: TransferState,
    status: SessionStatus,
    active: Option<ActiveHandle>,
    generation: u64,
    inbox: Inbox,
    events: Vec<SessionEvent>,
    monitor: LevelMonitor,
    /// Sent payload while sending, received payload once a frame arrives
    payload: Option<TransferPayload>,
    /// Received payload still waiting for a successful claim
    unclaimed: Option<TransferPayload>,
}

impl TransferSession {
    pub fn new(config: SessionConfig, platform: Box<dyn AudioPlatform>, bridge: Box<dyn HostBridge>) -> Self {
        Self {
            config,
            platform,
            bridge,
            state: TransferState::Idle,
            status: SessionStatus::Idle,
            active: None,
            generation: 0,
            inbox: Rc::new(RefCell::new(Vec::new())),
            events: Vec::new(),
            monitor: LevelMonitor::new(),
            payload: None,
            unclaimed: None,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Latest meter reading; zero whenever no handle is live.
    pub fn level(&self) -> f32 {
        self.monitor.level()
    }

    pub fn payload(&self) -> Option<&TransferPayload> {
        self.payload.as_ref()
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Build a payload for `token_id`/`amount` and start playing it.
    ///
    /// Rejected inputs leave the session where it was. Once this returns `Ok`
    /// the outcome arrives through [`tick`](Self::tick) as `Sent` or `Failed`;
    /// a handle that fails while opening has already moved the session to
    /// `Error` by the time this returns.
    pub fn start_send(&mut self, token_id: &str, amount: Decimal, now: Instant) -> Result<(), TransferError> {
        self.ensure_startable()?;
        self.ensure_ready()?;

        let profile = require_profile(&self.config.profile)?;
        let payload = TransferPayload::new(token_id, amount)?;
        let bytes = payload.encode(profile.payload_format)?;
        if bytes.len() > profile.frame_length {
            return Err(AudioModemError::PayloadTooLarge {
                len: bytes.len(),
                max: profile.frame_length,
            }
            .into());
        }

        self.reset();
        let generation = self.generation;
        let finished = self.inbox.clone();
        let failed = self.inbox.clone();
        let mut transmitter = Transmitter::create(
            &self.config.profile,
            self.platform.as_mut(),
            move || finished.borrow_mut().push((generation, HandleEvent::Finished)),
            move |e: AudioModemError| failed.borrow_mut().push((generation, HandleEvent::Failed(e.into()))),
        )
        .with_settle_delay(self.config.settle_delay());

        // Refusals on a closed handle are already queued through on_fail
        if let Err(e) = transmitter.transmit(&bytes, now) {
            log::debug!("transmit not accepted: {}", e);
        }

        log::info!("sending token {} ({})", payload.token_id(), payload.amount());
        self.payload = Some(payload);
        self.active = Some(ActiveHandle::Transmit(transmitter));
        self.state = TransferState::Sending;
        self.status = SessionStatus::Transmitting;
        self.monitor.start();
        self.drain_inbox();
        Ok(())
    }

    /// Open the microphone and wait for one valid frame.
    ///
    /// Devices that can never capture are refused with a `Capability` error
    /// whose `use_fallback` flag points the caller at
    /// [`open_fallback`](Self::open_fallback).
    pub fn start_receive(&mut self, now: Instant) -> Result<(), TransferError> {
        self.ensure_startable()?;
        self.ensure_ready()?;
        require_profile(&self.config.profile)?;

        if let CaptureSupport::Unavailable { reason } = self.platform.capture_support() {
            log::warn!("capture unavailable: {}", reason);
            return Err(TransferError::Capability {
                message: format!("Microphone unavailable: {}", reason),
                use_fallback: true,
            });
        }

        self.reset();
        let generation = self.generation;
        let frames = self.inbox.clone();
        let failed = self.inbox.clone();
        let receiver = Receiver::create(
            &self.config.profile,
            self.platform.as_mut(),
            move |payload| frames.borrow_mut().push((generation, HandleEvent::Frame(payload))),
            move |e: AudioModemError| failed.borrow_mut().push((generation, HandleEvent::Failed(e.into()))),
        );

        let deadline = now + self.config.receive_timeout();
        log::info!("listening for {:?}", self.config.receive_timeout());
        self.active = Some(ActiveHandle::Receive { receiver, deadline });
        self.state = TransferState::Receiving;
        self.status = SessionStatus::Listening;
        self.monitor.start();
        self.drain_inbox();
        Ok(())
    }

    /// Advance the live handle, apply what it reported, enforce the receive
    /// deadline and take a level reading.
    pub fn tick(&mut self, now: Instant) {
        match self.active.as_mut() {
            Some(ActiveHandle::Transmit(transmitter)) => transmitter.poll(now),
            Some(ActiveHandle::Receive { receiver, .. }) => receiver.poll(),
            None => {}
        }
        self.drain_inbox();

        let expired = matches!(
            self.active,
            Some(ActiveHandle::Receive { deadline, .. }) if now >= deadline
        );
        if expired {
            log::info!("receive window expired");
            self.teardown();
            self.state = TransferState::Idle;
            self.status = SessionStatus::TimeExpired;
            self.events.push(SessionEvent::TimedOut);
        }

        match self.active.as_ref() {
            Some(ActiveHandle::Transmit(transmitter)) => {
                self.monitor.sample(transmitter);
            }
            Some(ActiveHandle::Receive { receiver, .. }) => {
                self.monitor.sample(receiver);
            }
            None => {}
        }
    }

    /// Stop a send or receive at once. Nothing from the old handle surfaces
    /// afterwards.
    pub fn cancel(&mut self) {
        if !self.state.is_active() {
            return;
        }
        log::info!("transfer cancelled");
        self.teardown();
        self.state = TransferState::Idle;
        self.status = SessionStatus::Idle;
        self.payload = None;
        self.events.push(SessionEvent::Cancelled);
    }

    /// Leave `Done` or `Error` and forget everything about the attempt.
    pub fn acknowledge(&mut self) {
        if matches!(self.state, TransferState::Done | TransferState::Error) {
            self.reset();
            self.state = TransferState::Idle;
            self.status = SessionStatus::Idle;
        }
    }

    /// Try the claim again after it was rejected.
    pub fn retry_claim(&mut self) -> Result<(), TransferError> {
        let payload = match (&self.state, &self.unclaimed) {
            (TransferState::Error, Some(payload)) => payload.clone(),
            _ => return Err(TransferError::Validation("no rejected claim to retry".to_string())),
        };
        self.claim(payload);
        match &self.status {
            SessionStatus::Failed(e) => Err(e.clone()),
            _ => Ok(()),
        }
    }

    /// Send the user to the external receiver page for this token.
    pub fn open_fallback(&mut self, token_id: &str, amount: Decimal) -> Result<Url, TransferError> {
        let payload = TransferPayload::new(token_id, amount)?;
        let url = self.config.fallback.url_for(payload.token_id(), payload.amount())?;
        log::info!("opening fallback receiver {}", url);
        self.bridge.open_external(&url);
        self.events.push(SessionEvent::FallbackOpened(url.clone()));
        Ok(url)
    }

    fn ensure_startable(&self) -> Result<(), TransferError> {
        if self.state.is_active() || self.active.is_some() {
            return Err(TransferError::Busy);
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), TransferError> {
        match self.platform.status() {
            CapabilityStatus::Ready => Ok(()),
            CapabilityStatus::NotReady => Err(TransferError::Capability {
                message: "Audio module is not ready yet".to_string(),
                use_fallback: false,
            }),
            CapabilityStatus::Failed(reason) => Err(TransferError::Capability {
                message: format!("Audio module failed to load: {}", reason),
                use_fallback: false,
            }),
        }
    }

    fn drain_inbox(&mut self) {
        let queued: Vec<_> = self.inbox.borrow_mut().drain(..).collect();
        for (generation, event) in queued {
            if generation != self.generation {
                log::debug!("discarding event from stale handle {}", generation);
                continue;
            }
            match (self.state, event) {
                (TransferState::Sending, HandleEvent::Finished) => {
                    log::info!("transmission finished");
                    self.teardown();
                    self.state = TransferState::Done;
                    self.status = SessionStatus::Transmitted;
                    if let Some(payload) = self.payload.clone() {
                        self.events.push(SessionEvent::Sent(payload));
                    }
                }
                (TransferState::Receiving, HandleEvent::Frame(payload)) => {
                    self.teardown();
                    self.state = TransferState::Done;
                    self.status = SessionStatus::TokenReceived;
                    self.payload = Some(payload.clone());
                    self.events.push(SessionEvent::Received(payload.clone()));
                    self.claim(payload);
                }
                (state, HandleEvent::Failed(error)) if state.is_active() => {
                    log::warn!("transfer failed: {}", error);
                    self.teardown();
                    self.fail(error);
                }
                _ => {}
            }
        }
    }

    fn claim(&mut self, payload: TransferPayload) {
        match self.bridge.claim(payload.token_id()) {
            Ok(()) => {
                log::info!("claimed token {}", payload.token_id());
                self.unclaimed = None;
                self.state = TransferState::Done;
                self.status = SessionStatus::TokenReceived;
                self.events.push(SessionEvent::Claimed(payload.token_id().to_string()));
            }
            Err(e) => {
                log::warn!("claim for {} failed: {}", payload.token_id(), e);
                self.unclaimed = Some(payload);
                self.fail(TransferError::ClaimRejected(e.to_string()));
            }
        }
    }

    fn fail(&mut self, error: TransferError) {
        self.state = TransferState::Error;
        self.status = SessionStatus::Failed(error.clone());
        self.events.push(SessionEvent::Failed(error));
    }

    /// Destroy the live handle and invalidate anything it still queues.
    fn teardown(&mut self) {
        match self.active.take() {
            Some(ActiveHandle::Transmit(mut transmitter)) => transmitter.destroy(),
            Some(ActiveHandle::Receive { mut receiver, .. }) => receiver.destroy(),
            None => {}
        }
        self.generation += 1;
        self.monitor.stop();
    }

    fn reset(&mut self) {
        self.teardown();
        self.inbox.borrow_mut().clear();
        self.payload = None;
        self.unclaimed = None;
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
