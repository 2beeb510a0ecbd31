//! In-memory audio platform and host bridge for session tests

#![allow(dead_code)]

use sonicpay_core::platform::{PlaybackStatus, PlatformError};
use sonicpay_core::session::ClaimError;
use sonicpay_core::{AudioInput, AudioOutput, AudioPlatform, CapabilityStatus, CaptureSupport, HostBridge};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use url::Url;

/// Samples the fake speaker advances per poll (100 ms at 48 kHz)
pub const PLAY_CHUNK: usize = 4800;
/// Samples the fake microphone delivers per read
pub const CAPTURE_CHUNK: usize = 4800;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct Devices {
    pub played: Vec<Vec<f32>>,
    pub position: usize,
    pub output_stopped: bool,
    pub outputs_opened: usize,
    pub capture: VecDeque<f32>,
    /// Hand over the whole capture queue in one read
    pub read_all: bool,
    pub inputs_opened: usize,
    pub input_closed: bool,
    /// Both fake devices report 0 Hz, as a broken audio context does
    pub zero_rate: bool,
}

impl Devices {
    fn rate(&self) -> u32 {
        if self.zero_rate {
            0
        } else {
            48000
        }
    }
}

pub struct MockPlatform {
    pub devices: Rc<RefCell<Devices>>,
    pub status: CapabilityStatus,
    pub capture_support: CaptureSupport,
    pub deny_microphone: bool,
}

impl MockPlatform {
    pub fn new() -> (Self, Rc<RefCell<Devices>>) {
        let devices = Rc::new(RefCell::new(Devices::default()));
        let platform = Self {
            devices: devices.clone(),
            status: CapabilityStatus::Ready,
            capture_support: CaptureSupport::Supported,
            deny_microphone: false,
        };
        (platform, devices)
    }
}

impl AudioPlatform for MockPlatform {
    fn status(&self) -> CapabilityStatus {
        self.status.clone()
    }

    fn capture_support(&self) -> CaptureSupport {
        self.capture_support.clone()
    }

    fn open_output(&mut self) -> Result<Box<dyn AudioOutput>, PlatformError> {
        let mut devices = self.devices.borrow_mut();
        devices.outputs_opened += 1;
        devices.output_stopped = false;
        devices.position = 0;
        Ok(Box::new(MockOutput { devices: self.devices.clone() }))
    }

    fn open_input(&mut self) -> Result<Box<dyn AudioInput>, PlatformError> {
        if self.deny_microphone {
            return Err(PlatformError::PermissionDenied("user dismissed the prompt".to_string()));
        }
        let mut devices = self.devices.borrow_mut();
        devices.inputs_opened += 1;
        devices.input_closed = false;
        Ok(Box::new(MockInput { devices: self.devices.clone() }))
    }
}

struct MockOutput {
    devices: Rc<RefCell<Devices>>,
}

impl AudioOutput for MockOutput {
    fn sample_rate(&self) -> u32 {
        self.devices.borrow().rate()
    }

    fn play(&mut self, samples: Vec<f32>) -> Result<(), PlatformError> {
        self.devices.borrow_mut().played.push(samples);
        Ok(())
    }

    fn poll(&mut self) -> PlaybackStatus {
        let mut devices = self.devices.borrow_mut();
        let len = devices.played.last().map_or(0, |p| p.len());
        devices.position = (devices.position + PLAY_CHUNK).min(len);
        if devices.position >= len {
            PlaybackStatus::Finished
        } else {
            PlaybackStatus::Playing
        }
    }

    fn position(&self) -> usize {
        self.devices.borrow().position
    }

    fn stop(&mut self) {
        self.devices.borrow_mut().output_stopped = true;
    }
}

struct MockInput {
    devices: Rc<RefCell<Devices>>,
}

impl AudioInput for MockInput {
    fn sample_rate(&self) -> u32 {
        self.devices.borrow().rate()
    }

    fn read(&mut self, buf: &mut Vec<f32>) -> Result<usize, PlatformError> {
        let mut devices = self.devices.borrow_mut();
        let take = if devices.read_all {
            devices.capture.len()
        } else {
            devices.capture.len().min(CAPTURE_CHUNK)
        };
        buf.extend(devices.capture.drain(..take));
        // An empty queue reads as silence so the stream keeps flowing
        if take == 0 {
            buf.extend(std::iter::repeat(0.0).take(CAPTURE_CHUNK));
            return Ok(CAPTURE_CHUNK);
        }
        Ok(take)
    }

    fn close(&mut self) {
        self.devices.borrow_mut().input_closed = true;
    }
}

#[derive(Default)]
pub struct Host {
    pub claims: Vec<String>,
    pub reject_claims: bool,
    pub opened: Vec<Url>,
}

pub struct MockBridge {
    pub host: Rc<RefCell<Host>>,
}

impl MockBridge {
    pub fn new() -> (Self, Rc<RefCell<Host>>) {
        let host = Rc::new(RefCell::new(Host::default()));
        (Self { host: host.clone() }, host)
    }
}

impl HostBridge for MockBridge {
    fn claim(&mut self, token_id: &str) -> Result<(), ClaimError> {
        let mut host = self.host.borrow_mut();
        host.claims.push(token_id.to_string());
        if host.reject_claims {
            return Err(ClaimError::Rejected("token already claimed".to_string()));
        }
        Ok(())
    }

    fn open_external(&mut self, url: &Url) {
        self.host.borrow_mut().opened.push(url.clone());
    }
}
