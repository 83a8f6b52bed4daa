//! Manual device - the host pulls every period
//!
//! Nothing runs on its own: each [`ManualPull::pull`] invokes the render
//! callback exactly once. Suits hosts that own the clock themselves (an
//! embedding runtime, an offline renderer) and deterministic tests.

use std::sync::Arc;

use parking_lot::Mutex;

use super::backend::{validate, AudioDevice, DeviceInfo, RenderCallback};
use super::error::{AudioError, AudioResult};
use crate::types::{Buffer, Format};

struct Opened {
    render: RenderCallback,
    buffer: Buffer,
    period_frames: usize,
}

type Shared = Arc<Mutex<Option<Opened>>>;

pub struct ManualDevice {
    name: String,
    shared: Shared,
}

/// Host side of a [`ManualDevice`]
#[derive(Clone)]
pub struct ManualPull {
    name: String,
    shared: Shared,
}

impl ManualDevice {
    pub fn new() -> (Self, ManualPull) {
        let shared: Shared = Arc::new(Mutex::new(None));
        let name = "manual".to_string();
        (
            Self {
                name: name.clone(),
                shared: shared.clone(),
            },
            ManualPull { name, shared },
        )
    }
}

impl ManualPull {
    /// Render one period and hand it to `consume`
    pub fn pull_with<R>(&self, consume: impl FnOnce(&Buffer) -> R) -> AudioResult<R> {
        let mut guard = self.shared.lock();
        let opened = guard
            .as_mut()
            .ok_or_else(|| AudioError::NotOpen(self.name.clone()))?;
        opened.buffer.silence(opened.period_frames);
        (opened.render)(&mut opened.buffer);
        Ok(consume(&opened.buffer))
    }

    /// Render one period and return a copy of it
    pub fn pull(&self) -> AudioResult<Buffer> {
        self.pull_with(Buffer::clone)
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().is_some()
    }
}

impl AudioDevice for ManualDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, format: Format, period_frames: usize, render: RenderCallback) -> AudioResult<DeviceInfo> {
        validate(format, period_frames)?;
        let mut guard = self.shared.lock();
        if guard.is_some() {
            return Err(AudioError::AlreadyOpen(self.name.clone()));
        }
        *guard = Some(Opened {
            render,
            buffer: Buffer::with_capacity(format, period_frames),
            period_frames,
        });
        log::debug!("Manual device opened: {}, {} frames", format, period_frames);
        Ok(DeviceInfo {
            name: self.name.clone(),
            format,
            period_frames,
        })
    }

    fn close(&mut self) {
        self.shared.lock().take();
    }

    fn is_open(&self) -> bool {
        self.shared.lock().is_some()
    }
}
