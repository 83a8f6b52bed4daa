//! CPAL audio backend implementation
//!
//! Opens one output stream in the player's format. The CPAL callback
//! renders straight into a pre-allocated [`Buffer`] through the player's
//! render callback and copies the samples out; requests longer than
//! [`MAX_BUFFER_SIZE`] are rendered in several pieces.
//!
//! ```text
//! ┌──────────────────┐   commands    ┌─────────────────────┐
//! │  Caller threads  │──────────────►│  CPAL Audio Thread  │
//! └──────────────────┘               │  (render callback)  │
//!         ▲                          └──────────┬──────────┘
//!         │            events                   │
//!         └─────────────────────────────────────┘
//! ```

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, Host, HostId, SampleFormat, Stream, StreamConfig};

use super::backend::{validate, AudioDevice, DeviceInfo, RenderCallback};
use super::config::{DeviceId, OutputConfig, MAX_BUFFER_SIZE};
use super::error::{AudioError, AudioResult, DeviceStage};
use crate::types::{Buffer, Format, Sample, SampleType};

/// Get a human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// An output device as listed for selection
#[derive(Debug, Clone)]
pub struct OutputDevice {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    pub is_default: bool,
}

impl std::fmt::Display for OutputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)
    }
}

/// Get all output devices from every available host
pub fn output_devices() -> AudioResult<Vec<OutputDevice>> {
    let mut all = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = host
            .default_output_device()
            .and_then(|d: cpal::Device| d.name().ok());
        let devices = match host.output_devices() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };
        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            all.push(OutputDevice {
                id: DeviceId::new(name.clone()).on_host(host_label.clone()),
                is_default: default_name.as_ref() == Some(&name),
                host: host_label.clone(),
                name,
            });
        }
    }
    if all.is_empty() {
        return Err(AudioError::DeviceUnavailable("no output devices found".to_string()));
    }
    // default devices first, then by host, then by name
    all.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(all)
}

/// Find a device by its ID, searching every host when none is given
fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    if let Some(host) = id.host.as_deref().and_then(get_host_by_name) {
        return host
            .output_devices()
            .map_err(|e| AudioError::backend(DeviceStage::Enumerate, e))?
            .find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name))
            .ok_or_else(|| AudioError::DeviceUnavailable(id.to_string()));
    }
    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(mut devices) = host.output_devices() else {
            continue;
        };
        if let Some(device) = devices.find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name)) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceUnavailable(id.to_string()))
}

fn default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string()))
}

fn cpal_sample_format(sample_type: SampleType) -> SampleFormat {
    match sample_type {
        SampleType::Int16 => SampleFormat::I16,
        SampleType::Int32 => SampleFormat::I32,
        SampleType::Float32 => SampleFormat::F32,
    }
}

/// Check the device can play `format` exactly
fn check_support(device: &cpal::Device, format: Format) -> AudioResult<()> {
    let wanted = cpal_sample_format(format.sample_type);
    let supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::backend(DeviceStage::Query, e))?
        .any(|c| {
            c.sample_format() == wanted
                && c.channels() == format.channel_count
                && (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&format.sample_rate)
        });
    if supported {
        Ok(())
    } else {
        Err(AudioError::UnsupportedFormat(format))
    }
}

fn build_stream<S>(
    device: &cpal::Device,
    config: &StreamConfig,
    format: Format,
    mut render: RenderCallback,
) -> AudioResult<Stream>
where
    S: cpal::SizedSample + Sample,
{
    let channels = format.channel_count as usize;
    let mut buffer = Buffer::with_capacity(format, MAX_BUFFER_SIZE);
    device
        .build_output_stream(
            config,
            move |data: &mut [S], _info: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
                    buffer.silence(chunk.len() / channels);
                    render(&mut buffer);
                    match buffer.samples::<S>() {
                        Some(samples) if samples.len() == chunk.len() => chunk.copy_from_slice(samples),
                        _ => chunk.fill(S::default()),
                    }
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::backend(DeviceStage::Build, e))
}

/// Native output through CPAL
pub struct CpalDevice {
    config: OutputConfig,
    name: String,
    stream: Option<Stream>,
}

impl CpalDevice {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            name: "cpal".to_string(),
            stream: None,
        }
    }
}

impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, format: Format, period_frames: usize, render: RenderCallback) -> AudioResult<DeviceInfo> {
        if self.stream.is_some() {
            return Err(AudioError::AlreadyOpen(self.name.clone()));
        }
        validate(format, period_frames)?;
        let device = match &self.config.device {
            Some(id) => find_device_by_id(id)?,
            None => default_device()?,
        };
        self.name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio device: {}", self.name);
        check_support(&device, format)?;

        let buffer_size = self.config.buffer_size.resolve(period_frames);
        let stream_config = StreamConfig {
            channels: format.channel_count,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: CpalBufferSize::Fixed(buffer_size),
        };
        let stream = match format.sample_type {
            SampleType::Int16 => build_stream::<i16>(&device, &stream_config, format, render)?,
            SampleType::Int32 => build_stream::<i32>(&device, &stream_config, format, render)?,
            SampleType::Float32 => build_stream::<f32>(&device, &stream_config, format, render)?,
        };
        stream
            .play()
            .map_err(|e| AudioError::backend(DeviceStage::Start, e))?;

        let info = DeviceInfo {
            name: self.name.clone(),
            format,
            period_frames: buffer_size as usize,
        };
        log::info!(
            "Audio config: {}, {} frames (~{:.1}ms latency)",
            format,
            buffer_size,
            info.latency_ms()
        );
        self.stream = Some(stream);
        Ok(info)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause audio stream: {}", e);
            }
            log::info!("Audio stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_enumeration() {
        // no devices is expected in CI
        match output_devices() {
            Ok(devices) => {
                for device in &devices {
                    println!("  - {} (default: {})", device, device.is_default);
                }
            }
            Err(AudioError::DeviceUnavailable(reason)) => println!("No audio devices: {}", reason),
            Err(e) => println!("Error enumerating devices: {}", e),
        }
    }
}
