//! Microphone capture using cpal

use crate::capture::traits::{AudioConstraints, AudioTrack, DeviceKind, MediaDeviceInfo, TrackInfo};
use crate::utils::error::{RecorderError, RecorderResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

/// Input devices of the default host. Ids are device names.
pub fn list_microphones() -> RecorderResult<Vec<MediaDeviceInfo>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| RecorderError::DeviceAcquisitionFailed(format!("microphone query failed: {}", e)))?;

    Ok(devices
        .filter_map(|d| d.name().ok())
        .map(|name| MediaDeviceInfo::new(name.clone(), DeviceKind::AudioInput, name))
        .collect())
}

fn find_device(constraints: &AudioConstraints) -> RecorderResult<Device> {
    let host = cpal::default_host();
    match constraints.device.exact_id() {
        Some(name) => host
            .input_devices()
            .map_err(|e| RecorderError::DeviceAcquisitionFailed(e.to_string()))?
            .find(|d| d.name().unwrap_or_default() == name)
            .ok_or_else(|| RecorderError::DeviceAcquisitionFailed(format!("microphone '{}' not found", name))),
        None => host
            .default_input_device()
            .ok_or_else(|| RecorderError::DeviceAcquisitionFailed("no input device available".to_string())),
    }
}

/// Requested rate and channel count when the device accepts them,
/// otherwise its default input format
fn stream_config(device: &Device, constraints: &AudioConstraints) -> RecorderResult<StreamConfig> {
    let wanted_rate = SampleRate(constraints.sample_rate);
    let matching = device
        .supported_input_configs()
        .map_err(|e| RecorderError::DeviceAcquisitionFailed(e.to_string()))?
        .find(|range| {
            range.channels() == constraints.channel_count
                && range.min_sample_rate() <= wanted_rate
                && wanted_rate <= range.max_sample_rate()
        });

    let config = match matching {
        Some(range) => range.with_sample_rate(wanted_rate).config(),
        None => device
            .default_input_config()
            .map_err(|e| RecorderError::DeviceAcquisitionFailed(e.to_string()))?
            .config(),
    };
    Ok(config)
}

/// A running microphone stream publishing into an [`AudioTrack`]
pub struct MicStream {
    track: AudioTrack,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MicStream {
    pub fn open(constraints: &AudioConstraints) -> RecorderResult<Self> {
        let device = find_device(constraints)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = stream_config(&device, constraints)?;

        tracing::info!(
            "Microphone {}: {}Hz, {} channels",
            name,
            config.sample_rate.0,
            config.channels
        );

        let track = AudioTrack::new(
            TrackInfo {
                id: Uuid::new_v4().to_string(),
                device_id: name.clone(),
                label: name,
            },
            config.sample_rate.0,
            config.channels,
        );

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<RecorderResult<()>>();

        // cpal streams are not Send; the stream lives on this thread
        let thread = {
            let running = running.clone();
            let track = track.clone();
            std::thread::spawn(move || {
                let publisher = track.clone();
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| publisher.publish(data.to_vec()),
                    |err| tracing::error!("Microphone stream error: {}", err),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(RecorderError::DeviceAcquisitionFailed(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(RecorderError::DeviceAcquisitionFailed(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(100));
                }
                drop(stream);
                tracing::info!("Microphone stream stopped");
            })
        };

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(RecorderError::DeviceAcquisitionFailed("microphone thread exited".to_string())));
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        Ok(Self {
            track,
            running,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            if let Some(thread) = self.thread.lock().take() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        self.stop();
    }
}
