//! Pump: the top-level synchronous loop moving frames from a source to
//! a sink.
//!
//! On each iteration the pump pulls one frame from the current source,
//! hands it to the sink, and reports the sink's playback time back via
//! `reclock`. An optional backup source takes over while the main
//! source is inactive. `stop` is an atomic flag checked between frames;
//! in-flight frames always complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rtp_pcm_common::units::{duration_to_ntp, ntp_now};
use rtp_pcm_common::{DeviceState, Frame, MetricsContext, Sink, Source};
use tracing::{debug, error, info};

/// Pump termination policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpMode {
    // ---
    /// Run until `stop`.
    Continuous,

    /// Exit once the main source goes inactive, provided at least one
    /// frame was produced.
    Oneshot,
}

/// Cloneable stop handle for a running pump.
#[derive(Clone)]
pub struct PumpHandle {
    // ---
    stop: Arc<AtomicBool>,
}

impl PumpHandle {
    // ---
    pub fn stop(&self) {
        // ---
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[derive(PartialEq, Clone, Copy)]
enum Current {
    Main,
    Backup,
}

/// The frame-moving driver loop.
pub struct Pump {
    // ---
    main_source: Box<dyn Source>,
    backup_source: Option<Box<dyn Source>>,
    sink: Box<dyn Sink>,

    frame: Frame,
    oneshot: bool,
    stop: Arc<AtomicBool>,

    /// Frames produced from the main source.
    n_frames: u64,

    metrics: Option<MetricsContext>,
}

impl Pump {
    // ---
    pub fn new(
        main_source: Box<dyn Source>,
        backup_source: Option<Box<dyn Source>>,
        sink: Box<dyn Sink>,
        frame_samples: usize,
        mode: PumpMode,
        metrics: Option<MetricsContext>,
    ) -> Self {
        // ---
        Self {
            main_source,
            backup_source,
            sink,
            frame: Frame::new(frame_samples),
            oneshot: mode == PumpMode::Oneshot,
            stop: Arc::new(AtomicBool::new(false)),
            n_frames: 0,
            metrics,
        }
    }

    pub fn handle(&self) -> PumpHandle {
        // ---
        PumpHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Runs the main loop. Returns `true` on a natural exit, `false`
    /// when stopped.
    pub fn run(&mut self) -> bool {
        // ---
        debug!("pump: starting main loop");

        let mut current = Current::Main;

        while !self.stop.load(Ordering::Relaxed) {
            if self.main_source.state() == DeviceState::Active {
                if current == Current::Backup {
                    info!("pump: switching to main source");
                    if self.main_source.resume() {
                        current = Current::Main;
                        if let Some(backup) = &mut self.backup_source {
                            if !backup.pause() {
                                error!("pump: can't pause backup source");
                            }
                        }
                    } else {
                        error!("pump: can't resume main source");
                    }
                }
            } else {
                if self.oneshot && self.n_frames != 0 {
                    info!("pump: main source became inactive in oneshot mode");
                    break;
                }

                if self.backup_source.is_some() && current != Current::Backup {
                    info!("pump: switching to backup source");
                    let backup = self.backup_source.as_mut().expect("checked some");
                    if backup.restart() {
                        current = Current::Backup;
                        if !self.main_source.pause() {
                            error!("pump: can't pause main source");
                        }
                    } else {
                        error!("pump: can't restart backup source");
                    }
                }
            }

            let started = Instant::now();
            self.frame.clear();

            let source: &mut dyn Source = match current {
                Current::Main => self.main_source.as_mut(),
                Current::Backup => self
                    .backup_source
                    .as_mut()
                    .expect("backup selected implies present")
                    .as_mut(),
            };

            if !source.read(&mut self.frame) {
                debug!("pump: got eof from source");
                if current == Current::Backup {
                    current = Current::Main;
                    continue;
                }
                break;
            }

            let write_started = Instant::now();
            self.sink.write(&self.frame);

            source.reclock(ntp_now() + duration_to_ntp(self.sink.latency()));

            if let Some(metrics) = &self.metrics {
                metrics
                    .sink_write_seconds
                    .observe(write_started.elapsed().as_secs_f64());
                metrics
                    .pump_frame_seconds
                    .observe(started.elapsed().as_secs_f64());
            }

            if current == Current::Main {
                self.n_frames += 1;
            }
        }

        debug!(
            "pump: exiting main loop, wrote {} frames from main source",
            self.n_frames
        );

        !self.stop.load(Ordering::Relaxed)
    }
}
