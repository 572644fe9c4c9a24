use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Counters of streamed frames and detection cycles since the last reset.
#[derive(Default)]
pub struct Meter {
    streamed_frames: AtomicU64,
    detection_cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            streamed_frames: AtomicU64::new(0),
            detection_cycles: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
        }
    }

    pub fn tick_streamed(&self) {
        self.streamed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_cycle(&self) {
        self.detection_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_failed(&self) {
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_streamed(&self) -> u64 {
        self.streamed_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_cycles(&self) -> u64 {
        self.detection_cycles.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_failed(&self) -> u64 {
        self.failed_cycles.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let streamed = METER.get_reset_streamed();
            let cycles = METER.get_reset_cycles();
            let failed = METER.get_reset_failed();
            let elapsed = start.elapsed().as_secs_f32();

            if streamed > 0 {
                log::info!("Streamed frames per second: {:.2}", streamed as f32 / elapsed);
            }
            if cycles > 0 {
                log::info!("Detections per second: {:.2}", cycles as f32 / elapsed);
            }
            if failed > 0 {
                log::warn!("{failed} detection cycles failed in the last {elapsed:.1}s");
            }
        }
    })
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn counters_reset_on_read() {
        let meter = Meter::new();
        meter.tick_cycle();
        meter.tick_cycle();
        meter.tick_failed();

        assert_eq!(meter.get_reset_cycles(), 2);
        assert_eq!(meter.get_reset_cycles(), 0);
        assert_eq!(meter.get_reset_failed(), 1);
        assert_eq!(meter.get_reset_streamed(), 0);
    }
}
