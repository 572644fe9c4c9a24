//! Repeating detection task.
//!
use tokio::{
    task::{JoinError, JoinHandle},
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{meter::METER, session::Session};

/// Handle to a running detection loop.
pub struct DetectionLoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<Session>,
}

impl DetectionLoopHandle {
    /// Ask the loop to stop. A cycle in progress is finished first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end and get the session back.
    pub async fn join(self) -> Result<Session, JoinError> {
        self.task.await
    }

    pub async fn stop_and_join(self) -> Result<Session, JoinError> {
        self.stop();
        self.join().await
    }
}

/// Run a detection cycle of `session` every `session.config().period`, starting right away.
///
/// A failing cycle is logged and the next one runs on schedule. The loop only ends through
/// the returned handle.
pub fn spawn_detection_loop(mut session: Session) -> DetectionLoopHandle {
    let cancel = CancellationToken::new();
    let period = session.config().period;

    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // Shift the schedule after a slow cycle instead of catching up
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            log::info!("Starting detection loop with period {period:?}");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match session.run_cycle() {
                        Ok(_) => METER.tick_cycle(),
                        Err(err) => {
                            METER.tick_failed();
                            log::warn!("Detection cycle failed: {err}");
                        }
                    },
                }
            }
            log::info!("Detection loop stopped");

            session
        })
    };

    DetectionLoopHandle { cancel, task }
}
