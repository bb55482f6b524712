//! Cooperative frame loop driving a [`ParticleAdvector`].

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};

use crate::particles::ParticleAdvector;

/// The pool is owned by the loop; other callers go through this handle and
/// never hold the lock across an await.
pub type SharedAdvector = Arc<Mutex<ParticleAdvector>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

/// Runs one `step()` per frame on the current tokio runtime. A single task
/// owns the loop, so frames never overlap.
pub struct AnimationLoop {
    advector: SharedAdvector,
    frame_interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl AnimationLoop {
    pub fn new(advector: SharedAdvector, frame_interval: Duration) -> Self {
        Self {
            advector,
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            task: None,
        }
    }

    pub fn advector(&self) -> SharedAdvector {
        self.advector.clone()
    }

    pub fn state(&self) -> LoopState {
        match &self.task {
            Some(task) if !task.is_finished() => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    /// Start the frame loop. Calling it while running is a no-op.
    pub fn start(&mut self) {
        if self.state() == LoopState::Running {
            return;
        }
        let advector = self.advector.clone();
        let period = self.frame_interval;
        debug!(?period, "Starting particle animation");
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let frame_start = Instant::now();
                match advector.lock() {
                    Ok(mut guard) => guard.step(),
                    Err(_) => {
                        warn!("Particle pool poisoned; stopping animation");
                        break;
                    }
                }
                metrics::histogram!("marine_particle_frame_seconds")
                    .record(frame_start.elapsed().as_secs_f64());
            }
        }));
    }

    /// Stop the frame loop. The pool keeps its last state.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Stopped particle animation");
        }
    }
}

impl Drop for AnimationLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{particles::AdvectorSettings, projection::CanvasProjection};
    use hazard_core::BoundingBox;

    fn shared() -> SharedAdvector {
        let projection = CanvasProjection::new(BoundingBox::new(1.0, 0.0, 1.0, 0.0), 32, 32);
        let settings = AdvectorSettings {
            particle_count: 8,
            velocity_scale: 1.0,
            max_age: 10,
        };
        Arc::new(Mutex::new(ParticleAdvector::with_seed(projection, settings, 1)))
    }

    fn frames(advector: &SharedAdvector) -> u64 {
        advector.lock().expect("advector lock").frames()
    }

    #[tokio::test]
    async fn loop_advances_frames_until_stopped() {
        let advector = shared();
        let mut animation = AnimationLoop::new(advector.clone(), Duration::from_millis(5));
        assert_eq!(animation.state(), LoopState::Stopped);

        animation.start();
        assert_eq!(animation.state(), LoopState::Running);
        tokio::time::sleep(Duration::from_millis(60)).await;
        animation.stop();
        assert_eq!(animation.state(), LoopState::Stopped);

        let after_stop = frames(&advector);
        assert!(after_stop > 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(frames(&advector), after_stop);
    }

    #[tokio::test]
    async fn restarting_does_not_spawn_a_second_loop() {
        let advector = shared();
        let mut animation = AnimationLoop::new(advector.clone(), Duration::from_millis(5));
        animation.start();
        animation.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(animation);
        let frames_after_drop = frames(&advector);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(frames(&advector), frames_after_drop);
    }
}
