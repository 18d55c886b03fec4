use crate::metrics::now_unix;
use serde::Serialize;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

const SEED: f64 = 1.5;

#[derive(Debug, Error)]
pub enum StressError {
    #[error("не удалось запустить поток нагрузки: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StressStatus {
    pub running: bool,
    pub cores: usize,
    pub active_workers: usize,
    pub running_secs: u64,
}

struct StressSession {
    core_count: usize,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl StressSession {
    fn retire(self) {
        self.stop.store(true, Ordering::Release);
        for (i, handle) in self.workers.into_iter().enumerate() {
            if handle.join().is_err() {
                warn!(worker = i, "поток нагрузки завершился паникой");
            }
        }
    }
}

/// Decrements the live-worker count when the worker closure is dropped,
/// whether the thread ran to completion or never started.
struct LiveWorker(Arc<AtomicUsize>);

impl LiveWorker {
    fn enlist(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Status readable without the engine's controller. Start and stop may block
/// while joining workers; the monitor never does.
#[derive(Debug, Clone, Default)]
pub struct StressMonitor {
    live: Arc<AtomicUsize>,
    cores: Arc<AtomicUsize>,
    started_unix: Arc<AtomicI64>,
}

impl StressMonitor {
    pub fn active_workers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn status(&self) -> StressStatus {
        let cores = self.cores.load(Ordering::Acquire);
        let running_secs = if cores > 0 {
            now_unix()
                .saturating_sub(self.started_unix.load(Ordering::Acquire))
                .max(0) as u64
        } else {
            0
        };
        StressStatus {
            running: cores > 0,
            cores,
            active_workers: self.active_workers(),
            running_secs,
        }
    }
}

#[derive(Default)]
pub struct StressEngine {
    session: Option<StressSession>,
    monitor: StressMonitor,
}

impl StressEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, cores: NonZeroUsize) -> Result<(), StressError> {
        if self.session.is_some() {
            debug!("перезапуск стресс-теста, предыдущая сессия останавливается");
            self.stop();
        }

        let core_count = cores.get();
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(core_count);

        for i in 0..core_count {
            let guard = LiveWorker::enlist(&self.monitor.live);
            let flag = stop.clone();
            let spawned = thread::Builder::new()
                .name(format!("stress-worker-{i}"))
                .spawn(move || {
                    let _guard = guard;
                    burn(&flag);
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    warn!(worker = i, error = %err, "не удалось создать поток, откат сессии");
                    StressSession {
                        core_count,
                        stop,
                        workers,
                        started_at: Instant::now(),
                    }
                    .retire();
                    return Err(StressError::Spawn(err));
                }
            }
        }

        self.monitor
            .started_unix
            .store(now_unix(), Ordering::Release);
        self.monitor.cores.store(core_count, Ordering::Release);
        info!(cores = core_count, "стресс-тест запущен");
        self.session = Some(StressSession {
            core_count,
            stop,
            workers,
            started_at: Instant::now(),
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let cores = session.core_count;
        let ran_for = session.started_at.elapsed();
        session.retire();
        self.monitor.cores.store(0, Ordering::Release);
        info!(
            cores,
            ran_for_secs = ran_for.as_secs(),
            "стресс-тест остановлен"
        );
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn core_count(&self) -> usize {
        self.session.as_ref().map(|s| s.core_count).unwrap_or(0)
    }

    pub fn active_workers(&self) -> usize {
        self.monitor.active_workers()
    }

    pub fn monitor(&self) -> StressMonitor {
        self.monitor.clone()
    }

    pub fn status(&self) -> StressStatus {
        self.monitor.status()
    }
}

impl Drop for StressEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn burn(stop: &AtomicBool) {
    let mut x = SEED;
    while !stop.load(Ordering::Acquire) {
        x = black_box(step(black_box(x)));
    }
}

fn step(x: f64) -> f64 {
    let next = x * x.sqrt().max(1.0) + x.sin().abs() + 1.0;
    if next.is_finite() {
        next
    } else {
        SEED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cores(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn wait_for_active(engine: &StressEngine, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_millis(200);
        loop {
            if engine.active_workers() == expected {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn start_then_stop_leaves_no_workers() {
        let mut engine = StressEngine::new();
        engine.start(cores(3)).unwrap();
        engine.stop();
        assert!(wait_for_active(&engine, 0));
        assert!(!engine.is_running());
        assert_eq!(engine.core_count(), 0);
    }

    #[test]
    fn scenario_four_then_two() {
        let mut engine = StressEngine::new();
        engine.start(cores(4)).unwrap();
        assert_eq!(engine.active_workers(), 4);
        assert_eq!(engine.core_count(), 4);

        engine.stop();
        assert_eq!(engine.active_workers(), 0);

        engine.start(cores(2)).unwrap();
        assert_eq!(engine.active_workers(), 2);
        engine.stop();
        assert_eq!(engine.active_workers(), 0);
    }

    #[test]
    fn restart_retires_previous_generation() {
        let mut engine = StressEngine::new();
        engine.start(cores(2)).unwrap();
        engine.start(cores(2)).unwrap();
        assert_eq!(engine.active_workers(), 2);
        engine.start(cores(1)).unwrap();
        assert_eq!(engine.active_workers(), 1);
        assert_eq!(engine.status().cores, 1);
    }

    #[test]
    fn stop_when_idle_is_noop() {
        let mut engine = StressEngine::new();
        engine.stop();
        engine.stop();
        assert_eq!(
            engine.status(),
            StressStatus {
                running: false,
                cores: 0,
                active_workers: 0,
                running_secs: 0,
            }
        );
    }

    #[test]
    fn drop_stops_workers() {
        let live = {
            let mut engine = StressEngine::new();
            engine.start(cores(2)).unwrap();
            engine.monitor.live.clone()
        };
        assert_eq!(live.load(Ordering::Acquire), 0);
    }

    #[test]
    fn monitor_tracks_engine_without_borrowing_it() {
        let mut engine = StressEngine::new();
        let monitor = engine.monitor();
        assert!(!monitor.status().running);

        engine.start(cores(2)).unwrap();
        let status = monitor.status();
        assert!(status.running);
        assert_eq!(status.cores, 2);
        assert_eq!(status.active_workers, 2);

        engine.stop();
        assert_eq!(monitor.status(), engine.status());
        assert_eq!(monitor.active_workers(), 0);
        assert!(!monitor.status().running);
    }

    #[test]
    fn recurrence_resets_instead_of_overflowing() {
        assert_eq!(step(f64::MAX), SEED);
        assert_eq!(step(f64::INFINITY), SEED);
        let mut x = SEED;
        let mut resets = 0;
        for _ in 0..1000 {
            let next = step(x);
            assert!(next.is_finite());
            if next == SEED {
                resets += 1;
            }
            x = next;
        }
        assert!(resets > 0);
    }
}
