use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::RealtimeCoordinator;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Background pump for a coordinator: one thread calls `update` on a fixed
/// wall-clock cadence. External threads hand in goals through a mutex-guarded
/// FIFO queue and must take the coordinator lock to read derived state while
/// the driver runs. At most one driver thread exists per instance.
pub struct SimulationDriver {
    coordinator: Arc<Mutex<RealtimeCoordinator>>,
    queue: Arc<Mutex<VecDeque<(usize, usize)>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulationDriver {
    pub fn new(coordinator: Arc<Mutex<RealtimeCoordinator>>) -> Self {
        SimulationDriver {
            coordinator,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn coordinator(&self) -> Arc<Mutex<RealtimeCoordinator>> {
        self.coordinator.clone()
    }

    /// Queues a goal assignment; applied in FIFO order at the next tick.
    pub fn enqueue_goal(&self, agent_id: usize, goal: usize) {
        self.queue.lock().unwrap().push_back((agent_id, goal));
    }

    /// Spawns the driver thread. `speed` scales wall-clock time into
    /// simulated seconds. Returns false if the driver is already running.
    pub fn start_simulation(&mut self, speed: f64) -> bool {
        if self.handle.is_some() {
            warn!("simulation already running");
            return false;
        }
        self.running.store(true, Ordering::SeqCst);
        let coordinator = self.coordinator.clone();
        let queue = self.queue.clone();
        let running = self.running.clone();
        self.handle = Some(thread::spawn(move || {
            let epoch = Instant::now();
            while running.load(Ordering::SeqCst) {
                let now = epoch.elapsed().as_secs_f64() * speed;
                {
                    let mut coordinator = coordinator.lock().unwrap();
                    let mut pending = queue.lock().unwrap();
                    while let Some((agent_id, goal)) = pending.pop_front() {
                        coordinator.assign_goal(agent_id, goal);
                    }
                    drop(pending);
                    coordinator.update(now);
                }
                thread::sleep(TICK_INTERVAL);
            }
        }));
        info!("simulation started at {speed}x");
        true
    }

    /// Signals the driver thread to stop and joins it. The tick in progress
    /// runs to completion.
    pub fn stop_simulation(&mut self) {
        if self.handle.is_none() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("simulation stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        self.stop_simulation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplanAlgo;
    use crate::coordinator::AgentStatus;
    use crate::map::GridMap;

    #[test]
    fn test_driver_consumes_queued_goals() {
        let map = Arc::new(GridMap::new(1, 6, vec![false; 6]));
        let coordinator = Arc::new(Mutex::new(RealtimeCoordinator::new(
            map,
            &[0],
            ReplanAlgo::Pp,
            11,
        )));
        let mut driver = SimulationDriver::new(coordinator.clone());
        driver.enqueue_goal(0, 5);

        assert!(driver.start_simulation(50.0));
        assert!(!driver.start_simulation(50.0));
        assert!(driver.is_running());

        // At 50x speed the five-step route completes well within a second.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            {
                let coordinator = coordinator.lock().unwrap();
                if coordinator.get_agent_location(0) == Some(5) {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "agent never reached its goal");
            thread::sleep(Duration::from_millis(20));
        }

        driver.stop_simulation();
        assert!(!driver.is_running());
        let coordinator = coordinator.lock().unwrap();
        assert_eq!(coordinator.get_agent_status(0), Some(AgentStatus::Idle));
        assert_eq!(coordinator.get_num_conflicts(), 0);
    }
}
