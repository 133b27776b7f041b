use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use scenesync::{
    ConnectionId, InboundQueue, Link, ObjectFactory, Replica, Replicator, Scene,
};

use crate::config::SandboxConfig;
use crate::simulation::{simulate_scene, spawn_objects, steer_owned};

const PUMP_INTERVAL: Duration = Duration::from_millis(1);

struct AuthorityNode {
    scene: Scene,
    replicator: Replicator,
    inbox: InboundQueue,
}

struct ObserverNode {
    id: ConnectionId,
    scene: Scene,
    replica: Replica,
    inbox: InboundQueue,
}

#[derive(Debug, Default)]
struct FrameStats {
    frames: u64,
    follower_ticks: u64,
    inputs_applied: u64,
    authority_messages: u64,
    observer_messages: u64,
}

/// Authority and observers in one process, joined by a simulated link.
pub struct Sandbox {
    config: SandboxConfig,
    link: Link,
    authority: AuthorityNode,
    observers: Vec<ObserverNode>,
    running: Arc<AtomicBool>,
    frame_duration: Duration,
    accumulator: Duration,
    last_tick_time: Instant,
    start_time: Instant,
    last_stats_time: Instant,
    stats: FrameStats,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let link = Link::new(config.link.clone());
        let mut authority = AuthorityNode {
            scene: Scene::new(),
            replicator: Replicator::new(config.replication.clone()),
            inbox: InboundQueue::new(),
        };

        let mut observers = Vec::with_capacity(config.observers as usize);
        for raw in 1..=config.observers {
            let id = ConnectionId::new(raw)
                .ok_or_else(|| anyhow::anyhow!("invalid connection id {}", raw))?;
            let inbox = InboundQueue::new();
            let (to_observer, to_authority) = link.connect(id, &authority.inbox, &inbox);
            authority.replicator.add_connection(Box::new(to_observer));
            observers.push(ObserverNode {
                id,
                scene: Scene::new(),
                replica: Replica::new(
                    Box::new(to_authority),
                    ObjectFactory::with_defaults(),
                    config.observer.clone(),
                ),
                inbox,
            });
        }

        let owners: Vec<ConnectionId> = observers.iter().map(|observer| observer.id).collect();
        let spawned = spawn_objects(
            &mut authority.scene,
            config.shared_objects,
            &owners,
            config.owned_per_observer,
        )?;
        log::info!(
            "Spawned {} objects for {} observers",
            spawned.len(),
            observers.len()
        );

        let frame_duration =
            Duration::from_secs_f64(1.0 / config.replication.update_frequency.max(1) as f64);
        let now = Instant::now();
        Ok(Self {
            config,
            link,
            authority,
            observers,
            running: Arc::new(AtomicBool::new(true)),
            frame_duration,
            accumulator: Duration::ZERO,
            last_tick_time: now,
            start_time: now,
            last_stats_time: now,
            stats: FrameStats::default(),
        })
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn run(&mut self) {
        let pump = self.link.spawn_pump(self.running(), PUMP_INTERVAL);

        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            if self
                .config
                .duration
                .is_some_and(|duration| self.start_time.elapsed() >= duration)
            {
                self.running.store(false, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        self.stop_pump(pump);
        self.log_stats();
    }

    fn stop_pump(&self, pump: JoinHandle<()>) {
        self.running.store(false, Ordering::SeqCst);
        if pump.join().is_err() {
            log::error!("Link pump thread panicked");
        }
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        let authority = &mut self.authority;
        self.stats.authority_messages += authority
            .replicator
            .process_inbound(&mut authority.scene, &authority.inbox)
            as u64;

        while self.accumulator >= self.frame_duration {
            self.accumulator -= self.frame_duration;
            self.authority_frame();
        }

        let time = self.start_time.elapsed().as_secs_f32();
        for observer in &mut self.observers {
            self.stats.observer_messages +=
                observer.replica.process_inbound(&mut observer.scene, &observer.inbox) as u64;
            steer_owned(&mut observer.scene, observer.replica.owned_objects(), time);
            observer.replica.update(&mut observer.scene, delta.as_secs_f32());
        }

        if self.last_stats_time.elapsed() >= self.config.stats_interval {
            self.last_stats_time = Instant::now();
            self.log_stats();
        }
    }

    fn authority_frame(&mut self) {
        let authority = &mut self.authority;
        let overtime = self.accumulator.as_secs_f32();
        let ticks = authority.replicator.begin_frame(overtime);

        let dt = authority.replicator.follower().follower_time_step();
        let time = self.start_time.elapsed().as_secs_f32();
        for tick in 0..ticks {
            let tick_time = time - (ticks - tick - 1) as f32 * dt;
            self.stats.inputs_applied += simulate_scene(&mut authority.scene, dt, tick_time) as u64;
        }

        authority.replicator.send_updates(&mut authority.scene);
        self.stats.frames += 1;
        self.stats.follower_ticks += ticks as u64;
    }

    fn log_stats(&self) {
        let replicator = &self.authority.replicator;
        let link = self.link.stats();
        log::info!(
            "frame {} | {} frames, {} follower ticks, {} inputs applied | link: {} sent, {} delivered, {} dropped, {} in flight",
            replicator.current_frame(),
            self.stats.frames,
            self.stats.follower_ticks,
            self.stats.inputs_applied,
            link.messages_sent,
            link.messages_delivered,
            link.messages_dropped,
            self.link.in_flight()
        );

        for state in replicator.connections() {
            let sync = state.sync();
            log::info!(
                "  {}: synchronized={} ping={}ms input_delay={} buffer={} replicated={}",
                state.id(),
                sync.is_synchronized(),
                sync.ping_ms(),
                sync.input_delay(),
                sync.input_buffer_size(),
                state.replicated_count()
            );
        }

        for observer in &self.observers {
            let frame = observer
                .replica
                .current_frame()
                .map_or_else(|| "-".to_string(), |frame| frame.to_string());
            log::info!(
                "  observer {}: frame {} objects={} owned={} feedback_delay={}",
                observer.id.to_raw(),
                frame,
                observer.scene.len(),
                observer.replica.owned_objects().len(),
                observer.replica.feedback_delay()
            );
        }
        log::debug!(
            "messages handled: authority={} observers={}",
            self.stats.authority_messages,
            self.stats.observer_messages
        );
    }
}
