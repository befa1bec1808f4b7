use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::bail;
use brood_contracts::events::EventWriter;

use crate::collaborators::{
    CanvasSurface, Clock, Collaborators, GenerationProvider, IntentInference, TimerSource,
};
use crate::config::MotherConfig;
use crate::event::InboundEvent;
use crate::orchestrator::Orchestrator;
use crate::session::SessionView;
use crate::timers::TimerToken;

const THREAD_NAME: &str = "brood-mother";

pub enum MotherCommand {
    Event(InboundEvent),
    Stop,
}

/// Wakes the orchestrator by posting `timer_fired` into its own queue.
pub struct ChannelTimerSource {
    sender: mpsc::Sender<MotherCommand>,
    stop_flag: Arc<AtomicBool>,
}

impl TimerSource for ChannelTimerSource {
    fn schedule(&mut self, token: TimerToken, delay: Duration) {
        let sender = self.sender.clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let spawned = thread::Builder::new()
            .name(format!("{THREAD_NAME}-timer"))
            .spawn(move || {
                thread::sleep(delay);
                post_timer(&sender, &stop_flag, token);
            });
        // Never drop a token: fire it now instead.
        if let Err(err) = spawned {
            eprintln!(
                "brood-mother timer thread spawn failed, firing token {} now: {err}",
                token.0
            );
            post_timer(&self.sender, &self.stop_flag, token);
        }
    }
}

fn post_timer(
    sender: &mpsc::Sender<MotherCommand>,
    stop_flag: &AtomicBool,
    token: TimerToken,
) -> bool {
    if stop_flag.load(Ordering::SeqCst) {
        return false;
    }
    sender
        .send(MotherCommand::Event(InboundEvent::TimerFired { token }))
        .is_ok()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        unix_epoch_millis()
    }
}

pub fn unix_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Runs an [`Orchestrator`] on its own thread. Producers only ever enqueue.
pub struct MotherHandle {
    sender: Option<mpsc::Sender<MotherCommand>>,
    handle: Option<thread::JoinHandle<()>>,
    view: Arc<Mutex<SessionView>>,
    stop_flag: Arc<AtomicBool>,
}

impl MotherHandle {
    pub fn spawn(
        config: MotherConfig,
        canvas: Box<dyn CanvasSurface>,
        inference: Box<dyn IntentInference>,
        generation: Box<dyn GenerationProvider>,
        events: EventWriter,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let collaborators = Collaborators {
            canvas,
            inference,
            generation,
            timers: Box::new(ChannelTimerSource {
                sender: tx.clone(),
                stop_flag: Arc::clone(&stop_flag),
            }),
            clock: Box::new(SystemClock),
        };
        let orchestrator = Orchestrator::new(config, collaborators, events);
        let view = Arc::new(Mutex::new(orchestrator.view()));
        let worker = MotherWorker {
            orchestrator,
            view: Arc::clone(&view),
        };
        let handle = match thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || worker.run(rx))
        {
            Ok(handle) => handle,
            Err(err) => bail!("Mother thread spawn failed: {err}"),
        };

        Ok(Self {
            sender: Some(tx),
            handle: Some(handle),
            view,
            stop_flag,
        })
    }

    pub fn submit(&self, event: InboundEvent) -> anyhow::Result<()> {
        let Some(tx) = self.sender.as_ref() else {
            bail!("Mother session is not running.");
        };
        if tx.send(MotherCommand::Event(event)).is_err() {
            bail!("Mother session is not running.");
        }
        Ok(())
    }

    /// A producer-side sender, e.g. for a realtime worker thread.
    pub fn sender(&self) -> Option<mpsc::Sender<MotherCommand>> {
        self.sender.clone()
    }

    /// View published after the last handled event.
    pub fn view(&self) -> SessionView {
        match self.view.lock() {
            Ok(view) => view.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(MotherCommand::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MotherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct MotherWorker {
    orchestrator: Orchestrator,
    view: Arc<Mutex<SessionView>>,
}

impl MotherWorker {
    fn run(mut self, rx: mpsc::Receiver<MotherCommand>) {
        self.orchestrator.start();
        self.publish();
        while let Ok(command) = rx.recv() {
            match command {
                MotherCommand::Event(event) => {
                    self.orchestrator.handle(event);
                    self.publish();
                }
                MotherCommand::Stop => break,
            }
        }
    }

    fn publish(&self) {
        if let Ok(mut view) = self.view.lock() {
            *view = self.orchestrator.view();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use brood_contracts::events::EventWriter;

    use super::{post_timer, unix_epoch_millis, MotherCommand, MotherHandle};
    use crate::collaborators::CanvasImage;
    use crate::config::MotherConfig;
    use crate::dryrun::DryrunHost;
    use crate::event::InboundEvent;
    use crate::phase::Phase;
    use crate::placement::Rect;
    use crate::timers::TimerToken;

    fn wait_for_phase(mother: &MotherHandle, phase: Phase) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if mother.view().phase == phase {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn spawn(
        config: MotherConfig,
        host: &DryrunHost,
        events: &EventWriter,
    ) -> anyhow::Result<MotherHandle> {
        let collaborators = host.collaborators();
        MotherHandle::spawn(
            config,
            collaborators.canvas,
            collaborators.inference,
            collaborators.generation,
            events.clone(),
        )
    }

    #[test]
    fn attract_timer_fires_through_the_queue() -> anyhow::Result<()> {
        let host = DryrunHost::new(vec![
            CanvasImage::new("img-1", Rect::new(0.0, 0.0, 64.0, 64.0)).with_label("harbor"),
        ]);
        let config = MotherConfig {
            attract_idle_ms: 50,
            ..MotherConfig::default()
        };
        let events = EventWriter::in_memory("actor-test");
        let mut mother = spawn(config, &host, &events)?;

        assert!(wait_for_phase(&mother, Phase::Watching));
        assert_eq!(host.log.intent_requests().len(), 1);
        assert!(mother.view().realtime_visual);
        mother.stop();
        assert!(!mother.is_running());
        Ok(())
    }

    #[test]
    fn submitted_events_are_handled_in_order() -> anyhow::Result<()> {
        let host = DryrunHost::new(Vec::new());
        let events = EventWriter::in_memory("actor-test");
        let mut mother = spawn(MotherConfig::default(), &host, &events)?;

        mother.submit(InboundEvent::IdleWindowElapsed)?;
        mother.submit(InboundEvent::UserInteraction)?;
        mother.stop();
        assert_eq!(mother.view().phase, Phase::Observing);
        assert!(mother.submit(InboundEvent::Reset).is_err());

        let phases: Vec<String> = events
            .recorded()
            .iter()
            .filter(|row| row["type"] == "mother_phase")
            .filter_map(|row| row["to"].as_str().map(str::to_string))
            .collect();
        assert_eq!(phases, vec!["watching", "observing"]);
        assert_eq!(events.recorded_types().last().map(String::as_str), Some("mother_phase"));
        assert!(unix_epoch_millis() > 0);
        Ok(())
    }

    #[test]
    fn timer_posts_stop_once_the_session_stops() {
        let (tx, rx) = mpsc::channel();
        let stop_flag = AtomicBool::new(false);
        assert!(post_timer(&tx, &stop_flag, TimerToken(7)));
        assert!(matches!(
            rx.try_recv(),
            Ok(MotherCommand::Event(InboundEvent::TimerFired {
                token: TimerToken(7)
            }))
        ));

        stop_flag.store(true, Ordering::SeqCst);
        assert!(!post_timer(&tx, &stop_flag, TimerToken(8)));
        assert!(rx.try_recv().is_err());
    }
}
