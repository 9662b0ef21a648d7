use crate::effects::{EffectDispatcher, RunGuard, STAGE_END_VIBRATION, STAGE_START_VIBRATION};
use crate::error::{ServiceError, ServiceResult};
use crate::events::{self, TimerEvent};
use crate::models::{self, Template, TimerConfig};
use crate::scheduler::{self, ClockMessage, Cue, SchedulerTimings, TickScheduler};
use crate::sounds::{COUNTDOWN_TICK_SOUND, SoundInfo};
use crate::store::TemplateStore;
use crate::timer_machine::{TimerAction, TimerState, transition};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Async handle to a running timer. Owns the driver task; dropping the
/// handle shuts the driver down once queued commands drain.
pub struct TimerService {
    command_tx: mpsc::Sender<TimerAction>,
    state_rx: watch::Receiver<TimerState>,
    event_tx: broadcast::Sender<TimerEvent>,
    dispatcher: EffectDispatcher,
    driver: JoinHandle<()>,
}

impl TimerService {
    /// Spawns the driver onto the current tokio runtime.
    pub fn new(
        config: TimerConfig,
        dispatcher: EffectDispatcher,
        store: Arc<dyn TemplateStore>,
    ) -> Self {
        Self::with_options(config, dispatcher, store, None, SchedulerTimings::default())
    }

    pub fn with_options(
        config: TimerConfig,
        dispatcher: EffectDispatcher,
        store: Arc<dyn TemplateStore>,
        run_guard: Option<Arc<dyn RunGuard>>,
        timings: SchedulerTimings,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (clock_tx, clock_rx) = mpsc::unbounded_channel();
        let event_tx = events::channel();
        let state = TimerState::new(config);
        let (state_tx, state_rx) = watch::channel(state.clone());

        let driver = Driver {
            state,
            scheduler: TickScheduler::with_timings(clock_tx, dispatcher.clone(), timings),
            dispatcher: dispatcher.clone(),
            store,
            run_guard,
            state_tx,
            event_tx: event_tx.clone(),
        };
        let driver = tokio::spawn(driver.run(command_rx, clock_rx));

        Self {
            command_tx,
            state_rx,
            event_tx,
            dispatcher,
            driver,
        }
    }

    pub fn snapshot(&self) -> TimerState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel carrying a full state snapshot after every transition.
    pub fn watch_state(&self) -> watch::Receiver<TimerState> {
        self.state_rx.clone()
    }

    /// Edge-triggered event stream. Slow subscribers may observe lag.
    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.driver.is_finished()
    }

    pub async fn dispatch(&self, action: TimerAction) -> ServiceResult<()> {
        self.command_tx
            .send(action)
            .await
            .map_err(|_| ServiceError::Closed)
    }

    pub async fn start(&self) -> ServiceResult<()> {
        self.dispatch(TimerAction::StartTimer).await
    }

    pub async fn pause(&self) -> ServiceResult<()> {
        self.dispatch(TimerAction::PauseTimer).await
    }

    pub async fn reset(&self) -> ServiceResult<()> {
        self.dispatch(TimerAction::ResetTimer).await
    }

    pub async fn set_config(&self, config: TimerConfig) -> ServiceResult<()> {
        self.dispatch(TimerAction::SetConfig(config)).await
    }

    pub async fn toggle_config(&self) -> ServiceResult<()> {
        self.dispatch(TimerAction::ToggleConfig).await
    }

    pub async fn toggle_templates(&self) -> ServiceResult<()> {
        self.dispatch(TimerAction::ToggleTemplates).await
    }

    /// Replaces the live config with the template's snapshot.
    pub async fn load_template(&self, template: &Template) -> ServiceResult<()> {
        self.dispatch(TimerAction::LoadTemplate(template.config.clone()))
            .await
    }

    /// Saves the live config under `name`. Blank names save nothing.
    pub async fn save_template(&self, name: &str) -> ServiceResult<Option<Template>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let template = Template::new(name, self.snapshot().config);
        self.dispatch(TimerAction::AddTemplate(template.clone()))
            .await?;
        Ok(Some(template))
    }

    pub async fn delete_template(&self, template_id: &str) -> ServiceResult<()> {
        self.dispatch(TimerAction::DeleteTemplate(template_id.to_string()))
            .await
    }

    /// Shareable JSON document of the live config.
    pub fn export_config(&self, name: &str) -> Result<String, serde_json::Error> {
        models::export_config_json(name, &self.snapshot().config)
    }

    pub fn add_custom_sound(&self, sound_id: &str, name: &str) -> bool {
        self.dispatcher.add_custom_sound(sound_id, name)
    }

    pub fn remove_custom_sound(&self, sound_id: &str) -> bool {
        self.dispatcher.remove_custom_sound(sound_id)
    }

    pub fn sounds(&self) -> Vec<SoundInfo> {
        self.dispatcher.sounds()
    }
}

/// Single owner of the timer state. Consumes commands and clock messages on
/// one task, so every transition and its arming step are sequential.
struct Driver {
    state: TimerState,
    scheduler: TickScheduler,
    dispatcher: EffectDispatcher,
    store: Arc<dyn TemplateStore>,
    run_guard: Option<Arc<dyn RunGuard>>,
    state_tx: watch::Sender<TimerState>,
    event_tx: broadcast::Sender<TimerEvent>,
}

impl Driver {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<TimerAction>,
        mut clock_rx: mpsc::UnboundedReceiver<ClockMessage>,
    ) {
        self.load_templates();

        loop {
            tokio::select! {
                biased;
                command = command_rx.recv() => match command {
                    Some(action) => self.apply(action, false),
                    None => break,
                },
                Some(message) = clock_rx.recv() => {
                    if self.scheduler.is_stale(&message) {
                        tracing::debug!(
                            epoch = message.epoch,
                            action = ?message.action,
                            "dropped stale clock message"
                        );
                        continue;
                    }
                    self.apply(message.action, true);
                }
            }
        }

        self.scheduler.invalidate();
        tracing::debug!("timer driver stopped");
    }

    fn load_templates(&mut self) {
        let templates = match self.store.load() {
            Ok(templates) => templates,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load saved templates");
                return;
            }
        };
        if templates.is_empty() {
            return;
        }
        tracing::info!(count = templates.len(), "loaded saved templates");
        self.apply_inner(TimerAction::SetTemplates(templates), false, false);
    }

    fn apply(&mut self, action: TimerAction, from_clock: bool) {
        self.apply_inner(action, from_clock, true);
    }

    fn apply_inner(&mut self, action: TimerAction, from_clock: bool, persist: bool) {
        // The countdown clock sounds on every firing, including the one that
        // starts the run.
        if from_clock
            && self.state.show_countdown
            && matches!(action, TimerAction::CountdownTick)
        {
            self.dispatcher.request_sound(COUNTDOWN_TICK_SOUND);
        }
        if from_clock && matches!(action, TimerAction::NextStage) {
            self.scheduler.stage_advance_delivered();
        }
        if scheduler::invalidates_pending_timers(&action) {
            self.scheduler.invalidate();
        }

        let prev = self.state.clone();
        let mut next = transition(prev.clone(), action.clone());

        let plan = scheduler::plan(&next, self.scheduler.advance_pending());
        for cue in &plan.cues {
            self.fire_cue(cue);
        }
        if plan.latch_start_cues {
            next = transition(next, TimerAction::SetStartSoundPlayed(true));
        }
        self.scheduler.arm(&plan, from_clock);

        if persist && prev.templates != next.templates {
            if let Err(err) = self.store.save(&next.templates) {
                tracing::warn!(error = %err, "failed to persist templates");
            }
        }
        self.sync_run_guard(&prev, &next);

        self.state = next;
        self.state_tx.send_replace(self.state.clone());
        self.emit_events(&prev, &action);
    }

    fn fire_cue(&self, cue: &Cue) {
        match cue {
            Cue::StageStart {
                sound_id,
                vibrate,
                announce,
            } => {
                self.dispatcher.request_sound(sound_id);
                if *vibrate {
                    self.dispatcher.request_vibration(STAGE_START_VIBRATION);
                }
                if let Some(title) = announce {
                    self.dispatcher.request_announcement(title);
                }
            }
            Cue::StageEnd { sound_id, vibrate } => {
                self.dispatcher.request_sound(sound_id);
                if *vibrate {
                    self.dispatcher.request_vibration(STAGE_END_VIBRATION);
                }
            }
        }
    }

    fn sync_run_guard(&self, prev: &TimerState, next: &TimerState) {
        if let Some(guard) = self.run_guard.as_ref() {
            if !prev.is_running && next.is_running {
                guard.acquire();
            } else if prev.is_running && !next.is_running {
                guard.release();
            }
        }
    }

    fn emit_events(&self, prev: &TimerState, action: &TimerAction) {
        let next = &self.state;

        if !prev.is_running && next.is_running {
            tracing::info!(
                stage = next.stage_title(),
                round = next.current_round,
                "run started"
            );
            events::emit(&self.event_tx, TimerEvent::Started);
        }

        match action {
            TimerAction::PauseTimer if prev.is_running || prev.show_countdown => {
                events::emit(&self.event_tx, TimerEvent::Paused);
            }
            TimerAction::ResetTimer => {
                events::emit(&self.event_tx, TimerEvent::Reset);
            }
            TimerAction::SetConfig(_) | TimerAction::LoadTemplate(_) => {
                events::emit(&self.event_tx, TimerEvent::ConfigReplaced);
            }
            TimerAction::CountdownTick if next.show_countdown => {
                events::emit(
                    &self.event_tx,
                    TimerEvent::CountdownTick {
                        value: next.countdown_value,
                    },
                );
            }
            TimerAction::Tick if next.is_running => {
                events::emit(
                    &self.event_tx,
                    TimerEvent::Tick {
                        time_remaining: next.time_remaining,
                        stage_index: next.current_stage_index,
                        round: next.current_round,
                    },
                );
            }
            TimerAction::NextStage if next.is_running => {
                events::emit(
                    &self.event_tx,
                    TimerEvent::StageChanged {
                        stage_index: next.current_stage_index,
                        round: next.current_round,
                        title: next.stage_title().to_string(),
                    },
                );
            }
            TimerAction::NextStage if prev.is_running && !next.is_running => {
                tracing::info!(round = next.current_round, "run completed");
                events::emit(&self.event_tx, TimerEvent::Completed);
            }
            _ => {}
        }

        if prev.templates != next.templates {
            events::emit(
                &self.event_tx,
                TimerEvent::TemplatesChanged {
                    count: next.templates.len(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{CueChannel, CueOutcome, CueRecord};
    use crate::models::Stage;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};
    use tokio::time::timeout;

    fn stage(id: &str, title: &str, duration: u32, start: &str, end: &str) -> Stage {
        Stage {
            id: id.to_string(),
            title: title.to_string(),
            duration,
            start_sound_id: start.to_string(),
            end_sound_id: end.to_string(),
        }
    }

    fn base_config(stages: Vec<Stage>, total_rounds: u32) -> TimerConfig {
        TimerConfig {
            stages,
            total_rounds,
            is_infinite: false,
            end_of_round_sound_id: None,
            enable_vibration: false,
            enable_voice_announcements: false,
            enable_countdown: false,
            ..TimerConfig::default()
        }
    }

    fn service(config: TimerConfig) -> TimerService {
        TimerService::new(
            config,
            EffectDispatcher::silent(),
            Arc::new(MemoryStore::new()),
        )
    }

    async fn next_event(rx: &mut broadcast::Receiver<TimerEvent>) -> TimerEvent {
        timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn assert_silent(rx: &mut broadcast::Receiver<TimerEvent>, window: Duration) {
        tokio::time::sleep(window).await;
        match rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            other => panic!("expected silence, got {other:?}"),
        }
    }

    fn delivered_sounds(records: &[CueRecord]) -> Vec<&str> {
        records
            .iter()
            .filter(|record| {
                record.channel == CueChannel::Sound && record.outcome != CueOutcome::Debounced
            })
            .map(|record| record.detail.as_str())
            .collect()
    }

    #[derive(Default)]
    struct CountingGuard {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl RunGuard for CountingGuard {
        fn acquire(&self) {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_run_and_completion_event_sequence() {
        let config = TimerConfig {
            enable_countdown: true,
            ..base_config(vec![stage("w", "Work", 2, "bell", "ding")], 1)
        };
        let service = service(config);
        let mut events = service.subscribe();

        service.start().await.expect("start");

        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::CountdownTick { value: 2 }
        );
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::CountdownTick { value: 1 }
        );
        assert_eq!(next_event(&mut events).await, TimerEvent::Started);
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::Tick {
                time_remaining: 1,
                stage_index: 0,
                round: 1,
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::Tick {
                time_remaining: 0,
                stage_index: 0,
                round: 1,
            }
        );
        assert_eq!(next_event(&mut events).await, TimerEvent::Completed);

        let state = service.snapshot();
        assert!(!state.is_running);
        assert!(!state.is_paused);
        assert_eq!(state.current_round, 1);
        assert_eq!(state.current_stage_index, 0);
        assert_eq!(state.time_remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_cancels_the_pending_advance_and_resume_rearms_it() {
        let config = base_config(
            vec![
                stage("a", "Work", 1, "bell", "ding"),
                stage("b", "Rest", 5, "chime", "buzzer"),
            ],
            1,
        );
        let service = service(config);
        let mut events = service.subscribe();

        service.start().await.expect("start");
        assert_eq!(next_event(&mut events).await, TimerEvent::Started);
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::Tick {
                time_remaining: 0,
                stage_index: 0,
                round: 1,
            }
        );

        // The delayed stage advance is now armed; pausing must cancel it.
        service.pause().await.expect("pause");
        assert_eq!(next_event(&mut events).await, TimerEvent::Paused);
        assert_silent(&mut events, Duration::from_secs(5)).await;

        let paused = service.snapshot();
        assert!(paused.is_paused);
        assert_eq!(paused.current_stage_index, 0);
        assert_eq!(paused.time_remaining, 0);

        // Resume skips the countdown and re-arms the advance from scratch.
        service.start().await.expect("resume");
        assert_eq!(next_event(&mut events).await, TimerEvent::Started);
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::StageChanged {
                stage_index: 1,
                round: 1,
                title: "Rest".to_string(),
            }
        );
        assert_eq!(service.snapshot().time_remaining, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_the_countdown_silences_the_clock() {
        let dispatcher = EffectDispatcher::silent();
        let config = TimerConfig {
            enable_countdown: true,
            ..base_config(vec![stage("w", "Work", 5, "bell", "ding")], 1)
        };
        let service = TimerService::new(config, dispatcher.clone(), Arc::new(MemoryStore::new()));
        let mut events = service.subscribe();

        service.start().await.expect("start");
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::CountdownTick { value: 2 }
        );

        service.reset().await.expect("reset");
        assert_eq!(next_event(&mut events).await, TimerEvent::Reset);
        assert_silent(&mut events, Duration::from_secs(5)).await;

        let beeps = dispatcher
            .records()
            .iter()
            .filter(|record| record.detail == COUNTDOWN_TICK_SOUND)
            .count();
        assert_eq!(beeps, 1);
        assert_eq!(service.snapshot().countdown_value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cues_follow_the_stage_end_round_gong_stage_start_order() {
        let dispatcher = EffectDispatcher::silent();
        let config = TimerConfig {
            end_of_round_sound_id: Some("gong".to_string()),
            ..base_config(vec![stage("a", "Work", 1, "bell", "ding")], 2)
        };
        let service = TimerService::new(config, dispatcher.clone(), Arc::new(MemoryStore::new()));
        let mut events = service.subscribe();

        service.start().await.expect("start");
        loop {
            if next_event(&mut events).await == TimerEvent::Completed {
                break;
            }
        }

        let records = dispatcher.records();
        assert_eq!(
            delivered_sounds(&records),
            vec!["bell", "ding", "gong", "bell", "ding", "gong"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn templates_flush_to_the_store_and_load_on_startup() {
        let store = Arc::new(MemoryStore::new());
        let seeded = Template::new("Seeded", TimerConfig::default());
        store.save(std::slice::from_ref(&seeded)).expect("seed");

        let service = TimerService::new(
            TimerConfig::default(),
            EffectDispatcher::silent(),
            store.clone(),
        );
        let mut state_rx = service.watch_state();
        let loaded = timeout(
            Duration::from_secs(5),
            state_rx.wait_for(|state| !state.templates.is_empty()),
        )
        .await
        .expect("templates never loaded")
        .expect("watch closed");
        assert_eq!(loaded.templates[0].name, "Seeded");
        drop(loaded);

        let mut events = service.subscribe();
        let saved = service
            .save_template("Morning")
            .await
            .expect("save")
            .expect("template created");
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::TemplatesChanged { count: 2 }
        );
        assert_eq!(store.load().expect("store load").len(), 2);

        assert!(
            service
                .save_template("   ")
                .await
                .expect("blank save")
                .is_none()
        );

        service.delete_template(&saved.id).await.expect("delete");
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::TemplatesChanged { count: 1 }
        );
        service.delete_template(&seeded.id).await.expect("delete");
        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::TemplatesChanged { count: 0 }
        );
        assert!(store.load().expect("store load").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loading_a_template_replaces_the_config_and_resets_position() {
        let config = base_config(vec![stage("a", "Work", 9, "bell", "ding")], 3);
        let service = service(config);
        let mut events = service.subscribe();

        service.start().await.expect("start");
        assert_eq!(next_event(&mut events).await, TimerEvent::Started);

        let template = Template::new(
            "Sprint",
            base_config(vec![stage("s", "Sprint", 30, "airhorn", "gong")], 8),
        );
        service.load_template(&template).await.expect("load");

        let mut state_rx = service.watch_state();
        let state = timeout(
            Duration::from_secs(5),
            state_rx.wait_for(|state| state.config.total_rounds == 8),
        )
        .await
        .expect("config never replaced")
        .expect("watch closed");
        assert!(!state.is_running);
        assert_eq!(state.time_remaining, 30);
        assert_eq!(state.current_stage_index, 0);
        assert_eq!(state.current_round, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_guard_tracks_running_edges() {
        let guard = Arc::new(CountingGuard::default());
        let config = base_config(vec![stage("a", "Work", 2, "bell", "ding")], 1);
        let service = TimerService::with_options(
            config,
            EffectDispatcher::silent(),
            Arc::new(MemoryStore::new()),
            Some(guard.clone()),
            SchedulerTimings::default(),
        );
        let mut events = service.subscribe();

        service.start().await.expect("start");
        assert_eq!(next_event(&mut events).await, TimerEvent::Started);
        assert_eq!(guard.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(guard.released.load(Ordering::SeqCst), 0);

        service.pause().await.expect("pause");
        assert_eq!(next_event(&mut events).await, TimerEvent::Paused);
        assert_eq!(guard.released.load(Ordering::SeqCst), 1);

        service.start().await.expect("resume");
        assert_eq!(next_event(&mut events).await, TimerEvent::Started);
        assert_eq!(guard.acquired.load(Ordering::SeqCst), 2);

        loop {
            if next_event(&mut events).await == TimerEvent::Completed {
                break;
            }
        }
        assert_eq!(guard.acquired.load(Ordering::SeqCst), 2);
        assert_eq!(guard.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn drawer_toggles_do_not_disturb_the_run() {
        let config = base_config(vec![stage("a", "Work", 3, "bell", "ding")], 1);
        let service = service(config);
        let mut events = service.subscribe();

        service.start().await.expect("start");
        assert_eq!(next_event(&mut events).await, TimerEvent::Started);

        service.toggle_config().await.expect("toggle config");
        service.toggle_templates().await.expect("toggle templates");

        assert_eq!(
            next_event(&mut events).await,
            TimerEvent::Tick {
                time_remaining: 2,
                stage_index: 0,
                round: 1,
            }
        );
        let state = service.snapshot();
        assert!(state.is_templates_open);
        assert!(!state.is_config_open);
        assert!(state.is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_driver() {
        let config = base_config(vec![stage("a", "Work", 3, "bell", "ding")], 1);
        let service = service(config);
        let mut events = service.subscribe();

        drop(service);

        let result = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("driver never shut down");
        assert!(matches!(result, Err(RecvError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_sounds_are_exposed_through_the_handle() {
        let service = service(base_config(vec![stage("a", "Work", 3, "bell", "ding")], 1));

        assert!(service.add_custom_sound("custom-1", "Cowbell"));
        assert_eq!(service.sounds().len(), 10);
        assert!(service.remove_custom_sound("custom-1"));
        assert_eq!(service.sounds().len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn export_config_reflects_the_live_config() {
        let service = service(base_config(vec![stage("a", "Work", 3, "bell", "ding")], 7));

        let json = service.export_config("Club Night").expect("export");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");

        assert_eq!(value["name"], "Club Night");
        assert_eq!(value["config"]["totalRounds"], 7);
    }
}
