use crate::effects::{EffectDispatcher, END_OF_ROUND_VIBRATION};
use crate::timer_machine::{TimerAction, TimerState};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TICK_INTERVAL: Duration = Duration::from_millis(1000);
pub const COUNTDOWN_INTERVAL: Duration = Duration::from_millis(1000);
pub const STAGE_ADVANCE_DELAY: Duration = Duration::from_millis(1000);
pub const ROUND_CUE_DELAY: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTimings {
    pub tick_interval: Duration,
    pub countdown_interval: Duration,
    pub stage_advance_delay: Duration,
    pub round_cue_delay: Duration,
}

impl Default for SchedulerTimings {
    fn default() -> Self {
        Self {
            tick_interval: TICK_INTERVAL,
            countdown_interval: COUNTDOWN_INTERVAL,
            stage_advance_delay: STAGE_ADVANCE_DELAY,
            round_cue_delay: ROUND_CUE_DELAY,
        }
    }
}

/// Clock-originated action, stamped with the scheduler epoch current when it
/// was armed. Messages from a superseded epoch are dropped on receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockMessage {
    pub epoch: u64,
    pub action: TimerAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicKind {
    Countdown,
    RunTick,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cue {
    StageStart {
        sound_id: String,
        vibrate: bool,
        announce: Option<String>,
    },
    StageEnd {
        sound_id: String,
        vibrate: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundCue {
    pub sound_id: String,
    pub vibrate: bool,
}

/// What a freshly published state requires of the scheduler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickPlan {
    pub cues: Vec<Cue>,
    pub latch_start_cues: bool,
    pub periodic: Option<PeriodicKind>,
    pub arm_stage_advance: bool,
    pub round_cue: Option<RoundCue>,
}

/// Actions after which no previously armed timer may deliver.
pub fn invalidates_pending_timers(action: &TimerAction) -> bool {
    matches!(
        action,
        TimerAction::SetConfig(_)
            | TimerAction::LoadTemplate(_)
            | TimerAction::PauseTimer
            | TimerAction::ResetTimer
    )
}

/// Derives the cue and arming plan for a state. `advance_pending` is true
/// while a delayed stage advance is already in flight, which suppresses a
/// second end-of-stage firing for the same expiry.
pub fn plan(state: &TimerState, advance_pending: bool) -> TickPlan {
    let mut plan = TickPlan::default();

    if state.show_countdown {
        plan.periodic = Some(PeriodicKind::Countdown);
        return plan;
    }
    if !state.is_running {
        return plan;
    }

    if state.time_remaining > 0 {
        if !state.has_played_start_sound {
            if let Some(stage) = state.current_stage() {
                plan.cues.push(Cue::StageStart {
                    sound_id: stage.start_sound_id.clone(),
                    vibrate: state.config.enable_vibration,
                    announce: state
                        .config
                        .enable_voice_announcements
                        .then(|| stage.title.clone()),
                });
                plan.latch_start_cues = true;
            }
        }
        plan.periodic = Some(PeriodicKind::RunTick);
        return plan;
    }

    if advance_pending {
        return plan;
    }

    if let Some(stage) = state.current_stage() {
        plan.cues.push(Cue::StageEnd {
            sound_id: stage.end_sound_id.clone(),
            vibrate: state.config.enable_vibration,
        });
        let wraps_to_round_start =
            (state.current_stage_index + 1) % state.config.stages.len() == 0;
        if wraps_to_round_start {
            if let Some(sound_id) = &state.config.end_of_round_sound_id {
                if !sound_id.is_empty() {
                    plan.round_cue = Some(RoundCue {
                        sound_id: sound_id.clone(),
                        vibrate: state.config.enable_vibration,
                    });
                }
            }
        }
    }
    plan.arm_stage_advance = true;
    plan
}

/// Owns every live timer task. At most one periodic chain exists at a time;
/// arming always aborts the task it replaces.
pub struct TickScheduler {
    clock_tx: mpsc::UnboundedSender<ClockMessage>,
    dispatcher: EffectDispatcher,
    timings: SchedulerTimings,
    epoch: u64,
    periodic: Option<(PeriodicKind, JoinHandle<()>)>,
    stage_advance: Option<JoinHandle<()>>,
    round_cue: Option<JoinHandle<()>>,
}

impl TickScheduler {
    pub fn new(clock_tx: mpsc::UnboundedSender<ClockMessage>, dispatcher: EffectDispatcher) -> Self {
        Self::with_timings(clock_tx, dispatcher, SchedulerTimings::default())
    }

    pub fn with_timings(
        clock_tx: mpsc::UnboundedSender<ClockMessage>,
        dispatcher: EffectDispatcher,
        timings: SchedulerTimings,
    ) -> Self {
        Self {
            clock_tx,
            dispatcher,
            timings,
            epoch: 0,
            periodic: None,
            stage_advance: None,
            round_cue: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_stale(&self, message: &ClockMessage) -> bool {
        message.epoch != self.epoch
    }

    /// True while a delayed stage advance is armed and undelivered.
    pub fn advance_pending(&self) -> bool {
        self.stage_advance.is_some()
    }

    /// Marks the armed stage advance as consumed. Must be called when its
    /// clock message is accepted, before the next plan is derived.
    pub fn stage_advance_delivered(&mut self) {
        self.stage_advance = None;
    }

    /// Aborts every pending timer and bumps the epoch so messages already
    /// sitting in the clock queue are discarded on receipt.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        if let Some((_, handle)) = self.periodic.take() {
            handle.abort();
        }
        if let Some(handle) = self.stage_advance.take() {
            handle.abort();
        }
        if let Some(handle) = self.round_cue.take() {
            handle.abort();
        }
        tracing::debug!(epoch = self.epoch, "pending timers invalidated");
    }

    /// Applies the arming half of a plan. `tick_consumed` marks that the
    /// action just processed was this scheduler's own periodic firing, whose
    /// chain must be re-armed even though the regime did not change.
    pub fn arm(&mut self, plan: &TickPlan, tick_consumed: bool) {
        self.rearm_periodic(plan.periodic, tick_consumed);

        if plan.arm_stage_advance {
            if let Some(handle) = self.stage_advance.take() {
                handle.abort();
            }
            let handle =
                self.spawn_clock(self.timings.stage_advance_delay, TimerAction::NextStage);
            self.stage_advance = Some(handle);
        }

        if let Some(cue) = &plan.round_cue {
            if let Some(handle) = self.round_cue.take() {
                handle.abort();
            }
            self.round_cue = Some(self.spawn_round_cue(cue.clone()));
        }
    }

    fn rearm_periodic(&mut self, desired: Option<PeriodicKind>, tick_consumed: bool) {
        let armed = self.periodic.as_ref().map(|(kind, _)| *kind);
        if armed == desired && !tick_consumed {
            return;
        }
        if let Some((_, handle)) = self.periodic.take() {
            handle.abort();
        }
        if let Some(kind) = desired {
            let (delay, action) = match kind {
                PeriodicKind::Countdown => {
                    (self.timings.countdown_interval, TimerAction::CountdownTick)
                }
                PeriodicKind::RunTick => (self.timings.tick_interval, TimerAction::Tick),
            };
            let handle = self.spawn_clock(delay, action);
            self.periodic = Some((kind, handle));
        }
    }

    fn spawn_clock(&self, delay: Duration, action: TimerAction) -> JoinHandle<()> {
        let tx = self.clock_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ClockMessage { epoch, action });
        })
    }

    fn spawn_round_cue(&self, cue: RoundCue) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let delay = self.timings.round_cue_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.request_sound(&cue.sound_id);
            if cue.vibrate {
                dispatcher.request_vibration(END_OF_ROUND_VIBRATION);
            }
        })
    }
}
