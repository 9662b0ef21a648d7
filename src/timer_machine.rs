use crate::models::{Stage, Template, TimerConfig};
use serde::Serialize;

pub const COUNTDOWN_START_VALUE: u32 = 3;

/// Run-time record of a timer session. Only `transition` produces new values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub config: TimerConfig,
    pub templates: Vec<Template>,
    pub current_stage_index: usize,
    pub current_round: u32,
    pub time_remaining: u32,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_config_open: bool,
    pub is_templates_open: bool,
    pub has_played_start_sound: bool,
    pub show_countdown: bool,
    pub countdown_value: u32,
}

impl TimerState {
    pub fn new(config: TimerConfig) -> Self {
        let config = config.sanitized();
        Self {
            time_remaining: config.initial_time(),
            config,
            templates: Vec::new(),
            current_stage_index: 0,
            current_round: 1,
            is_running: false,
            is_paused: false,
            is_config_open: false,
            is_templates_open: false,
            has_played_start_sound: false,
            show_countdown: false,
            countdown_value: COUNTDOWN_START_VALUE,
        }
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        self.config.stages.get(self.current_stage_index)
    }

    /// Title of the active stage, empty when the stage list is empty.
    pub fn stage_title(&self) -> &str {
        self.current_stage()
            .map(|stage| stage.title.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerAction {
    SetConfig(TimerConfig),
    AddTemplate(Template),
    DeleteTemplate(String),
    LoadTemplate(TimerConfig),
    StartTimer,
    PauseTimer,
    ResetTimer,
    Tick,
    NextStage,
    ToggleConfig,
    ToggleTemplates,
    SetTemplates(Vec<Template>),
    SetStartSoundPlayed(bool),
    StartCountdown,
    CountdownTick,
    EndCountdown,
}

/// Pure transition function. No clocks, no effects; callers own both.
pub fn transition(state: TimerState, action: TimerAction) -> TimerState {
    match action {
        TimerAction::SetConfig(config) => apply_config(state, config, false),
        TimerAction::AddTemplate(template) => {
            let mut state = state;
            state.templates.push(template);
            state
        }
        TimerAction::DeleteTemplate(template_id) => {
            let mut state = state;
            state.templates.retain(|template| template.id != template_id);
            state
        }
        TimerAction::LoadTemplate(config) => apply_config(state, config, true),
        TimerAction::StartTimer => {
            if state.config.enable_countdown && !state.is_paused {
                TimerState {
                    show_countdown: true,
                    countdown_value: COUNTDOWN_START_VALUE,
                    ..state
                }
            } else {
                TimerState {
                    is_running: true,
                    is_paused: false,
                    has_played_start_sound: false,
                    ..state
                }
            }
        }
        TimerAction::PauseTimer => TimerState {
            is_running: false,
            is_paused: true,
            show_countdown: false,
            ..state
        },
        TimerAction::ResetTimer => reset_run(state),
        TimerAction::Tick => TimerState {
            time_remaining: state.time_remaining.saturating_sub(1),
            ..state
        },
        TimerAction::NextStage => next_stage(state),
        TimerAction::ToggleConfig => TimerState {
            is_config_open: !state.is_config_open,
            is_templates_open: false,
            ..state
        },
        TimerAction::ToggleTemplates => TimerState {
            is_templates_open: !state.is_templates_open,
            is_config_open: false,
            ..state
        },
        TimerAction::SetTemplates(templates) => TimerState { templates, ..state },
        TimerAction::SetStartSoundPlayed(played) => TimerState {
            has_played_start_sound: played,
            ..state
        },
        TimerAction::StartCountdown => TimerState {
            show_countdown: true,
            countdown_value: COUNTDOWN_START_VALUE,
            ..state
        },
        TimerAction::CountdownTick => countdown_tick(state),
        TimerAction::EndCountdown => TimerState {
            show_countdown: false,
            ..state
        },
    }
}

/// Config replacement always restarts playback position.
fn apply_config(state: TimerState, config: TimerConfig, close_drawers: bool) -> TimerState {
    let config = config.sanitized();
    TimerState {
        time_remaining: config.initial_time(),
        config,
        current_stage_index: 0,
        current_round: 1,
        is_running: false,
        is_paused: false,
        is_config_open: if close_drawers {
            false
        } else {
            state.is_config_open
        },
        is_templates_open: if close_drawers {
            false
        } else {
            state.is_templates_open
        },
        has_played_start_sound: false,
        show_countdown: false,
        countdown_value: COUNTDOWN_START_VALUE,
        ..state
    }
}

fn reset_run(state: TimerState) -> TimerState {
    TimerState {
        current_stage_index: 0,
        current_round: 1,
        time_remaining: state.config.initial_time(),
        is_running: false,
        is_paused: false,
        has_played_start_sound: false,
        show_countdown: false,
        countdown_value: COUNTDOWN_START_VALUE,
        ..state
    }
}

/// The final countdown tick is itself the start trigger.
fn countdown_tick(state: TimerState) -> TimerState {
    if state.countdown_value > 1 {
        TimerState {
            countdown_value: state.countdown_value - 1,
            ..state
        }
    } else {
        TimerState {
            show_countdown: false,
            is_running: true,
            is_paused: false,
            has_played_start_sound: false,
            ..state
        }
    }
}

fn next_stage(state: TimerState) -> TimerState {
    // An emptied stage list behaves as one zero-duration stage, so every
    // advance lands back on index 0 and counts as a round boundary.
    let stage_count = state.config.stages.len().max(1);
    let next_index = (state.current_stage_index + 1) % stage_count;
    let is_new_round = next_index == 0;
    let next_round = if is_new_round {
        state.current_round + 1
    } else {
        state.current_round
    };

    if !state.config.is_infinite && is_new_round && next_round > state.config.total_rounds {
        // Terminal: position stays at its last valid value.
        return TimerState {
            is_running: false,
            is_paused: false,
            ..state
        };
    }

    TimerState {
        current_stage_index: next_index,
        current_round: next_round,
        time_remaining: state
            .config
            .stage_at(next_index)
            .map(|stage| stage.duration)
            .unwrap_or(0),
        has_played_start_sound: false,
        ..state
    }
}
