use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub const NEW_STAGE_DURATION: u32 = 60;
pub const NEW_STAGE_SOUND: &str = "bell";
pub const EXPORT_FALLBACK_NAME: &str = "Exported Template";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub title: String,
    pub duration: u32,
    pub start_sound_id: String,
    pub end_sound_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub stages: Vec<Stage>,
    pub total_rounds: u32,
    pub is_infinite: bool,
    pub end_of_round_sound_id: Option<String>,
    pub enable_color_transition: bool,
    pub enable_vibration: bool,
    pub enable_voice_announcements: bool,
    pub accent_color: String,
    pub enable_countdown: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                Stage {
                    id: "1".to_string(),
                    title: "Prepare".to_string(),
                    duration: 10,
                    start_sound_id: "bell".to_string(),
                    end_sound_id: "bell".to_string(),
                },
                Stage {
                    id: "2".to_string(),
                    title: "Fight".to_string(),
                    duration: 180,
                    start_sound_id: "triple-bell".to_string(),
                    end_sound_id: "long-bell".to_string(),
                },
                Stage {
                    id: "3".to_string(),
                    title: "Rest".to_string(),
                    duration: 60,
                    start_sound_id: "ding".to_string(),
                    end_sound_id: "buzzer".to_string(),
                },
            ],
            total_rounds: 5,
            is_infinite: false,
            end_of_round_sound_id: Some("gong".to_string()),
            enable_color_transition: true,
            enable_vibration: true,
            enable_voice_announcements: false,
            accent_color: "blue".to_string(),
            enable_countdown: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

impl TimerConfig {
    /// Clamps values a hand-edited or imported config could break on.
    pub fn sanitized(mut self) -> Self {
        if self.total_rounds == 0 {
            self.total_rounds = 1;
        }
        self
    }

    pub fn stage_at(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Duration of the first stage, zero when no stages exist.
    pub fn initial_time(&self) -> u32 {
        self.stages.first().map(|stage| stage.duration).unwrap_or(0)
    }

    /// Appends a numbered stage with stock values and returns its id.
    pub fn add_stage(&mut self) -> String {
        let id = generate_id("stage");
        self.stages.push(Stage {
            id: id.clone(),
            title: format!("Stage {}", self.stages.len() + 1),
            duration: NEW_STAGE_DURATION,
            start_sound_id: NEW_STAGE_SOUND.to_string(),
            end_sound_id: NEW_STAGE_SOUND.to_string(),
        });
        id
    }

    /// Replaces the stage whose id matches `updated`.
    pub fn update_stage(&mut self, updated: Stage) -> bool {
        match self.stages.iter_mut().find(|stage| stage.id == updated.id) {
            Some(stage) => {
                *stage = updated;
                true
            }
            None => false,
        }
    }

    /// Removes a stage by id. The last remaining stage cannot be removed.
    pub fn remove_stage(&mut self, stage_id: &str) -> bool {
        if self.stages.len() <= 1 {
            return false;
        }
        let before = self.stages.len();
        self.stages.retain(|stage| stage.id != stage_id);
        self.stages.len() < before
    }

    /// Swaps the stage at `index` with its neighbor in `direction`.
    pub fn move_stage(&mut self, index: usize, direction: MoveDirection) -> bool {
        if index >= self.stages.len() {
            return false;
        }
        let target = match direction {
            MoveDirection::Up => {
                if index == 0 {
                    return false;
                }
                index - 1
            }
            MoveDirection::Down => {
                if index + 1 >= self.stages.len() {
                    return false;
                }
                index + 1
            }
        };
        self.stages.swap(index, target);
        true
    }

    /// Drag-and-drop reorder: removes the stage at `from` and reinserts it at `to`.
    pub fn reorder_stages(&mut self, from: usize, to: usize) -> bool {
        if from == to || from >= self.stages.len() || to >= self.stages.len() {
            return false;
        }
        let stage = self.stages.remove(from);
        self.stages.insert(to, stage);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub config: TimerConfig,
    pub created_at: i64,
}

impl Template {
    pub fn new(name: impl Into<String>, config: TimerConfig) -> Self {
        Self {
            id: generate_id("template"),
            name: name.into(),
            config,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigExport<'a> {
    name: &'a str,
    config: &'a TimerConfig,
    exported_at: i64,
}

/// Renders a config as a shareable JSON document. An empty name falls back to
/// a stock label.
pub fn export_config_json(name: &str, config: &TimerConfig) -> Result<String, serde_json::Error> {
    let name = if name.is_empty() {
        EXPORT_FALLBACK_NAME
    } else {
        name
    };
    serde_json::to_string_pretty(&ConfigExport {
        name,
        config,
        exported_at: Utc::now().timestamp_millis(),
    })
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique id with a readable prefix, e.g. `stage-1755820800000-3`.
pub fn generate_id(prefix: &str) -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{counter}", Utc::now().timestamp_millis())
}

/// Formats seconds as `m:ss` for display, e.g. `185` becomes `3:05`.
pub fn format_duration(total_seconds: u32) -> String {
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes}:{seconds:02}")
}
