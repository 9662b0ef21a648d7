use serde::{Deserialize, Serialize};

/// Sound requested once per countdown tick.
pub const COUNTDOWN_TICK_SOUND: &str = "beep";

const BUILTIN_SOUNDS: &[(&str, &str)] = &[
    ("bell", "Bell"),
    ("ding", "Ding"),
    ("buzzer", "Buzzer"),
    ("chime", "Chime"),
    ("beep", "Beep"),
    ("gong", "Gong"),
    ("airhorn", "Air Horn"),
    ("triple-bell", "Triple Bell"),
    ("long-bell", "Long Bell"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundInfo {
    pub id: String,
    pub name: String,
}

/// Built-in cue sounds plus user-registered custom ones.
#[derive(Debug, Clone, Default)]
pub struct SoundCatalog {
    custom: Vec<SoundInfo>,
}

impl SoundCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_builtin(sound_id: &str) -> bool {
        BUILTIN_SOUNDS.iter().any(|(id, _)| *id == sound_id)
    }

    pub fn builtin() -> Vec<SoundInfo> {
        BUILTIN_SOUNDS
            .iter()
            .map(|(id, name)| SoundInfo {
                id: (*id).to_string(),
                name: (*name).to_string(),
            })
            .collect()
    }

    /// Every selectable sound, built-ins first.
    pub fn all(&self) -> Vec<SoundInfo> {
        let mut sounds = Self::builtin();
        sounds.extend(self.custom.iter().cloned());
        sounds
    }

    pub fn custom_sounds(&self) -> &[SoundInfo] {
        &self.custom
    }

    pub fn resolve(&self, sound_id: &str) -> Option<SoundInfo> {
        self.custom
            .iter()
            .find(|sound| sound.id == sound_id)
            .cloned()
            .or_else(|| {
                BUILTIN_SOUNDS
                    .iter()
                    .find(|(id, _)| *id == sound_id)
                    .map(|(id, name)| SoundInfo {
                        id: (*id).to_string(),
                        name: (*name).to_string(),
                    })
            })
    }

    /// Registers a custom sound. Ids that already resolve are rejected.
    pub fn add_custom(&mut self, sound_id: &str, name: &str) -> bool {
        if self.resolve(sound_id).is_some() {
            return false;
        }
        self.custom.push(SoundInfo {
            id: sound_id.to_string(),
            name: name.to_string(),
        });
        true
    }

    pub fn remove_custom(&mut self, sound_id: &str) -> bool {
        let before = self.custom.len();
        self.custom.retain(|sound| sound.id != sound_id);
        self.custom.len() < before
    }
}
