use crate::sounds::{SoundCatalog, SoundInfo};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const SOUND_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

pub const STAGE_START_VIBRATION: &[u32] = &[200, 100, 200];
pub const STAGE_END_VIBRATION: &[u32] = &[500];
pub const END_OF_ROUND_VIBRATION: &[u32] = &[200, 100, 200, 100, 200];

const MAX_CUE_RECORDS: usize = 256;

/// Best-effort audio playback by sound id.
pub trait SoundEngine: Send + Sync {
    fn play(&self, sound_id: &str);
}

/// Haptic pulses, pattern in milliseconds alternating on/off.
pub trait Vibrator: Send + Sync {
    fn vibrate(&self, pattern: &[u32]);
}

/// Spoken stage announcements.
pub trait Announcer: Send + Sync {
    fn announce(&self, text: &str);
}

/// Held while a run is active, e.g. a screen wake lock.
pub trait RunGuard: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueChannel {
    Sound,
    Vibration,
    Announcement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueOutcome {
    Delivered,
    Debounced,
    Unresolved,
    NoCollaborator,
}

/// One observed cue request. Timestamps follow the tokio clock.
#[derive(Debug, Clone, PartialEq)]
pub struct CueRecord {
    pub channel: CueChannel,
    pub detail: String,
    pub outcome: CueOutcome,
    pub requested_at: Instant,
}

/// Fire-and-forget cue requests. Failures and unsupported channels degrade to
/// recorded no-ops; nothing here returns an error to the timer core.
#[derive(Clone, Default)]
pub struct EffectDispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    sound: Option<Arc<dyn SoundEngine>>,
    vibrator: Option<Arc<dyn Vibrator>>,
    announcer: Option<Arc<dyn Announcer>>,
    catalog: Mutex<SoundCatalog>,
    last_sound: Mutex<Option<(String, Instant)>>,
    records: Mutex<Vec<CueRecord>>,
}

impl EffectDispatcher {
    pub fn new(
        sound: Option<Arc<dyn SoundEngine>>,
        vibrator: Option<Arc<dyn Vibrator>>,
        announcer: Option<Arc<dyn Announcer>>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                sound,
                vibrator,
                announcer,
                catalog: Mutex::new(SoundCatalog::new()),
                last_sound: Mutex::new(None),
                records: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Dispatcher with no collaborators attached. Every request becomes a
    /// recorded no-op.
    pub fn silent() -> Self {
        Self::new(None, None, None)
    }

    /// Requests a sound by id. Repeats of the same id within the debounce
    /// window are dropped; ids the catalog cannot resolve play nothing.
    pub fn request_sound(&self, sound_id: &str) {
        let now = Instant::now();
        {
            let mut last = lock(&self.inner.last_sound);
            if let Some((last_id, at)) = last.as_ref() {
                if last_id == sound_id && now.duration_since(*at) < SOUND_DEBOUNCE_WINDOW {
                    drop(last);
                    tracing::trace!(sound_id, "sound request debounced");
                    self.record(CueChannel::Sound, sound_id, CueOutcome::Debounced, now);
                    return;
                }
            }
            *last = Some((sound_id.to_string(), now));
        }

        if lock(&self.inner.catalog).resolve(sound_id).is_none() {
            tracing::debug!(sound_id, "unknown sound id, nothing to play");
            self.record(CueChannel::Sound, sound_id, CueOutcome::Unresolved, now);
            return;
        }

        match &self.inner.sound {
            Some(engine) => {
                engine.play(sound_id);
                tracing::trace!(sound_id, "sound cue delivered");
                self.record(CueChannel::Sound, sound_id, CueOutcome::Delivered, now);
            }
            None => {
                self.record(CueChannel::Sound, sound_id, CueOutcome::NoCollaborator, now);
            }
        }
    }

    pub fn request_vibration(&self, pattern: &[u32]) {
        let now = Instant::now();
        let detail = format!("{pattern:?}");
        match &self.inner.vibrator {
            Some(vibrator) => {
                vibrator.vibrate(pattern);
                self.record(CueChannel::Vibration, &detail, CueOutcome::Delivered, now);
            }
            None => {
                self.record(CueChannel::Vibration, &detail, CueOutcome::NoCollaborator, now);
            }
        }
    }

    pub fn request_announcement(&self, text: &str) {
        let now = Instant::now();
        match &self.inner.announcer {
            Some(announcer) => {
                announcer.announce(text);
                self.record(CueChannel::Announcement, text, CueOutcome::Delivered, now);
            }
            None => {
                self.record(CueChannel::Announcement, text, CueOutcome::NoCollaborator, now);
            }
        }
    }

    pub fn add_custom_sound(&self, sound_id: &str, name: &str) -> bool {
        lock(&self.inner.catalog).add_custom(sound_id, name)
    }

    pub fn remove_custom_sound(&self, sound_id: &str) -> bool {
        lock(&self.inner.catalog).remove_custom(sound_id)
    }

    pub fn sounds(&self) -> Vec<SoundInfo> {
        lock(&self.inner.catalog).all()
    }

    /// Recent cue requests, oldest first.
    pub fn records(&self) -> Vec<CueRecord> {
        lock(&self.inner.records).clone()
    }

    pub fn take_records(&self) -> Vec<CueRecord> {
        std::mem::take(&mut *lock(&self.inner.records))
    }

    fn record(&self, channel: CueChannel, detail: &str, outcome: CueOutcome, requested_at: Instant) {
        let mut records = lock(&self.inner.records);
        if records.len() == MAX_CUE_RECORDS {
            records.remove(0);
        }
        records.push(CueRecord {
            channel,
            detail: detail.to_string(),
            outcome,
            requested_at,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
