use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Edge-triggered notifications for observers. Snapshots of the full state
/// travel separately over the watch channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TimerEvent {
    Started,
    Paused,
    Reset,
    Completed,
    ConfigReplaced,
    CountdownTick {
        value: u32,
    },
    Tick {
        time_remaining: u32,
        stage_index: usize,
        round: u32,
    },
    StageChanged {
        stage_index: usize,
        round: u32,
        title: String,
    },
    TemplatesChanged {
        count: usize,
    },
}

pub fn channel() -> broadcast::Sender<TimerEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Sending to a channel with no subscribers is not an error.
pub(crate) fn emit(tx: &broadcast::Sender<TimerEvent>, event: TimerEvent) {
    if let Err(broadcast::error::SendError(event)) = tx.send(event) {
        tracing::trace!(?event, "timer event dropped, no subscribers");
    }
}
