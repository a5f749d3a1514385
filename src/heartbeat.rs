//! Process-wide heartbeat ticker (spec.md §4.2.3): every few seconds, every
//! room with a playing video and at least two participants gets a
//! `video:heartbeat` snapshot so client clocks can re-sync without the
//! server bumping `seq` (a heartbeat is not a state change).
//!
//! Also runs the defensive empty-room sweep (SPEC_FULL.md §B) on the same
//! tick, since both are "periodically walk every room" work.

use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::Dispatcher;
use crate::protocol::{RoomEvent, ServerEvent};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

pub async fn run(dispatcher: Arc<Dispatcher>) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        interval.tick().await;
        let registry = dispatcher.registry();
        for room in registry.all_rooms() {
            if room.video_is_eligible_for_heartbeat() {
                room.emit(RoomEvent::broadcast(ServerEvent::VideoHeartbeat {
                    state: room.video_snapshot(),
                }));
            }
        }
        registry.reap_empty_rooms();
    }
}
