pub mod chat;
pub mod clock;
pub mod cmdline;
pub mod comments;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod http;
pub mod hub;
pub mod ids;
pub mod participant;
pub mod peer;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod room;
pub mod schema;
pub mod screen_share;
pub mod sfu;
pub mod util;
pub mod video_state;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
