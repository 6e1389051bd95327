//! Outbound side: delayed answers, immediate hints, escalations.

pub mod discord;
pub mod scheduler;
pub mod sink;

pub use discord::DiscordWebhookSink;
pub use scheduler::{
    DispatchObserver, DispatchReport, DispatchScheduler, DispatchState, PendingResponse,
    ScheduleError, ScheduledDispatch,
};
pub use sink::{build_sink, DynSink, LogSink, OutboundMessage, ResponseSink, ESCALATION_TEXT};
