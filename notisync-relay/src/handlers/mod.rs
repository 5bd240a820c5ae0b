pub mod notifications;
pub mod sync;
pub mod ws;
