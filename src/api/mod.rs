// HTTP API served by the callback-server process

pub mod callback;

pub use callback::{create_callback_router, CallbackAppState, CallbackPage};
