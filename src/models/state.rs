//! Defines server state, typically passed to HTTP handlers by Actix web as required.

use crate::application::QueueFactory;

pub struct ApplicationState {
    pub factory: QueueFactory,
    pub config: crate::config::Config,
}
