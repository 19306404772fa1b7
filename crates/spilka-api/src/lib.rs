pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod settings;

use std::sync::Arc;

use spilka_core::{Directory, Ledger};
use spilka_db::Database;
use spilka_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub directory: Directory,
    pub ledger: Ledger,
    pub dispatcher: Dispatcher,
}
