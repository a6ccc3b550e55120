//! Installs the subscriber described by the `FACTORY_LOG_*` variables and
//! emits a few database-shaped events.

use factory_common_log::spans::{database_span, statement_span, Timer};
use factory_common_log::{debug, info, init, warn, LogConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig::from_env();
    println!("Logging config: {:?}", config);
    init(config)?;

    let db = database_span("default", "connect");
    let _db = db.enter();
    info!(attempt = 1, "connecting");
    warn!(attempt = 1, "backend not ready, retrying");

    let timer = Timer::start("statement");
    let stmt = statement_span("select id, name from users where id = ?");
    let _stmt = stmt.enter();
    debug!("statement executed");
    timer.finish();

    Ok(())
}
