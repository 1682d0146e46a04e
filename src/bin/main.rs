use std::sync::Arc;

use server_proxy::config::ServerConfig;
use server_proxy::error::Result;
use server_proxy::server::Server;
use server_proxy::sql_pool::{SqlPool, SqlPoolConfig};

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Arc::new(ServerConfig::load(&config_path)?);

    if config.log.enabled {
        proxy_log::init(config.log.level, "log", ".log", config.log.queue_size);
    }
    config.display_config();

    let sql_pool = match SqlPool::init(&SqlPoolConfig {
        host: "localhost".to_string(),
        port: config.sql.port,
        user: config.sql.user.clone(),
        password: config.sql.password.clone(),
        db: config.sql.db.clone(),
        pool_size: config.sql.pool_size,
    }) {
        Ok(pool) => Some(pool),
        Err(e) => {
            proxy_log::warn!("sql pool unavailable, auth endpoints will fail: {e}");
            None
        }
    };

    let mut server = Server::new(config, sql_pool)?;
    let result = server.run();

    proxy_log::shutdown();
    result
}
