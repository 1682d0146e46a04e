pub use crate::buffer::ByteBuffer;
pub use crate::config::ServerConfig;
pub use crate::error::{CleanError, Result};
pub use crate::http::{HttpConnection, HttpRequest, HttpResponse};
pub use crate::poller::{Poller, Readiness};
pub use crate::server::Server;
pub use crate::sql_pool::{PooledConn, SqlPool, SqlPoolConfig};
pub use crate::timer::TimingHeap;
pub use crate::worker_pool::WorkerPool;

pub use proxy_log::{debug, errors, info, trace, warn};
