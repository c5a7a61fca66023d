use anyhow::Context;
use tracing::trace;

use crate::filter::{Filter, Outcome};
use crate::http::connection::Connection;

/// Runs one ordered filter chain over one connection at a time.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    filters: Vec<Filter>,
}

impl Worker {
    pub fn new(id: usize, filters: Vec<Filter>) -> Self {
        Self { id, filters }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Runs the chain until a filter terminates or fails, then closes the
    /// connection. The connection is closed on every path.
    pub async fn run(&self, mut conn: Connection) -> anyhow::Result<()> {
        let result = self.run_chain(&mut conn).await;

        let peer = conn.peer().clone();
        if let Err(e) = conn.close().await {
            trace!(worker = self.id, peer = %peer, error = %e, "Error while closing connection");
        }

        result
    }

    async fn run_chain(&self, conn: &mut Connection) -> anyhow::Result<()> {
        for filter in &self.filters {
            let outcome = filter
                .handle(conn)
                .await
                .with_context(|| format!("{} filter", filter.name()))?;
            if outcome == Outcome::Terminated {
                return Ok(());
            }
        }
        Ok(())
    }
}
