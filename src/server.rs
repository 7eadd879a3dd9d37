//! Listener: accepts connections and hands them to the worker pool.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::journal::UploadJournal;
use crate::logger::Logger;
use crate::pool::WorkerPool;
use crate::upload::{handle_connection, SessionContext};

/// Pause after a failed accept so persistent errors (EMFILE) don't spin.
const ACCEPT_BACKOFF_MS: u64 = 100;

pub struct UploadServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    pool: WorkerPool,
    ctx: Arc<SessionContext>,
    logger: Arc<dyn Logger>,
}

impl UploadServer {
    /// Validate `config` and bind the listening socket. A bind failure is
    /// fatal for the caller.
    pub async fn bind(
        config: ServerConfig,
        logger: Arc<dyn Logger>,
        journal: Option<Arc<UploadJournal>>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: config.bind.clone(),
            source,
        })?;

        logger.listening(local_addr, config.workers);

        let pool = WorkerPool::new(config.workers, config.max_queued);
        let ctx = Arc::new(SessionContext::new(&config, logger.clone(), journal));
        Ok(Self {
            listener,
            local_addr,
            config,
            pool,
            ctx,
            logger,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept forever.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept until `shutdown` resolves, then stop accepting and wait for
    /// every admitted upload to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                res = self.listener.accept() => match res {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => {
                        self.logger.accept_failed(&e);
                        sleep(Duration::from_millis(ACCEPT_BACKOFF_MS)).await;
                    }
                },
            }
        }

        let UploadServer { listener, pool, .. } = self;
        drop(listener);
        pool.drain().await;
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        if self.config.nodelay {
            let _ = stream.set_nodelay(true);
        }
        let ctx = self.ctx.clone();
        let logger = self.logger.clone();
        let admitted = self.pool.submit(move |session| {
            logger.accepted(session, peer);
            handle_connection(stream, peer, session, ctx)
        });
        match admitted {
            Ok(adm) if !adm.started() => self.logger.queued(adm.id, adm.waiting),
            Ok(_) => {}
            // the rejected stream was dropped with the closure, closing it
            Err(ServerError::QueueFull { id }) => self.logger.rejected(id, peer, "upload queue full"),
            Err(e) => self.logger.error("dispatch", &e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;

    #[tokio::test]
    async fn bind_rejects_invalid_config_before_binding() {
        let cfg = ServerConfig {
            bind: "127.0.0.1:0".into(),
            workers: 0,
            ..ServerConfig::default()
        };
        match UploadServer::bind(cfg, Arc::new(NoopLogger), None).await {
            Err(ServerError::Config(msg)) => assert!(msg.contains("workers")),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("expected config error"),
        }
    }

    #[tokio::test]
    async fn second_bind_on_same_port_is_fatal() {
        let cfg = ServerConfig {
            bind: "127.0.0.1:0".into(),
            ..ServerConfig::default()
        };
        let first = UploadServer::bind(cfg.clone(), Arc::new(NoopLogger), None)
            .await
            .unwrap();
        let taken = ServerConfig {
            bind: first.local_addr().to_string(),
            ..cfg
        };
        match UploadServer::bind(taken, Arc::new(NoopLogger), None).await {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, first.local_addr().to_string()),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("expected bind failure"),
        }
    }

    #[tokio::test]
    async fn run_until_stops_when_shutdown_resolves() {
        let cfg = ServerConfig {
            bind: "127.0.0.1:0".into(),
            ..ServerConfig::default()
        };
        let server = UploadServer::bind(cfg, Arc::new(NoopLogger), None)
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), server.run_until(async {}))
            .await
            .expect("server did not stop")
            .unwrap();
    }
}
