use super::Registrar;
use crate::{
    errors::Errors,
    store::{Action, KvStore, Node, Response},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};

/// Loads one subtree, then watches it for as long as the process lives,
/// resubscribing after every failure.
pub struct Supervisor<R: Registrar> {
    store: Arc<dyn KvStore>,
    prefix: String,
    registrar: Arc<R>,
    retry_delay: Duration,
    channel_size: usize,
}

impl<R: Registrar> Supervisor<R> {
    pub fn new(
        store: Arc<dyn KvStore>,
        prefix: &str,
        registrar: R,
        retry_delay: Duration,
        channel_size: usize,
    ) -> Self {
        Supervisor {
            store,
            prefix: prefix.trim_end_matches('/').to_string(),
            registrar: Arc::new(registrar),
            retry_delay,
            channel_size: channel_size.max(1),
        }
    }

    pub async fn run(self) {
        let mut next = 0;
        loop {
            // nothing loaded yet, or the watch position was lost
            if next == 0 {
                next = self.load().await;
            }
            tracing::info!("Start watching {}", self.prefix);
            let (result, resume) = self.watch_once(next).await;
            next = resume;
            match result {
                Err(Errors::IndexCleared(e)) => {
                    tracing::error!("Watch position on {} is gone ({}), reloading", self.prefix, e);
                    next = 0;
                }
                Err(e) => tracing::error!("Error when watching {} : {}", self.prefix, e),
                Ok(()) => tracing::error!("Watch on {} ended", self.prefix),
            }
            tracing::error!(
                "Waiting {:?} and relaunch watch on {}",
                self.retry_delay,
                self.prefix
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Dispatches every entry of the subtree, forgets registered entities
    /// the store no longer holds, and returns the revision to watch from.
    /// 0 when nothing could be read.
    async fn load(&self) -> u64 {
        match self.store.get(&self.prefix, true).await {
            Ok(response) => {
                for node in response.node.nodes.iter() {
                    dispatch(self.registrar.as_ref(), &self.prefix, node, response.action).await;
                }
                self.registrar.prune(&response.node.nodes);
                response.index + 1
            }
            Err(Errors::KeyNotFound(_)) => {
                tracing::info!("Nothing to load under {} yet", self.prefix);
                self.registrar.prune(&[]);
                0
            }
            Err(e) => {
                tracing::error!("Unable to load {}: {}", self.prefix, e);
                0
            }
        }
    }

    /// One subscription: the store call runs here while a consumer task
    /// applies what it delivers. Returns why the subscription ended and
    /// the revision to resume from.
    async fn watch_once(&self, since: u64) -> (Result<(), Errors>, u64) {
        let (sender, receiver) = mpsc::channel(self.channel_size);
        let (stop, stopped) = oneshot::channel();
        let consumer = tokio::spawn(consume(
            self.registrar.clone(),
            self.prefix.clone(),
            receiver,
            stopped,
            since,
        ));

        let result = self.store.watch(&self.prefix, since, sender).await;

        // the consumer may already be gone if it panicked
        let _ = stop.send(());
        let resume = match consumer.await {
            Ok(resume) => resume,
            Err(e) => {
                tracing::error!("Consumer for {} failed: {}", self.prefix, e);
                since
            }
        };
        (result, resume)
    }
}

async fn consume<R: Registrar>(
    registrar: Arc<R>,
    prefix: String,
    mut receiver: mpsc::Receiver<Response>,
    mut stopped: oneshot::Receiver<()>,
    mut next: u64,
) -> u64 {
    loop {
        tokio::select! {
            // drain delivered changes before honouring the stop
            biased;
            received = receiver.recv() => match received {
                Some(response) => {
                    dispatch(registrar.as_ref(), &prefix, &response.node, response.action).await;
                    next = response.index + 1;
                }
                None => {
                    let _ = (&mut stopped).await;
                    tracing::warn!("Gracefully closing the watch for {}", prefix);
                    return next;
                }
            },
            _ = &mut stopped => {
                tracing::warn!("Gracefully closing the watch for {}", prefix);
                return next;
            }
        }
    }
}

async fn dispatch<R: Registrar>(registrar: &R, prefix: &str, node: &Node, action: Action) {
    match registrar.decode(&node.key) {
        Some(key) => {
            if registrar.register(key, node, action).await {
                tracing::debug!("{} on {} applied", action, node.key);
            }
        }
        None => tracing::debug!("Ignoring {} on {}: not part of {}", action, node.key, prefix),
    }
}
