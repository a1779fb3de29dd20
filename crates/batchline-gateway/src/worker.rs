use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use batchline_queue::Delivery;
use batchline_stageb::{ChannelQueues, Outcome, StageB};

/// Stage B worker pool: `workers.count` tasks pulling off the same
/// `mpsc::Receiver<Delivery>` the queue engine feeds. A `Retry` outcome is a
/// no-op here — the message keeps its current `visible_at`/`receipt` and is
/// handed out again once the visibility timeout elapses.
pub async fn run_pool(
    worker_count: usize,
    stage_b: Arc<StageB>,
    channel_queues: ChannelQueues,
    delivered_rx: mpsc::Receiver<Delivery>,
    mut shutdown: watch::Receiver<bool>,
) {
    let delivered_rx = Arc::new(tokio::sync::Mutex::new(delivered_rx));
    let mut handles = Vec::with_capacity(worker_count);

    for worker_id in 0..worker_count {
        let stage_b = stage_b.clone();
        let channel_queues = channel_queues.clone();
        let delivered_rx = delivered_rx.clone();
        let mut shutdown = shutdown.clone();

        handles.push(tokio::spawn(async move {
            info!(worker_id, "stage B worker started");
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                    delivery = async { delivered_rx.lock().await.recv().await } => {
                        match delivery {
                            Some(d) => d,
                            None => break,
                        }
                    }
                };

                if delivery.queue == channel_queues.whatsapp
                    || delivery.queue == channel_queues.sms
                    || delivery.queue == channel_queues.email
                {
                    match stage_b.handle_delivery(&delivery).await {
                        Outcome::Ack => {}
                        Outcome::Retry(reason) => {
                            warn!(worker_id, %reason, "delivery left for redelivery");
                        }
                    }
                } else {
                    // Handoff-queue messages bypass AI processing entirely
                    // (SPEC_FULL.md Non-goals: human-handoff routing beyond
                    // the boolean flag is out of scope). Left un-acked, the
                    // queue's own max-receives policy dead-letters them
                    // after enough redeliveries instead of looping forever.
                    info!(queue = %delivery.queue, "handoff message received, no consumer wired");
                }
            }
            info!(worker_id, "stage B worker stopped");
        }));
    }

    let _ = shutdown.changed().await;
    for handle in handles {
        let _ = handle.await;
    }
}
