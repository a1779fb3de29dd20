use batchline_core::types::Channel;

/// What the worker pool does with the delivery once `StageB` returns.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Delete the message. Covers success, benign duplicates (lock
    /// contention on an already-running batch), lock-lost/error-after-send
    /// (never retried), and pre-send permanent failures (the conversation's
    /// `retry` status is the recovery path, not queue redelivery).
    Ack,
    /// Leave the message alone; the queue's own visibility timeout will
    /// redeliver it.
    Retry(String),
}

/// Maps a queue name back to the channel it carries triggers for — the
/// reverse of `batchline_stagea::QueueNames`. A worker pool subscribes to
/// all four queues on one `mpsc::Receiver<Delivery>`, so it needs this to
/// recover which channel a given delivery's `primary_channel` belongs to.
#[derive(Debug, Clone)]
pub struct ChannelQueues {
    pub whatsapp: String,
    pub sms: String,
    pub email: String,
}

impl ChannelQueues {
    pub fn channel_for(&self, queue: &str) -> Option<Channel> {
        if queue == self.whatsapp {
            Some(Channel::Whatsapp)
        } else if queue == self.sms {
            Some(Channel::Sms)
        } else if queue == self.email {
            Some(Channel::Email)
        } else {
            None
        }
    }
}
