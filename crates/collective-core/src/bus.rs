//! Message delivery between the orchestrator and agent mailboxes.
//!
//! Each registered agent runs as its own tokio task reading a bounded
//! mailbox. The bus offers a message to every recipient mailbox in order and
//! then fans the replies back in, waiting at most `response_timeout` for
//! each. The bus also owns the append-only message log and the running token
//! counter.

use crate::agent::{Agent, AgentBehavior};
use crate::message::{Message, MessageBody};
use crate::types::AgentId;
use collective_config::BusConfig;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

struct Envelope {
    agent: Agent,
    message: Arc<Message>,
    reply: oneshot::Sender<Option<MessageBody>>,
}

struct Mailbox {
    sender: mpsc::Sender<Envelope>,
    worker: JoinHandle<()>,
}

impl Mailbox {
    fn spawn(agent_id: AgentId, behavior: Arc<dyn AgentBehavior>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(capacity);
        let worker = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let response = envelope
                    .agent
                    .process_message(behavior.as_ref(), &envelope.message)
                    .await;
                // The bus may have given up waiting.
                let _ = envelope.reply.send(response);
            }
            debug!(agent_id = %agent_id, "Mailbox closed");
        });
        Self { sender, worker }
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Outcome of delivering one message.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Recipients whose mailbox accepted the message, in offer order
    pub delivered_to: Vec<AgentId>,
    /// Replies received within the timeout, in offer order
    pub responses: Vec<(AgentId, MessageBody)>,
}

/// Mailboxes, message log and communication cost.
pub struct MessageBus {
    mailboxes: HashMap<AgentId, Mailbox>,
    log: Vec<Message>,
    total_tokens: u64,
    response_timeout: Duration,
    capacity: usize,
    max_fanout_depth: usize,
}

impl MessageBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            mailboxes: HashMap::new(),
            log: Vec::new(),
            total_tokens: 0,
            response_timeout: config.response_timeout(),
            capacity: config.mailbox_capacity.max(1),
            max_fanout_depth: config.max_fanout_depth,
        }
    }

    /// Start a mailbox task for an agent, replacing any previous one.
    pub fn attach(&mut self, agent_id: &AgentId, behavior: Arc<dyn AgentBehavior>) {
        let mailbox = Mailbox::spawn(agent_id.clone(), behavior, self.capacity);
        self.mailboxes.insert(agent_id.clone(), mailbox);
    }

    /// Stop an agent's mailbox task.
    pub fn detach(&mut self, agent_id: &str) -> bool {
        self.mailboxes.remove(agent_id).is_some()
    }

    pub fn has_mailbox(&self, agent_id: &str) -> bool {
        self.mailboxes.contains_key(agent_id)
    }

    /// Append to the log and charge the message's size.
    pub fn record(&mut self, message: &Message) {
        self.total_tokens += message.serialized_size();
        self.log.push(message.clone());
    }

    pub fn log(&self) -> &[Message] {
        &self.log
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn max_fanout_depth(&self) -> usize {
        self.max_fanout_depth
    }

    /// Offer `message` to each recipient, then collect their replies.
    ///
    /// `recipients` are snapshots of the agent records taken by the caller;
    /// agents without a mailbox are skipped.
    pub async fn deliver(&self, message: Arc<Message>, recipients: Vec<Agent>) -> Delivery {
        let mut delivered_to = Vec::with_capacity(recipients.len());
        let mut pending = Vec::with_capacity(recipients.len());

        for agent in recipients {
            let Some(mailbox) = self.mailboxes.get(&agent.id) else {
                debug!(agent_id = %agent.id, "No mailbox for recipient");
                continue;
            };

            let agent_id = agent.id.clone();
            let (reply, response) = oneshot::channel();
            let envelope = Envelope {
                agent,
                message: Arc::clone(&message),
                reply,
            };

            match timeout(self.response_timeout, mailbox.sender.send(envelope)).await {
                Ok(Ok(())) => {
                    delivered_to.push(agent_id.clone());
                    pending.push((agent_id, response));
                }
                Ok(Err(_)) => warn!(agent_id = %agent_id, "Mailbox closed, message not delivered"),
                Err(_) => warn!(agent_id = %agent_id, "Mailbox full, message not delivered"),
            }
        }

        let wait = self.response_timeout;
        let replies = join_all(pending.into_iter().map(|(agent_id, response)| async move {
            match timeout(wait, response).await {
                Ok(Ok(body)) => body.map(|body| (agent_id, body)),
                Ok(Err(_)) => None,
                Err(_) => {
                    warn!(agent_id = %agent_id, "Timed out waiting for response");
                    None
                }
            }
        }))
        .await;

        debug!(
            message_id = %message.id,
            delivered = delivered_to.len(),
            "Message delivered"
        );

        Delivery {
            delivered_to,
            responses: replies.into_iter().flatten().collect(),
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("mailboxes", &self.mailboxes.len())
            .field("messages", &self.log.len())
            .field("total_tokens", &self.total_tokens)
            .finish()
    }
}
