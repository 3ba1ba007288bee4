//! Thread manager: threads and their ordered message lists

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info, warn};

use super::model::{ContentPart, Message, MessageRole, Thread};
use crate::list::{ListOrder, ListQuery, Page};
use crate::run::Run;
use crate::store::InstanceStore;
use crate::{Error, Result};

const STREAM_PAGE_SIZE: usize = 20;

/// CRUD over threads and their messages
#[derive(Clone)]
pub struct ThreadManager {
    store: Arc<InstanceStore>,
}

fn validate_content(content: &[ContentPart]) -> Result<()> {
    if content.is_empty() {
        return Err(Error::InvalidInput(
            "Message content cannot be empty".to_string(),
        ));
    }
    for part in content {
        if let ContentPart::Text { text } = part {
            if text.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "Message text cannot be blank".to_string(),
                ));
            }
        }
    }
    Ok(())
}

impl ThreadManager {
    pub fn new(store: Arc<InstanceStore>) -> Self {
        Self { store }
    }

    pub async fn create_thread(&self, metadata: HashMap<String, String>) -> Result<Thread> {
        let thread = self.store.threads().create(Thread::new(metadata)).await?;
        info!("Created thread {}", thread.id);
        Ok(thread)
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        self.store.threads().get(thread_id).await
    }

    /// Append a client message to a thread.
    ///
    /// A user message added while a run is active is accepted, but the run
    /// in flight never sees it: it only becomes part of the next run's
    /// history.
    pub async fn add_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: Vec<ContentPart>,
    ) -> Result<Message> {
        self.append(thread_id, role, content, None).await
    }

    /// Append a message authored by a run (assistant replies, tool results)
    pub async fn append_run_message(
        &self,
        thread_id: &str,
        run_id: &str,
        role: MessageRole,
        content: Vec<ContentPart>,
    ) -> Result<Message> {
        self.append(thread_id, role, content, Some(run_id.to_string()))
            .await
    }

    async fn append(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: Vec<ContentPart>,
        run_id: Option<String>,
    ) -> Result<Message> {
        validate_content(&content)?;

        // The message is inserted while the thread is held, so readers that
        // go through the thread always see a gap-free prefix.
        let mut thread = self.store.threads().lock(thread_id).await?;
        if !self.store.threads().contains(thread_id).await {
            return Err(Error::not_found("thread", thread_id));
        }

        let message = Message::new(thread_id, thread.message_count(), role, content, run_id);
        self.store.messages().create(message.clone()).await?;
        thread.message_ids.push(message.id.clone());

        if role == MessageRole::User {
            if let Some(active) = &thread.active_run_id {
                debug!(
                    "Message {} queued on thread {} for the run after {}",
                    message.id, thread_id, active
                );
            }
        }

        Ok(message)
    }

    pub async fn get_message(&self, thread_id: &str, message_id: &str) -> Result<Message> {
        let message = self.store.messages().get(message_id).await?;
        if message.thread_id != thread_id {
            return Err(Error::not_found("message", message_id));
        }
        Ok(message)
    }

    /// Replace the thread's metadata. Messages and runs are untouched.
    pub async fn modify_thread(
        &self,
        thread_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Thread> {
        let thread = self
            .store
            .threads()
            .update(thread_id, |thread| {
                thread.metadata = metadata;
                Ok(thread.clone())
            })
            .await?;
        debug!("Updated metadata of thread {}", thread.id);
        Ok(thread)
    }

    /// Delete a thread and its messages. Refused while a run is active.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let thread = self.store.threads().lock(thread_id).await?;
        if let Some(run_id) = self.live_run(&thread).await {
            return Err(Error::Conflict(format!(
                "Thread {} has an active run {}",
                thread_id, run_id
            )));
        }

        self.store.threads().remove(thread_id).await?;
        for message_id in &thread.message_ids {
            // Messages only ever live under their thread
            if let Err(err) = self.store.messages().remove(message_id).await {
                warn!("Failed to remove message {} of thread {}: {}", message_id, thread_id, err);
            }
        }

        info!("Deleted thread {}", thread_id);
        Ok(())
    }

    /// One page of messages in creation order
    pub async fn list_messages_page(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<Page<Message>> {
        let thread = self.get_thread(thread_id).await?;
        let (window, has_more) = query.window(&thread.message_ids)?;

        let mut data = Vec::with_capacity(window.len());
        for message_id in window {
            data.push(self.store.messages().get(message_id).await?);
        }
        Ok(Page::new(data, has_more))
    }

    /// Lazy sequence of a thread's messages in creation order.
    ///
    /// Messages are fetched a page at a time as the stream is polled. To
    /// resume an interrupted walk, start a new stream with the last id seen
    /// as `after`.
    pub fn list_messages(
        &self,
        thread_id: &str,
        order: ListOrder,
        after: Option<String>,
    ) -> BoxStream<'static, Result<Message>> {
        struct Cursor {
            manager: ThreadManager,
            thread_id: String,
            order: ListOrder,
            after: Option<String>,
            buffer: VecDeque<Message>,
            exhausted: bool,
        }

        let cursor = Cursor {
            manager: self.clone(),
            thread_id: thread_id.to_string(),
            order,
            after,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            if cursor.buffer.is_empty() && !cursor.exhausted {
                let query = ListQuery {
                    order: cursor.order,
                    after: cursor.after.clone(),
                    limit: Some(STREAM_PAGE_SIZE),
                };
                match cursor
                    .manager
                    .list_messages_page(&cursor.thread_id, &query)
                    .await
                {
                    Ok(page) => {
                        cursor.exhausted = !page.has_more;
                        cursor.buffer.extend(page.data);
                    }
                    Err(err) => {
                        cursor.exhausted = true;
                        return Some((Err(err), cursor));
                    }
                }
            }

            let message = cursor.buffer.pop_front()?;
            cursor.after = Some(message.id.clone());
            Some((Ok(message), cursor))
        })
        .boxed()
    }

    /// The history a run's executor sees: thread messages that existed when
    /// the run was created, plus everything the run itself appended.
    pub async fn history_for_run(&self, run: &Run) -> Result<Vec<Message>> {
        let thread = self.get_thread(&run.thread_id).await?;

        let mut history = Vec::with_capacity(thread.message_ids.len());
        for (seq, message_id) in thread.message_ids.iter().enumerate() {
            let message = self.store.messages().get(message_id).await?;
            let own = message.run_id.as_deref() == Some(run.id.as_str());
            if (seq as u64) < run.history_cutoff || own {
                history.push(message);
            }
        }
        Ok(history)
    }

    /// Bind a new run to an idle thread.
    ///
    /// `build` receives the locked thread and returns the run to insert; the
    /// run is stored and the thread marked busy in one critical section, so
    /// two concurrent callers can never both succeed.
    pub async fn claim_run<F>(&self, thread_id: &str, build: F) -> Result<Run>
    where
        F: FnOnce(&Thread) -> Run,
    {
        let mut thread = self.store.threads().lock(thread_id).await?;
        if !self.store.threads().contains(thread_id).await {
            return Err(Error::not_found("thread", thread_id));
        }
        if let Some(run_id) = self.live_run(&thread).await {
            return Err(Error::Conflict(format!(
                "Thread {} already has an active run {}",
                thread_id, run_id
            )));
        }

        let run = build(&thread);
        let run = self.store.runs().create(run).await?;
        thread.active_run_id = Some(run.id.clone());
        Ok(run)
    }

    /// Free the thread once `run_id` has reached a terminal status
    pub async fn release_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let result = self
            .store
            .threads()
            .update(thread_id, |thread| {
                if thread.active_run_id.as_deref() == Some(run_id) {
                    thread.active_run_id = None;
                }
                Ok(())
            })
            .await;

        match result {
            Err(Error::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// The thread's active run id, unless that run already ended
    async fn live_run(&self, thread: &Thread) -> Option<String> {
        let run_id = thread.active_run_id.as_ref()?;
        match self.store.runs().find(run_id).await {
            Some(run) if run.status.is_active() => Some(run_id.clone()),
            _ => None,
        }
    }
}
