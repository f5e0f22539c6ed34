#![allow(dead_code)]

use completion_engine::{
    ClientCall, CompletionQueue, ContextBuilder, DoneNotifier, ExecutionContext, InProcessQueue,
    Slot, Status, Tag, UnaryCall, WriteOptions,
};

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// Context driven by an in-process queue the test can deliver completions to.
pub fn context_with_queue() -> (ExecutionContext, Arc<InProcessQueue>) {
    init_tracing();

    let queue = Arc::new(InProcessQueue::new());
    let context = ContextBuilder::new().completion_queue(queue.clone()).build();

    (context, queue)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub value: i32,
}

/// Streaming transport double completing every operation right away.
pub struct FakeCall {
    queue: Arc<InProcessQueue>,
    failing: HashSet<&'static str>,
    responses: RefCell<VecDeque<Message>>,
    written: RefCell<Vec<(Message, bool)>>,
    final_status: Status,
    log: RefCell<Vec<&'static str>>,
    finishes: Cell<usize>,
}

impl FakeCall {
    pub fn new(queue: Arc<InProcessQueue>) -> Self {
        Self {
            queue,
            failing: HashSet::new(),
            responses: RefCell::new(VecDeque::new()),
            written: RefCell::new(Vec::new()),
            final_status: Status::ok(),
            log: RefCell::new(Vec::new()),
            finishes: Cell::new(0),
        }
    }

    /// Makes every `operation` complete with `ok == false`.
    pub fn failing(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    pub fn responding(self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.responses.borrow_mut().extend(messages);
        self
    }

    pub fn finishing_with(mut self, status: Status) -> Self {
        self.final_status = status;
        self
    }

    pub fn finishes(&self) -> usize {
        self.finishes.get()
    }

    pub fn log(&self) -> Vec<&'static str> {
        self.log.borrow().clone()
    }

    pub fn written(&self) -> Vec<(Message, bool)> {
        self.written.borrow().clone()
    }

    fn complete(&self, operation: &'static str, tag: Tag) {
        self.log.borrow_mut().push(operation);
        self.queue.complete(tag, !self.failing.contains(operation));
    }
}

impl ClientCall for FakeCall {
    type Request = Message;
    type Response = Message;

    fn start_call(&self, tag: Tag) {
        self.complete("start", tag);
    }

    fn read_initial_metadata(&self, tag: Tag) {
        self.complete("read_initial_metadata", tag);
    }

    fn read(&self, response: Slot<Message>, tag: Tag) {
        self.log.borrow_mut().push("read");

        let message = if self.failing.contains("read") {
            None
        } else {
            self.responses.borrow_mut().pop_front()
        };
        let ok = message.is_some();
        if let Some(message) = message {
            response.set(message);
        }

        self.queue.complete(tag, ok);
    }

    fn write(&self, request: Message, options: WriteOptions, tag: Tag) {
        self.written
            .borrow_mut()
            .push((request, options.is_last_message()));
        self.complete("write", tag);
    }

    fn writes_done(&self, tag: Tag) {
        self.complete("writes_done", tag);
    }

    fn finish(&self, status: Slot<Status>, tag: Tag) {
        self.finishes.set(self.finishes.get() + 1);
        self.log.borrow_mut().push("finish");

        status.set(self.final_status.clone());
        self.queue.complete(tag, true);
    }

    fn try_cancel(&self) {
        self.log.borrow_mut().push("cancel");
    }
}

/// Unary transport double answering with half the request value, or hanging until cancelled.
pub struct FakeUnary {
    queue: Arc<InProcessQueue>,
    hang: bool,
    pending: RefCell<Option<(Tag, Slot<Status>)>>,
    pub cancelled: Rc<Cell<bool>>,
}

impl FakeUnary {
    pub fn new(queue: Arc<InProcessQueue>) -> Self {
        Self {
            queue,
            hang: false,
            pending: RefCell::new(None),
            cancelled: Rc::new(Cell::new(false)),
        }
    }

    pub fn hanging(queue: Arc<InProcessQueue>) -> Self {
        Self {
            hang: true,
            ..Self::new(queue)
        }
    }
}

impl UnaryCall for FakeUnary {
    type Request = Message;
    type Response = Message;

    fn call(&self, request: Message, response: Slot<Message>, status: Slot<Status>, tag: Tag) {
        if self.hang {
            *self.pending.borrow_mut() = Some((tag, status));
            return;
        }

        response.set(Message {
            value: request.value / 2,
        });
        status.set(Status::ok());
        self.queue.complete(tag, true);
    }

    fn try_cancel(&self) {
        self.cancelled.set(true);

        if let Some((tag, status)) = self.pending.borrow_mut().take() {
            status.set(Status::cancelled());
            self.queue.complete(tag, false);
        }
    }
}

/// Call object that hands its done tag to the test.
pub struct FakeDone {
    pub tag: Rc<Cell<Option<Tag>>>,
    pub cancelled: bool,
}

impl DoneNotifier for FakeDone {
    fn notify_when_done(&self, tag: Tag) {
        self.tag.set(Some(tag));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Delivers `tag` through `queue` as a successful completion.
pub fn deliver(queue: &InProcessQueue, tag: Tag) {
    queue.post(tag);
}
