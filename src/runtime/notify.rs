//! Notify-on-done registry.
//!
//! A call object that can report when it is done (for example a server-side call that
//! learns the client went away) is handed a tag; the context invokes the registered
//! callback once that tag completes, telling it whether the call was cancelled.

use crate::completion::Tag;
use crate::runtime::ExecutionContext;

/// Call object that can signal completion through a completion-queue tag.
pub trait DoneNotifier {
    /// Arranges for `tag` to be delivered through the completion queue once the call is done.
    fn notify_when_done(&self, tag: Tag);

    /// Whether the call ended by cancellation. Only meaningful once `tag` was delivered.
    fn is_cancelled(&self) -> bool;
}

impl ExecutionContext {
    /// Invokes `on_done` through the run loop, exactly once, when `call` is done.
    ///
    /// The context keeps `call` alive until then. The callback receives
    /// [`DoneNotifier::is_cancelled`].
    ///
    /// # Example
    /// ```ignore
    /// ctx.notify_when_done(call, |_, cancelled| {
    ///     if cancelled {
    ///         println!("client went away");
    ///     }
    /// });
    /// ```
    pub fn notify_when_done<N, F>(&self, call: N, on_done: F)
    where
        N: DoneNotifier + 'static,
        F: FnOnce(&ExecutionContext, bool) + 'static,
    {
        let reservation = self.reserve();
        self.local_state()
            .borrow_mut()
            .notify
            .insert(reservation.key());

        call.notify_when_done(reservation.tag());

        self.install(
            reservation,
            Box::new(move |context: &ExecutionContext, _ok: bool| {
                on_done(context, call.is_cancelled())
            }),
        );
    }

    /// Number of registrations still waiting for their call to be done.
    pub fn pending_done_notifications(&self) -> usize {
        self.local_state().borrow().notify.len()
    }
}
