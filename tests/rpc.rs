mod common;

use common::{FakeCall, FakeDone, FakeUnary, Message, context_with_queue, deliver};
use completion_engine::{
    ExecutionContext, Rpc, RpcState, Slot, Status, StatusCode, UnaryRequest, WriteOptions,
    request, with_deadline,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn test_unary_request_fills_response() {
    let (ctx, queue) = context_with_queue();
    let response = Slot::new();
    let status = Rc::new(RefCell::new(None));
    let status_clone = status.clone();

    request(
        &ctx,
        FakeUnary::new(queue),
        Message { value: 42 },
        response.clone(),
        move |_, result| *status_clone.borrow_mut() = Some(result),
    );

    assert!(ctx.run());
    assert_eq!(*status.borrow(), Some(Status::ok()));
    assert_eq!(response.take(), Some(Message { value: 21 }));
}

#[test]
fn test_unary_request_raced_against_deadline_is_cancelled() {
    let (ctx, queue) = context_with_queue();
    let call = FakeUnary::hanging(queue);
    let cancelled = call.cancelled.clone();
    let result = Rc::new(RefCell::new(None));
    let result_clone = result.clone();

    with_deadline(
        &ctx,
        UnaryRequest::new(call, Message { value: 1 }, Slot::new()),
        Instant::now() + Duration::from_millis(20),
        move |_, timed| *result_clone.borrow_mut() = Some(timed),
    );

    assert!(ctx.run());
    assert!(cancelled.get());

    let timed = result.borrow_mut().take().expect("request should complete");
    assert!(timed.deadline_expired);
    assert_eq!(timed.output.code(), StatusCode::Cancelled);
}

#[test]
fn test_last_message_write_then_failed_read_finishes_automatically() {
    let (ctx, queue) = context_with_queue();
    let rpc = Rpc::new(
        FakeCall::new(queue)
            .failing("read")
            .finishing_with(Status::new(StatusCode::Unavailable, "server gone")),
    );
    let final_status = Rc::new(RefCell::new(None));

    let (rpc_clone, final_clone) = (rpc.clone(), final_status.clone());
    rpc.start(&ctx, move |ctx, ok| {
        assert!(ok, "start should succeed");
        let rpc = rpc_clone.clone();
        let options = WriteOptions::new().set_last_message();

        rpc_clone.write(ctx, Message { value: 1 }, options, move |ctx, ok| {
            assert!(ok);
            assert_eq!(rpc.state(), RpcState::WritesDoneIssued);

            let rpc_after_read = rpc.clone();
            rpc.read(ctx, move |ctx, message| {
                assert_eq!(message, None, "failed read yields no message");
                assert_eq!(rpc_after_read.state(), RpcState::Finished);
                assert_eq!(rpc_after_read.call().finishes(), 1);

                rpc_after_read.finish(ctx, move |_, status| {
                    *final_clone.borrow_mut() = Some(status);
                });
            });
        });
    });

    assert!(ctx.run());

    let status = final_status.borrow().clone().expect("finish should complete");
    assert_eq!(status.code(), StatusCode::Unavailable);
    assert_eq!(rpc.status(), Some(status));
    assert!(!rpc.ok());
    assert_eq!(rpc.call().finishes(), 1, "finish reused the automatic finish status");
    assert_eq!(rpc.call().written(), vec![(Message { value: 1 }, true)]);
    assert_eq!(rpc.call().log(), vec!["start", "write", "read", "finish"]);
}

#[test]
fn test_finish_twice_reports_first_status() {
    let (ctx, queue) = context_with_queue();
    let rpc = Rpc::new(FakeCall::new(queue));
    let statuses = Rc::new(RefCell::new(Vec::new()));

    let (rpc_clone, statuses_clone) = (rpc.clone(), statuses.clone());
    rpc.start(&ctx, move |ctx, ok| {
        assert!(ok);
        for _ in 0..2 {
            let statuses = statuses_clone.clone();
            rpc_clone.finish(ctx, move |_, status| statuses.borrow_mut().push(status));
        }
    });

    assert!(ctx.run());
    assert_eq!(*statuses.borrow(), vec![Status::ok(), Status::ok()]);
    assert_eq!(rpc.call().finishes(), 1);
    assert_eq!(rpc.state(), RpcState::Finished);
    assert!(rpc.ok());
}

#[test]
fn test_finish_after_finished_does_not_reach_transport() {
    let (ctx, queue) = context_with_queue();
    let rpc = Rpc::new(FakeCall::new(queue));
    let seen = Rc::new(Cell::new(0));

    let (rpc_clone, seen_clone) = (rpc.clone(), seen.clone());
    rpc.start(&ctx, move |ctx, _| {
        let rpc = rpc_clone.clone();
        rpc_clone.finish(ctx, move |ctx, first| {
            rpc.finish(ctx, move |_, second| {
                assert_eq!(first, second);
                seen_clone.set(seen_clone.get() + 1);
            });
        });
    });

    assert!(ctx.run());
    assert_eq!(seen.get(), 1);
    assert_eq!(rpc.call().finishes(), 1);
    assert_eq!(rpc.call().log(), vec!["start", "writes_done", "finish"]);
}

#[test]
fn test_failed_start_finishes_automatically() {
    let (ctx, queue) = context_with_queue();
    let rpc = Rpc::new(
        FakeCall::new(queue)
            .failing("start")
            .finishing_with(Status::new(StatusCode::DeadlineExceeded, "too slow")),
    );
    let status = Rc::new(RefCell::new(None));

    let (rpc_clone, status_clone) = (rpc.clone(), status.clone());
    rpc.start(&ctx, move |ctx, ok| {
        assert!(!ok);
        assert_eq!(rpc_clone.state(), RpcState::Finished);
        rpc_clone.finish(ctx, move |_, result| *status_clone.borrow_mut() = Some(result));
    });

    assert!(ctx.run());
    assert_eq!(
        status.borrow().as_ref().map(Status::code),
        Some(StatusCode::DeadlineExceeded)
    );
    assert_eq!(rpc.call().finishes(), 1);
}

#[test]
fn test_read_initial_metadata_and_messages() {
    let (ctx, queue) = context_with_queue();
    let rpc = Rpc::new(
        FakeCall::new(queue).responding([Message { value: 5 }, Message { value: 6 }]),
    );
    let messages = Rc::new(RefCell::new(Vec::new()));

    let (rpc_clone, messages_clone) = (rpc.clone(), messages.clone());
    rpc.start(&ctx, move |ctx, _| {
        let rpc = rpc_clone.clone();
        rpc_clone.read_initial_metadata(ctx, move |ctx, ok| {
            assert!(ok);
            for _ in 0..2 {
                let messages = messages_clone.clone();
                rpc.read(ctx, move |_, message| messages.borrow_mut().push(message));
            }
        });
    });

    assert!(ctx.run());
    assert_eq!(
        *messages.borrow(),
        vec![Some(Message { value: 5 }), Some(Message { value: 6 })]
    );
    assert_eq!(rpc.state(), RpcState::Started);
}

#[test]
fn test_write_after_writes_done_is_rejected() {
    let (ctx, queue) = context_with_queue();
    let rpc = Rpc::new(FakeCall::new(queue));
    let results = Rc::new(RefCell::new(Vec::new()));

    let (rpc_clone, results_clone) = (rpc.clone(), results.clone());
    rpc.start(&ctx, move |ctx, _| {
        let rpc = rpc_clone.clone();
        rpc_clone.writes_done(ctx, move |ctx, ok| {
            results_clone.borrow_mut().push(ok);

            let results = results_clone.clone();
            rpc.write(ctx, Message { value: 9 }, WriteOptions::new(), move |_, ok| {
                results.borrow_mut().push(ok)
            });
        });
    });

    assert!(ctx.run());
    assert_eq!(*results.borrow(), vec![true, false]);
    assert!(rpc.call().written().is_empty(), "rejected write never reaches the transport");
    assert_eq!(rpc.state(), RpcState::WritesDoneIssued);
}

#[test]
fn test_verbs_before_start_are_rejected() {
    let (ctx, queue) = context_with_queue();
    let rpc = Rpc::new(FakeCall::new(queue));
    let read = Rc::new(RefCell::new(Some(Message { value: 0 })));
    let status = Rc::new(RefCell::new(None));

    let read_clone = read.clone();
    rpc.read(&ctx, move |_, message| *read_clone.borrow_mut() = message);
    let status_clone = status.clone();
    rpc.finish(&ctx, move |_, result| *status_clone.borrow_mut() = Some(result));

    assert!(ctx.run());
    assert_eq!(*read.borrow(), None);
    assert_eq!(
        status.borrow().as_ref().map(Status::code),
        Some(StatusCode::FailedPrecondition)
    );
    assert!(rpc.call().log().is_empty());
    assert_eq!(rpc.state(), RpcState::NotStarted);
}

#[test]
fn test_cancel_reaches_transport() {
    let (_ctx, queue) = context_with_queue();
    let rpc = Rpc::new(FakeCall::new(queue));

    rpc.cancel();
    assert_eq!(rpc.call().log(), vec!["cancel"]);
}

#[test]
fn test_notify_when_done_runs_once_through_run_loop() {
    let (ctx, queue) = context_with_queue();
    let tag = Rc::new(Cell::new(None));
    let result = Rc::new(Cell::new(None));

    let result_clone = result.clone();
    ctx.notify_when_done(
        FakeDone {
            tag: tag.clone(),
            cancelled: true,
        },
        move |_: &ExecutionContext, cancelled: bool| result_clone.set(Some(cancelled)),
    );
    assert_eq!(ctx.pending_done_notifications(), 1);

    deliver(&queue, tag.get().expect("call received its done tag"));

    assert!(ctx.run());
    assert_eq!(result.get(), Some(true));
    assert_eq!(ctx.pending_done_notifications(), 0);
}
