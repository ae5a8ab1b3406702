mod common;

use proactor::background::Worker;
use proactor::loopback::{LoopbackPort, Pending};
use proactor::{Direction, OpKind, Options, Poller};
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn wake_interrupts_infinite_drain() -> io::Result<()> {
    proactor_support::init_logging("proactor=trace");

    let port = LoopbackPort::new();
    let (tx, rx) = tokio::sync::oneshot::channel();

    let task = tokio::task::spawn_blocking(move || {
        let poller = Poller::new(port);
        let stop = AtomicBool::new(false);
        let _ = tx.send(poller.waker());
        poller.drain(None, &stop)
    });

    let waker = rx.await.expect("poller was constructed");
    waker.wake()?;

    let dispatched = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("drain was interrupted")
        .expect("drain task")?;

    assert_eq!(dispatched, 0);
    Ok(())
}

#[test]
fn duplicate_wakes_are_harmless() -> io::Result<()> {
    let (port, poller) = common::setup();
    let stop = AtomicBool::new(false);
    let waker = poller.waker();

    for _ in 0..3 {
        waker.clone().wake()?;
    }

    assert_eq!(poller.drain(None, &stop)?, 0);
    assert_eq!(port.queued(), 0);
    assert_eq!(poller.drain(Some(Duration::from_millis(10)), &stop)?, 0);
    Ok(())
}

#[test]
fn raised_stop_flag_does_not_block() -> io::Result<()> {
    let (_, poller) = common::setup();
    let stop = AtomicBool::new(true);

    assert_eq!(poller.drain(None, &stop)?, 0);
    Ok(())
}

#[test]
fn small_batches_dispatch_everything() -> io::Result<()> {
    proactor_support::init_logging("proactor=trace");

    let port = LoopbackPort::new();
    let poller = Poller::with_options(port.clone(), Options::new().batch(1));
    let stop = AtomicBool::new(false);

    let a = poller.begin_watching(1)?;
    let b = poller.begin_watching(2)?;
    a.set_callback(Direction::Read, |_, _, _| {});
    b.set_callback(Direction::Read, |_, _, _| {});

    let first = common::start(&poller, &port, &a, Direction::Read, OpKind::Read)?;
    let second = common::start(&poller, &port, &b, Direction::Read, OpKind::Read)?;
    port.complete(first, 1);
    port.complete(second, 1);

    assert_eq!(poller.drain(None, &stop)?, 1);
    assert_eq!(poller.drain(None, &stop)?, 1);
    assert_eq!(poller.pending(), 0);

    poller.end_watching(&a);
    poller.end_watching(&b);
    Ok(())
}

#[test]
fn failed_wait_is_returned_from_drain() -> io::Result<()> {
    let (port, poller) = common::setup();
    let stop = AtomicBool::new(false);

    let context = poller.begin_watching(1)?;
    context.set_callback(Direction::Read, |_, _, _| {});

    let pending = common::start(&poller, &port, &context, Direction::Read, OpKind::Read)?;
    port.complete(pending, 4);
    port.fail_next_wait(6);

    let error = poller.drain(None, &stop).unwrap_err();
    assert_eq!(error.raw_os_error(), Some(6));
    assert_eq!(port.queued(), 1);
    assert_eq!(poller.pending(), 1);

    // The poller keeps working once the channel recovers.
    assert_eq!(poller.drain(None, &stop)?, 1);
    assert_eq!(poller.pending(), 0);

    poller.end_watching(&context);
    Ok(())
}

#[tokio::test]
async fn worker_stops_promptly() -> io::Result<()> {
    proactor_support::init_logging("proactor=trace");

    let port = LoopbackPort::new();
    let worker = Worker::spawn(port, Options::new().name("proactor-test"), |poller| {
        let _ = poller.begin_watching(1)?;
        Ok(())
    })?;

    worker.stop()?;

    tokio::time::timeout(
        Duration::from_secs(5),
        tokio::task::spawn_blocking(move || worker.join()),
    )
    .await
    .expect("worker stopped")
    .expect("join task")
}

#[test]
fn worker_reports_init_failure() {
    let port = LoopbackPort::new();

    let error = Worker::spawn(port.clone(), Options::new(), |poller| {
        let _ = poller.begin_watching(1)?;
        Err(io::Error::new(io::ErrorKind::Other, "init failed"))
    })
    .unwrap_err();

    assert_eq!(error.to_string(), "init failed");
    assert!(port.is_associated(1));
}

#[tokio::test]
async fn worker_surfaces_failed_wait() -> io::Result<()> {
    proactor_support::init_logging("proactor=trace");

    let port = LoopbackPort::new();

    let worker = Worker::spawn(port.clone(), Options::new(), |poller| {
        let _ = poller.begin_watching(1)?;
        Ok(())
    })?;

    port.fail_next_wait(6);

    let error = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::task::spawn_blocking(move || worker.join()),
    )
    .await
    .expect("worker exited")
    .expect("join task")
    .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(6));
    Ok(())
}

#[test]
fn worker_terminates_and_drains_outstanding() -> io::Result<()> {
    proactor_support::init_logging("proactor=trace");

    let port = LoopbackPort::new();
    let port2 = port.clone();
    let events = Arc::new(Mutex::new(Vec::new()));
    let events2 = events.clone();
    let started = Arc::new(Mutex::new(None::<Pending>));
    let started2 = started.clone();

    let worker = Worker::spawn(port.clone(), Options::new(), move |poller| {
        let context = poller.begin_watching(1)?;

        context.set_callback(Direction::Read, move |poller, event, context| {
            let terminating = event.is_terminating();
            events2.lock().unwrap().push(terminating);

            if terminating {
                poller.end_watching(context);
            }
        });

        poller.issue(Direction::Read, &context);

        poller.submit(Direction::Read, &context, OpKind::Read, |submission| {
            *started2.lock().unwrap() = Some(port2.start(submission));
            Ok(())
        })
    })?;

    let pending = started.lock().unwrap().take().expect("read was started");

    worker.stop()?;
    port.complete(pending, 8);
    worker.join()?;

    let events = events.lock().unwrap();
    assert_eq!(events.last(), Some(&true));
    assert_eq!(events.iter().filter(|t| **t).count(), 1);
    assert_eq!(port.outstanding(), 0);
    Ok(())
}

#[test]
fn worker_gives_up_after_shutdown_timeout() -> io::Result<()> {
    let port = LoopbackPort::new();
    let port2 = port.clone();
    let stuck = Arc::new(Mutex::new(None::<Pending>));
    let stuck2 = stuck.clone();
    let options = Options::new().shutdown_timeout(Duration::from_millis(50));

    let worker = Worker::spawn(port.clone(), options, move |poller| {
        let context = poller.begin_watching(1)?;
        poller.issue(Direction::Write, &context);

        poller.submit(Direction::Write, &context, OpKind::Write, |submission| {
            *stuck2.lock().unwrap() = Some(port2.start(submission));
            Ok(())
        })
    })?;

    worker.stop()?;
    worker.join()?;

    // Never completed, so the port still considers it outstanding.
    assert!(stuck.lock().unwrap().is_some());
    assert_eq!(port.outstanding(), 1);
    Ok(())
}
