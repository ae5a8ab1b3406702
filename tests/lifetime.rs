mod common;

use proactor::loopback::{LoopbackPort, Pending};
use proactor::{Direction, Event, Interest, Multiplexer, OpKind, Poller, SlotState};
use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

#[test]
fn end_watching_is_idempotent() -> io::Result<()> {
    let (_, poller) = common::setup();

    let context = poller.begin_watching(1)?;
    let other = poller.begin_watching(2)?;
    assert_eq!(poller.len(), 2);

    poller.end_watching(&context);
    poller.end_watching(&context);
    assert!(context.is_retired());
    assert_eq!(poller.len(), 1);

    // A new context may reuse the registry slot of the old one, ending the
    // old one again must not touch it.
    let reused = poller.begin_watching(3)?;
    poller.end_watching(&context);
    assert!(!reused.is_retired());
    assert_eq!(poller.len(), 2);

    assert_eq!(poller.stats().io_released, 0);
    drop(context);
    assert_eq!(poller.stats().io_released, 1);

    poller.end_watching(&other);
    poller.end_watching(&reused);
    drop((other, reused));

    assert!(poller.stats().is_balanced());
    Ok(())
}

#[test]
fn operations_on_retired_context_are_refused() -> io::Result<()> {
    let (_, poller) = common::setup();

    let context = poller.begin_watching(1)?;
    poller.end_watching(&context);

    poller.issue(Direction::Read, &context);
    poller.retire(Direction::Write, &context);
    context.set_callback(Direction::Read, |_, _, _| {});
    assert!(!context.has_callback(Direction::Read));
    assert!(context.is_done(Direction::Read));

    let error = poller
        .submit(Direction::Read, &context, OpKind::Read, |_| Ok(()))
        .unwrap_err();

    assert_eq!(error.kind(), io::ErrorKind::NotConnected);
    assert_eq!(poller.pending(), 0);
    Ok(())
}

#[test]
fn retiring_with_both_directions_pending() -> io::Result<()> {
    let (port, poller) = common::setup();
    let stop = AtomicBool::new(false);

    let context = poller.begin_watching(1)?;
    let read = common::start(&poller, &port, &context, Direction::Read, OpKind::Read)?;
    let write = common::start(&poller, &port, &context, Direction::Write, OpKind::Write)?;

    poller.end_watching(&context);
    drop(context);

    // The io-context itself is gone, its op-contexts are not.
    let stats = poller.stats();
    assert_eq!(stats.io_released, 1);
    assert_eq!(stats.op_released, 0);
    assert_eq!(stats.pending, 2);

    port.complete(write, 1);
    assert_eq!(poller.drain(Some(Duration::from_secs(5)), &stop)?, 0);
    assert_eq!(poller.stats().op_released, 1);

    port.fail(read, 995);
    assert_eq!(poller.drain(Some(Duration::from_secs(5)), &stop)?, 0);

    let stats = poller.stats();
    assert_eq!(stats.discarded, 2);
    assert!(stats.is_balanced());
    Ok(())
}

#[test]
fn dropping_poller_retires_watched_contexts() -> io::Result<()> {
    let (_, poller) = common::setup();

    let context = poller.begin_watching(1)?;
    context.set_callback(Direction::Read, |_, _, _| {});
    context.set_notify(|_, _, _| {});

    drop(poller);

    assert!(context.is_retired());
    assert!(!context.has_notify());
    assert_eq!(context.state(Direction::Read), SlotState::RetiringDone);
    assert_eq!(context.state(Direction::Write), SlotState::RetiringDone);
    Ok(())
}

#[test]
fn callback_may_end_watching_mid_drain() -> io::Result<()> {
    let (port, poller) = common::setup();
    let stop = AtomicBool::new(false);

    let context = poller.begin_watching(1)?;
    let write = common::start(&poller, &port, &context, Direction::Write, OpKind::Write)?;

    context.set_callback(Direction::Read, |poller, event, context| {
        assert!(matches!(event, Event::Complete(0)));
        poller.end_watching(context);
    });

    context.set_callback(Direction::Write, |_, _, _| {
        panic!("write completion dispatched after end of watch");
    });

    let read = common::start(&poller, &port, &context, Direction::Read, OpKind::Read)?;

    // Both completions are dequeued in the same batch, the read first.
    port.complete(read, 0);
    port.complete(write, 10);

    assert_eq!(poller.drain(Some(Duration::from_secs(5)), &stop)?, 1);
    assert!(context.is_retired());

    drop(context);
    assert!(poller.stats().is_balanced());
    Ok(())
}

fn cycle<M>(poller: &M, socket: proactor::RawSocket) -> io::Result<M::Context>
where
    M: Multiplexer,
{
    let context = poller.begin_watching(socket)?;
    poller.watch(Interest::READABLE | Interest::WRITABLE, &context)?;
    poller.issue(Direction::Read, &context);
    poller.retire(Direction::Read, &context);
    poller.unwatch(Interest::READABLE, &context)?;
    poller.end_watching(&context);
    Ok(context)
}

#[test]
fn generic_multiplexer_cycle() -> io::Result<()> {
    let (_, poller) = common::setup();

    let context = cycle(&poller, 1)?;
    assert!(context.is_retired());
    assert_eq!(Multiplexer::pending(&poller), 0);
    assert!(poller.is_empty());

    let stop = AtomicBool::new(true);
    assert_eq!(Multiplexer::drain(&poller, None, &stop)?, 0);
    Ok(())
}

/// A small deterministic generator, so that failures are reproducible.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

struct Outstanding {
    pending: Pending,
    id: usize,
}

/// Drive random interleavings of watching, issuing, retiring, completing and
/// draining, checking that no completion is dispatched twice and that every
/// context is released once everything is drained.
#[test]
fn random_interleavings_stay_balanced() -> io::Result<()> {
    proactor_support::init_logging("proactor=info");

    for seed in 1..=16u64 {
        run_interleaving(seed)?;
    }

    Ok(())
}

fn run_interleaving(seed: u64) -> io::Result<()> {
    let port = LoopbackPort::new();
    let poller = Poller::new(port.clone());
    let stop = AtomicBool::new(false);
    let mut rng = Rng(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1);

    let dispatched = Rc::new(RefCell::new(Vec::new()));
    let mut contexts: Vec<common::Context> = Vec::new();
    let mut retired: Vec<common::Context> = Vec::new();
    let mut outstanding: Vec<Outstanding> = Vec::new();
    let mut completed = HashSet::new();
    let mut next_socket = 1;
    let mut next_id = 1;
    let mut total = 0;

    for _ in 0..400 {
        match rng.below(7) {
            0 if contexts.len() < 4 => {
                let context = poller.begin_watching(next_socket)?;
                next_socket += 1;

                for direction in Direction::ALL {
                    let dispatched = dispatched.clone();

                    context.set_callback(direction, move |_, event, _| {
                        if let Event::Complete(id) = event {
                            dispatched.borrow_mut().push(id);
                        }
                    });
                }

                contexts.push(context);
            }
            1 | 2 if !contexts.is_empty() => {
                let context = &contexts[rng.below(contexts.len())];
                let direction = Direction::ALL[rng.below(2)];

                if !context.is_pending(direction) {
                    let kind = match direction {
                        Direction::Read => OpKind::Read,
                        Direction::Write => OpKind::Write,
                    };

                    let pending = common::start(&poller, &port, context, direction, kind)?;
                    outstanding.push(Outstanding {
                        pending,
                        id: next_id,
                    });
                    next_id += 1;
                }
            }
            3 if !contexts.is_empty() => {
                let context = &contexts[rng.below(contexts.len())];
                poller.retire(Direction::ALL[rng.below(2)], context);
            }
            4 if !outstanding.is_empty() => {
                let Outstanding { pending, id } = outstanding.swap_remove(rng.below(outstanding.len()));
                completed.insert(id);
                port.complete(pending, id);
            }
            5 => {
                total += poller.drain(Some(Duration::from_millis(0)), &stop)?;
            }
            6 if !contexts.is_empty() => {
                let context = contexts.swap_remove(rng.below(contexts.len()));
                poller.end_watching(&context);
                retired.push(context);
            }
            _ => {}
        }
    }

    for context in contexts.drain(..) {
        poller.end_watching(&context);
        retired.push(context);
    }

    for Outstanding { pending, id } in outstanding.drain(..) {
        completed.insert(id);
        port.complete(pending, id);
    }

    while poller.pending() > 0 {
        total += poller.drain(Some(Duration::from_secs(5)), &stop)?;
    }

    let dispatched = dispatched.borrow();
    let unique = dispatched.iter().copied().collect::<HashSet<_>>();

    assert_eq!(unique.len(), dispatched.len(), "completion dispatched twice");
    assert!(unique.is_subset(&completed));
    assert_eq!(total, dispatched.len());
    assert_eq!(port.outstanding(), 0);

    for context in &retired {
        assert_eq!(context.state(Direction::Read), SlotState::RetiringDone);
        assert_eq!(context.state(Direction::Write), SlotState::RetiringDone);
    }

    drop(retired);

    let stats = poller.stats();
    assert!(stats.is_balanced(), "unbalanced with seed {}: {:?}", seed, stats);
    Ok(())
}
