mod common;

use common::{Completions, RecordingDispatcher, ThrottledSocket};
use netreactor::{ByteBufferPool, Channel, ChannelSettings, FlushProgress, Token};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn channel_over(socket: &ThrottledSocket, dispatcher: Arc<RecordingDispatcher>) -> Channel {
    Channel::new(
        7,
        Token(3),
        Box::new(socket.clone()),
        dispatcher,
        Arc::new(ByteBufferPool::new(256, 4)),
        ChannelSettings::default(),
    )
}

#[test]
fn partial_writes_settle_exact_task_lengths() {
    common::init_tracing();

    let socket = ThrottledSocket::default();
    let channel = channel_over(&socket, Arc::new(RecordingDispatcher::default()));
    let completions = Completions::default();

    channel.flush(completions.task(0, vec![b'a'; 100]));
    channel.flush(completions.task(1, vec![b'b'; 50]));
    assert_eq!(channel.write_future_length(), 150);

    let mut lengths = Vec::new();
    let mut progress = Vec::new();
    while !channel.is_complete() {
        socket.allow(30);
        progress.push(channel.fire_event().expect("fire_event"));
        lengths.push(channel.write_future_length());
    }

    assert_eq!(lengths, vec![150, 150, 150, 50, 50, 0]);
    assert_eq!(
        progress,
        vec![
            FlushProgress::Blocked,
            FlushProgress::Blocked,
            FlushProgress::Blocked,
            FlushProgress::Completed,
            FlushProgress::Blocked,
            FlushProgress::Completed,
        ]
    );

    let results = completions.snapshot();
    assert_eq!(results, vec![(0, Ok(())), (1, Ok(()))]);

    let mut expected = vec![b'a'; 100];
    expected.extend(vec![b'b'; 50]);
    assert_eq!(socket.written(), expected);
}

#[test]
fn idle_channel_reports_idle() {
    let socket = ThrottledSocket::default();
    let channel = channel_over(&socket, Arc::new(RecordingDispatcher::default()));

    assert_eq!(channel.fire_event().expect("fire_event"), FlushProgress::Idle);
    assert!(channel.is_complete());
    assert!(!channel.need_flush());
}

#[test]
fn only_the_first_queued_task_dispatches() {
    let socket = ThrottledSocket::default();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let channel = channel_over(&socket, dispatcher.clone());

    channel.flush(netreactor::WriteTask::new(&b"one"[..]));
    channel.flush(netreactor::WriteTask::new(&b"two"[..]));
    assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 1);
    assert!(channel.need_flush());
    assert_eq!(channel.write_future_size(), 2);

    socket.allow(usize::MAX);
    channel.fire_event().expect("fire_event");
    channel.fire_event().expect("fire_event");
    assert!(channel.is_complete());

    channel.flush(netreactor::WriteTask::new(&b"three"[..]));
    assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn completes_in_order_and_drains_to_zero(
        sizes in prop::collection::vec(1usize..300, 1..12),
        budgets in prop::collection::vec(1usize..97, 1..16),
    ) {
        let socket = ThrottledSocket::default();
        let channel = channel_over(&socket, Arc::new(RecordingDispatcher::default()));
        let completions = Completions::default();

        let mut expected = Vec::new();
        for (tag, size) in sizes.iter().enumerate() {
            let payload = vec![tag as u8; *size];
            expected.extend_from_slice(&payload);
            channel.flush(completions.task(tag, payload));
        }
        prop_assert_eq!(channel.write_future_length(), sizes.iter().sum::<usize>());

        let mut attempt = 0;
        while !channel.is_complete() {
            socket.allow(budgets[attempt % budgets.len()]);
            attempt += 1;
            channel.fire_event().expect("fire_event");

            let finished = completions.snapshot().len();
            let unfinished: usize = sizes[finished..].iter().sum();
            prop_assert_eq!(channel.write_future_length(), unfinished);
        }

        let tags: Vec<usize> = completions.snapshot().into_iter().map(|(tag, _)| tag).collect();
        prop_assert_eq!(tags, (0..sizes.len()).collect::<Vec<_>>());
        prop_assert_eq!(channel.write_future_length(), 0);
        prop_assert_eq!(socket.written(), expected);
    }
}
