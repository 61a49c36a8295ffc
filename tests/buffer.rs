use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mimo_ringbuf::MIMO::dtype::{ScalarType, StructuredDtype};
use mimo_ringbuf::MIMO::{BufferBuilder, MimoBuffer, Observer, Reader, Writer};
use mimo_ringbuf::BufferError;

fn test_name(tag: &str) -> String {
    // Unique per process so a crashed run cannot poison the next one
    format!("t{}_{tag}", std::process::id())
}

fn value_dtype() -> StructuredDtype {
    StructuredDtype::new([("value", ScalarType::F32)]).unwrap()
}

fn make_buffer(tag: &str, slot_count: usize, data_length: usize, overwrite: bool) -> Arc<MimoBuffer> {
    Arc::new(
        BufferBuilder::new(test_name(tag))
            .with_slot_count(slot_count)
            .with_data_length(data_length)
            .with_dtype(value_dtype())
            .with_overwrite(overwrite)
            .create()
            .unwrap(),
    )
}

#[test]
fn single_producer_single_consumer_echo() {
    let buffer = make_buffer("echo", 4, 10, false);
    let writer = Writer::new(buffer.clone());
    let reader = Reader::new(buffer.clone());

    {
        let mut slot = writer.acquire().unwrap();
        let mut data = slot.data();
        let mut value = data.field("value");
        for i in 0..10 {
            value.write_f32(i, i as f32);
        }
        // counter and timestamp left default: the buffer stamps them
    }

    let slot = reader.acquire().unwrap();
    let data = slot.data();
    let value = data.field("value");
    for i in 0..10 {
        assert_eq!(value.read_f32(i), i as f32);
    }
    let metadata = slot.metadata();
    assert_eq!(metadata.counter(), 1);
    assert_ne!(metadata.timestamp_ns(), 0);
}

#[test]
fn writer_stamps_only_unset_metadata() {
    let buffer = make_buffer("stamp", 2, 1, false);
    let writer = Writer::new(buffer.clone());
    let reader = Reader::new(buffer.clone());

    {
        let mut slot = writer.acquire().unwrap();
        let mut metadata = slot.metadata();
        metadata.set_counter(777);
        metadata.set_deadtime(0.5);
    }

    let slot = reader.acquire().unwrap();
    assert_eq!(slot.metadata().counter(), 777);
    assert_eq!(slot.metadata().deadtime(), 0.5);
    // The buffer still filled in the timestamp
    assert_ne!(slot.metadata().timestamp_ns(), 0);
}

#[test]
fn overwrite_pressure_keeps_most_recent() {
    let buffer = make_buffer("pressure", 2, 1, true);
    let writer = Writer::new(buffer.clone());

    for i in 1..=10u32 {
        let mut slot = writer.acquire().unwrap();
        slot.data().field("value").write_f32(0, i as f32);
    }

    let stats = buffer.get_stats();
    assert_eq!(stats.event_count, 10);
    assert_eq!(stats.overwrite_count, 8);

    // The two surviving records are the most recent ones, oldest first
    let reader = Reader::new(buffer.clone());
    let mut seen = Vec::new();
    for _ in 0..2 {
        let slot = reader.acquire().unwrap();
        seen.push((slot.metadata().counter(), slot.data().field("value").read_f32(0)));
    }
    assert_eq!(seen, vec![(9, 9.0), (10, 10.0)]);
    assert_eq!(buffer.filled_count(), 0);
    assert_eq!(buffer.empty_count(), 2);
}

#[test]
fn no_overwrite_backpressure_blocks_writer() {
    let buffer = make_buffer("backpressure", 2, 1, false);
    let writer_buffer = buffer.clone();

    let producer = thread::spawn(move || {
        let writer = Writer::new(writer_buffer);
        for i in 1..=10u32 {
            let mut slot = writer.acquire().unwrap();
            slot.data().field("value").write_f32(0, i as f32);
        }
    });

    // Both slots fill, then the producer parks on the empty queue
    thread::sleep(Duration::from_millis(200));
    assert_eq!(buffer.get_stats().event_count, 2);

    // Freeing one slot unblocks exactly one producer step
    let reader = Reader::new(buffer.clone());
    {
        let slot = reader.acquire().unwrap();
        assert_eq!(slot.metadata().counter(), 1);
    }
    thread::sleep(Duration::from_millis(200));
    assert_eq!(buffer.get_stats().event_count, 3);

    // Drain the rest; counters arrive in order with no gaps
    for expected in 2..=10u64 {
        let slot = reader.acquire().unwrap();
        assert_eq!(slot.metadata().counter(), expected);
    }
    producer.join().unwrap();
    assert_eq!(buffer.get_stats().overwrite_count, 0);
}

#[test]
fn flush_cascades_to_competing_readers() {
    let buffer = make_buffer("cascade", 4, 1, false);
    let writer = Writer::new(buffer.clone());

    for i in 1..=3u32 {
        let mut slot = writer.acquire().unwrap();
        slot.data().field("value").write_f32(0, i as f32);
    }
    writer.send_flush_event();

    let consumed = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let buffer = buffer.clone();
        let consumed = consumed.clone();
        handles.push(thread::spawn(move || {
            let reader = Reader::new(buffer);
            while let Some(_slot) = reader.acquire() {
                consumed.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // Both readers terminated; together they consumed every record once
    assert_eq!(consumed.load(Ordering::Relaxed), 3);
    assert!(buffer.flush_received());
    // The re-broadcast sentinel is all that remains in the filled queue
    assert_eq!(buffer.filled_count(), 1);
    assert_eq!(buffer.empty_count(), 4);
}

#[test]
fn flush_is_idempotent() {
    let buffer = make_buffer("idempotent", 2, 1, true);

    for _ in 0..3 {
        buffer.send_flush_event();
    }
    assert_eq!(buffer.filled_count(), 1);

    let reader = Reader::new(buffer.clone());
    assert!(reader.acquire().is_none());
    assert!(buffer.flush_received());

    buffer.send_flush_event();
    assert_eq!(buffer.filled_count(), 1);

    // Writers observe the shutdown too
    let writer = Writer::new(buffer.clone());
    assert!(writer.acquire().is_none());
}

#[test]
fn flush_wakes_blocked_writer() {
    let buffer = make_buffer("wake", 1, 1, false);
    let writer = Writer::new(buffer.clone());

    // Occupy the only slot so the next acquire parks
    {
        let mut slot = writer.acquire().unwrap();
        slot.data().field("value").write_f32(0, 1.0);
    }

    let blocked_buffer = buffer.clone();
    let blocked = thread::spawn(move || Writer::new(blocked_buffer).acquire().is_none());

    thread::sleep(Duration::from_millis(100));
    buffer.send_flush_event();

    assert!(blocked.join().unwrap(), "blocked writer must observe the flush");
}

#[test]
fn observer_does_not_consume() {
    let buffer = make_buffer("observe", 4, 1, true);
    let writer = Writer::new(buffer.clone());
    let observer = Observer::new(buffer.clone());

    // Nothing filled yet: observers tolerate misses
    assert!(observer.acquire().is_none());

    {
        let mut slot = writer.acquire().unwrap();
        slot.data().field("value").write_f32(0, 42.0);
    }

    {
        let slot = observer.acquire().unwrap();
        assert_eq!(slot.data().field("value").read_f32(0), 42.0);
        assert_eq!(slot.metadata().counter(), 1);
    }

    // A real reader still receives the record untouched
    let reader = Reader::new(buffer.clone());
    let slot = reader.acquire().unwrap();
    assert_eq!(slot.data().field("value").read_f32(0), 42.0);
    assert_eq!(slot.metadata().counter(), 1);
}

#[test]
fn observer_interleaved_with_reader_sees_every_token_once() {
    let buffer = make_buffer("interleave", 8, 1, false);
    let writer = Writer::new(buffer.clone());
    let observer = Observer::new(buffer.clone());
    let reader = Reader::new(buffer.clone());

    for i in 1..=5u32 {
        let mut slot = writer.acquire().unwrap();
        slot.data().field("value").write_f32(0, i as f32);
    }

    let mut counters = Vec::new();
    for _ in 0..5 {
        // Observing reorders the filled queue but loses nothing
        let _ = observer.acquire();
        let slot = reader.acquire().unwrap();
        counters.push(slot.metadata().counter());
    }
    counters.sort_unstable();
    assert_eq!(counters, vec![1, 2, 3, 4, 5]);
    assert_eq!(buffer.filled_count(), 0);
}

#[test]
fn token_conservation_at_quiescence() {
    let buffer = make_buffer("conserve", 4, 1, true);
    let writer = Writer::new(buffer.clone());
    let reader = Reader::new(buffer.clone());

    for round in 0..3 {
        for _ in 0..=round {
            let mut slot = writer.acquire().unwrap();
            slot.data().field("value").write_f32(0, 0.0);
        }
        let _ = reader.acquire().unwrap();
        assert_eq!(
            buffer.empty_count() + buffer.filled_count(),
            buffer.slot_count(),
            "tokens leaked in round {round}"
        );
    }
}

#[test]
fn pause_discards_writes() {
    let buffer = make_buffer("pause", 2, 1, true);
    let writer = Writer::new(buffer.clone());

    buffer.pause();
    assert!(buffer.is_paused());
    {
        let mut slot = writer.acquire().unwrap();
        assert!(slot.is_discarded());
        slot.data().field("value").write_f32(0, 123.0);
    }
    let stats = buffer.get_stats();
    assert_eq!(stats.event_count, 0);
    assert_eq!(stats.paused_count, 1);
    assert!(stats.paused);
    assert_eq!(buffer.filled_count(), 0);

    buffer.resume();
    {
        let mut slot = writer.acquire().unwrap();
        assert!(!slot.is_discarded());
        slot.data().field("value").write_f32(0, 1.0);
    }
    let stats = buffer.get_stats();
    assert_eq!(stats.event_count, 1);
    assert_eq!(stats.paused_count, 1);
}

#[test]
fn stats_window_tracks_rate_and_deadtime() {
    let buffer = make_buffer("stats", 4, 1, true);
    let writer = Writer::new(buffer.clone());

    for _ in 0..3 {
        let mut slot = writer.acquire().unwrap();
        slot.metadata().set_deadtime(0.5);
    }
    thread::sleep(Duration::from_millis(20));

    let stats = buffer.get_stats();
    assert_eq!(stats.event_count, 3);
    assert_eq!(stats.filled_count, 3);
    assert_eq!(stats.empty_count, 1);
    assert!(stats.time_delta_s > 0.0);
    assert!(stats.rate_hz > 0.0);
    assert!((stats.average_deadtime - 0.5).abs() < 1e-9);

    // Nothing written since: the window resets
    let stats = buffer.get_stats();
    assert_eq!(stats.event_count, 3);
    assert_eq!(stats.rate_hz, 0.0);
    assert_eq!(stats.average_deadtime, 0.0);
}

#[test]
fn attach_shares_the_segment() {
    let name = test_name("attach");
    let creator = Arc::new(
        BufferBuilder::new(name.as_str())
            .with_slot_count(2)
            .with_data_length(1)
            .with_dtype(value_dtype())
            .create()
            .unwrap(),
    );
    let attached = Arc::new(
        BufferBuilder::new(name.as_str())
            .with_dtype(value_dtype())
            .attach()
            .unwrap(),
    );
    assert_eq!(attached.slot_count(), 2);
    assert_eq!(attached.data_length(), 1);
    assert!(attached.overwrite());

    // Records written through one handle are read through the other
    let writer = Writer::new(creator.clone());
    {
        let mut slot = writer.acquire().unwrap();
        slot.data().field("value").write_f32(0, 3.5);
    }
    let reader = Reader::new(attached.clone());
    let slot = reader.acquire().unwrap();
    assert_eq!(slot.data().field("value").read_f32(0), 3.5);
    assert_eq!(slot.metadata().counter(), 1);
}

#[test]
fn attach_rejects_mismatched_dtype() {
    let name = test_name("attach_dtype");
    let _creator = BufferBuilder::new(name.as_str())
        .with_slot_count(2)
        .with_dtype(value_dtype())
        .create()
        .unwrap();

    let other = StructuredDtype::new([("value", ScalarType::F64)]).unwrap();
    let result = BufferBuilder::new(name.as_str()).with_dtype(other).attach();
    assert!(matches!(result, Err(BufferError::Incompatible(_))));
}

#[test]
fn create_rejects_bad_config() {
    assert!(matches!(
        BufferBuilder::new(test_name("zero_slots"))
            .with_slot_count(0)
            .with_dtype(value_dtype())
            .create(),
        Err(BufferError::Config(_))
    ));
    assert!(matches!(
        BufferBuilder::new(test_name("zero_length"))
            .with_data_length(0)
            .with_dtype(value_dtype())
            .create(),
        Err(BufferError::Config(_))
    ));
    assert!(matches!(
        BufferBuilder::new(test_name("no_dtype")).create(),
        Err(BufferError::Config(_))
    ));
    assert!(matches!(
        BufferBuilder::new("bad/name").with_dtype(value_dtype()).create(),
        Err(BufferError::Config(_))
    ));
}

#[test]
fn create_rejects_duplicate_name() {
    let name = test_name("duplicate");
    let _first = BufferBuilder::new(name.as_str())
        .with_dtype(value_dtype())
        .create()
        .unwrap();
    let second = BufferBuilder::new(name.as_str()).with_dtype(value_dtype()).create();
    assert!(matches!(second, Err(BufferError::SharedMemory(_))));
}
