// In demos/writer.rs
use mimo_ringbuf::MIMO::dtype::{ScalarType, StructuredDtype};
use mimo_ringbuf::MIMO::{BufferBuilder, Writer};
use std::env;

const DATA_LENGTH: usize = 64;

fn pulse_dtype() -> StructuredDtype {
    StructuredDtype::new([("channel", ScalarType::U16), ("value", ScalarType::F32)])
        .expect("valid dtype")
}

fn main() -> Result<(), mimo_ringbuf::BufferError> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <buffer_name> [events] [slot_count]", args[0]);
        eprintln!("  events: number of records to publish (default: 1000)");
        eprintln!("  slot_count: size of the slot pool (default: 16)");
        std::process::exit(1);
    }

    let name = &args[1];
    let events: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1000);
    let slot_count: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(16);

    let buffer = BufferBuilder::new(name.as_str())
        .with_slot_count(slot_count)
        .with_data_length(DATA_LENGTH)
        .with_dtype(pulse_dtype())
        .with_overwrite(false)
        .create()?;
    println!(
        "Writer: created buffer {name} with {slot_count} slots of {DATA_LENGTH} records"
    );

    let buffer = std::sync::Arc::new(buffer);
    let writer = Writer::new(buffer.clone());

    let start = std::time::Instant::now();
    for event in 0..events {
        let Some(mut slot) = writer.acquire() else {
            eprintln!("Writer: buffer flushed externally, stopping");
            break;
        };
        let mut data = slot.data();
        for i in 0..DATA_LENGTH {
            data.field("channel").write_u16(i, (i % 4) as u16);
            // Synthetic decaying pulse
            data.field("value")
                .write_f32(i, (event as f32 + 1.0) * (-(i as f32) / 8.0).exp());
        }
    }
    let elapsed = start.elapsed();

    println!(
        "Writer: published {events} events in {elapsed:.2?} ({:.0} events/s)",
        events as f64 / elapsed.as_secs_f64()
    );

    // Release downstream readers
    writer.send_flush_event();
    println!("Writer: flush sent, waiting for readers to drain");

    // Hold the segment open until the filled queue is down to the sentinel
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
    while buffer.filled_count() > 1 && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    std::thread::sleep(std::time::Duration::from_millis(500));

    Ok(())
}
