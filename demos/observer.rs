// In demos/observer.rs
use mimo_ringbuf::MIMO::dtype::{ScalarType, StructuredDtype};
use mimo_ringbuf::MIMO::{BufferBuilder, Observer};
use std::env;
use std::thread;
use std::time::Duration;

fn pulse_dtype() -> StructuredDtype {
    StructuredDtype::new([("channel", ScalarType::U16), ("value", ScalarType::F32)])
        .expect("valid dtype")
}

fn main() -> Result<(), mimo_ringbuf::BufferError> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <buffer_name> [interval_ms]", args[0]);
        std::process::exit(1);
    }
    let name = &args[1];
    let interval: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(500);

    let buffer = loop {
        match BufferBuilder::new(name.as_str())
            .with_dtype(pulse_dtype())
            .attach()
        {
            Ok(buffer) => break buffer,
            Err(e) => {
                println!("Observer: waiting for buffer {name} ({e})");
                thread::sleep(Duration::from_millis(500));
            }
        }
    };
    println!("Observer: attached to {name}");

    let buffer = std::sync::Arc::new(buffer);
    let observer = Observer::new(buffer.clone());

    while !buffer.flush_received() {
        // Snapshot one record if any is filled right now; misses are fine
        if let Some(slot) = observer.acquire() {
            println!(
                "Observer: sampled counter {} value[0]={}",
                slot.metadata().counter(),
                slot.data().field("value").read_f32(0)
            );
        }

        let stats = buffer.get_stats();
        println!(
            "Observer: rate {:.1} Hz, filled {}/{}, events {}, overwrites {}",
            stats.rate_hz,
            stats.filled_count,
            buffer.slot_count(),
            stats.event_count,
            stats.overwrite_count
        );

        thread::sleep(Duration::from_millis(interval));
    }

    println!("Observer: flush observed, exiting");
    Ok(())
}
