// In demos/reader.rs
use mimo_ringbuf::MIMO::dtype::{ScalarType, StructuredDtype};
use mimo_ringbuf::MIMO::{BufferBuilder, Reader};
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
        eprintln!("Usage: {} <buffer_name>", args[0]);
        std::process::exit(1);
    }
    let name = &args[1];

    // The writer may not have created the segment yet
    let buffer = loop {
        match BufferBuilder::new(name.as_str())
            .with_dtype(pulse_dtype())
            .attach()
        {
            Ok(buffer) => break buffer,
            Err(e) => {
                println!("Reader: waiting for buffer {name} ({e})");
                thread::sleep(Duration::from_millis(500));
            }
        }
    };
    println!(
        "Reader: attached to {name} ({} slots, {} records per slot)",
        buffer.slot_count(),
        buffer.data_length()
    );

    let buffer = std::sync::Arc::new(buffer);
    let reader = Reader::new(buffer.clone());

    let mut consumed = 0u64;
    let mut peak = f32::MIN;
    while let Some(slot) = reader.acquire() {
        let data = slot.data();
        let value = data.field("value");
        for i in 0..data.len() {
            peak = peak.max(value.read_f32(i));
        }
        consumed += 1;
        if consumed % 1000 == 0 {
            println!(
                "Reader: {consumed} events (last counter {})",
                slot.metadata().counter()
            );
        }
    }

    println!("Reader: end of stream after {consumed} events, peak value {peak}");
    println!("All events received successfully");
    Ok(())
}
