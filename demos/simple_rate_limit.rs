//! Simple example demonstrating the rate limiter functionality.

use ratelimit_writer::{Config, Error, Limiter};
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Rate Limiter Example");
    println!("====================");

    // 16 bytes per second, which is also the largest burst.
    let config = Config::new(16);
    println!("Rate limit: {} bytes/second", config.bytes_per_second);

    let mut limiter = match Limiter::from_config(Vec::<u8>::new(), &config) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to create rate limiter: {}", e);
            return;
        }
    };
    println!("Available tokens: {}", limiter.available());

    for round in 0..3 {
        for chunk in [&b"0123456789"[..], b"abcdef", b"x"] {
            match limiter.write(chunk) {
                Ok(n) => println!("round {round}: wrote {n} bytes"),
                Err(e) if Error::is_throttled(&e) => {
                    println!("round {round}: {} bytes throttled ({e})", chunk.len())
                }
                Err(e) => {
                    eprintln!("sink failed: {e}");
                    return;
                }
            }
        }
        std::thread::sleep(Duration::from_millis(1100));
    }

    println!("\n{:?}", limiter.stats());
    let sink = limiter.into_inner();
    println!("Sink received {} bytes", sink.len());
}
